//! Machine-context save/restore, built on the POSIX `ucontext` facility
//! (`getcontext`/`makecontext`/`swapcontext`), mirroring the reference
//! implementation's `context.c`.

use crate::stack::Stack;

/// A saved machine context: registers, instruction pointer, stack pointer.
///
/// Boxed so its address is stable across moves of the owning TCB — `libc`
/// retains pointers into this struct across context switches.
pub struct Context {
    uc: Box<libc::ucontext_t>,
}

impl Context {
    /// An empty context, to be filled in by `init` (new thread) or by a
    /// `getcontext` snapshot (bootstrapping the "main" TCB).
    pub fn uninit() -> Self {
        // SAFETY: ucontext_t is a plain-old-data FFI struct; a zeroed value
        // is inert until passed to getcontext/makecontext/swapcontext.
        let uc = unsafe { Box::new(core::mem::zeroed::<libc::ucontext_t>()) };
        Context { uc }
    }

    /// Snapshot the calling context into `self`. Used once, to bootstrap the
    /// context of the thread that calls `init()`.
    pub fn capture_current(&mut self) {
        // SAFETY: `self.uc` is a valid, stably-addressed ucontext_t.
        let rc = unsafe { libc::getcontext(self.uc.as_mut()) };
        debug_assert_eq!(rc, 0, "getcontext failed");
    }

    /// Build a context that, when switched to, begins executing
    /// `trampoline` on `stack` and never returns to its caller (`uc_link` is
    /// left null; the trampoline routes into `exit` instead).
    pub fn init(&mut self, stack: &Stack, trampoline: extern "C" fn()) {
        // SAFETY: `self.uc` is valid; `stack` outlives this context (the
        // owning TCB holds both).
        unsafe {
            libc::getcontext(self.uc.as_mut());
            self.uc.uc_stack.ss_sp = stack.base() as *mut libc::c_void;
            self.uc.uc_stack.ss_size = stack.size();
            self.uc.uc_stack.ss_flags = 0;
            self.uc.uc_link = core::ptr::null_mut();
            libc::makecontext(self.uc.as_mut(), trampoline, 0);
        }
    }

    /// Save `from`'s machine state and restore `to`'s. Returns when `from`
    /// is switched back to by some later `swap`/`resume`.
    ///
    /// # Safety
    /// `to` must be a context previously initialized by `init` or
    /// `capture_current`, with its stack (if any) still live.
    pub unsafe fn swap(from: &mut Context, to: &Context) {
        unsafe {
            libc::swapcontext(from.uc.as_mut(), to.uc.as_ref());
        }
    }

    /// Restore `to` without saving any outgoing context. Used for the very
    /// first scheduling decision, where there is no prior context to save.
    ///
    /// # Safety
    /// Same requirements as `swap`; additionally this never returns.
    pub unsafe fn resume(to: &Context) -> ! {
        unsafe {
            libc::setcontext(to.uc.as_ref());
        }
        unreachable!("setcontext does not return on success")
    }
}
