//! Preemption timer and the critical-section discipline (section 4.5).
//!
//! Grounded on the reference implementation's `timer.c`: a process interval
//! timer (`SIGALRM`/`ITIMER_REAL`) plus a signal handler that only ever
//! calls `tick()`, deferring when the scheduler is reentrant or the current
//! thread is in a critical section.

use std::cell::Cell;

thread_local! {
    static DISABLE_DEPTH: Cell<u32> = const { Cell::new(0) };
    static PREEMPT_PENDING: Cell<bool> = const { Cell::new(false) };
    static TIMER_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

fn sigalrm_set() -> libc::sigset_t {
    // SAFETY: sigemptyset/sigaddset on a local, valid sigset_t.
    unsafe {
        let mut set: libc::sigset_t = core::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGALRM);
        set
    }
}

fn block_sigalrm() {
    let set = sigalrm_set();
    // SAFETY: valid sigset_t, valid operation.
    unsafe {
        libc::sigprocmask(libc::SIG_BLOCK, &set, core::ptr::null_mut());
    }
}

fn unblock_sigalrm() {
    let set = sigalrm_set();
    // SAFETY: valid sigset_t, valid operation.
    unsafe {
        libc::sigprocmask(libc::SIG_UNBLOCK, &set, core::ptr::null_mut());
    }
}

/// Enter a critical section: block the timer signal and bump the
/// reentrancy depth. Matches `preemption_disable` in the reference design.
pub fn preemption_disable() {
    block_sigalrm();
    DISABLE_DEPTH.with(|d| d.set(d.get() + 1));
}

/// Leave a critical section. When the depth returns to zero, unblocks the
/// timer signal and, if a tick was deferred while disabled, runs it once.
pub fn preemption_enable() {
    let reached_zero = DISABLE_DEPTH.with(|d| {
        let next = d.get().saturating_sub(1);
        d.set(next);
        next == 0
    });

    if !reached_zero {
        return;
    }

    unblock_sigalrm();

    let had_pending = PREEMPT_PENDING.with(|p| p.replace(false));
    if !had_pending {
        return;
    }

    if crate::runtime::in_scheduler() {
        return;
    }
    if crate::runtime::current_in_critical_section() {
        return;
    }
    crate::scheduler::tick();
}

pub fn preemption_is_enabled() -> bool {
    DISABLE_DEPTH.with(|d| d.get() == 0)
}

extern "C" fn timer_signal_handler(_signum: libc::c_int) {
    if !crate::runtime::is_initialized() {
        return;
    }

    if DISABLE_DEPTH.with(|d| d.get() > 0) {
        PREEMPT_PENDING.with(|p| p.set(true));
        return;
    }

    if crate::runtime::in_scheduler() {
        return;
    }

    if crate::runtime::current_in_critical_section() {
        PREEMPT_PENDING.with(|p| p.set(true));
        return;
    }

    crate::scheduler::tick();
}

/// Install the `SIGALRM` handler. Called once from `init`.
pub fn timer_init() {
    // SAFETY: installs a well-formed sigaction with a valid handler and a
    // full signal mask during delivery.
    unsafe {
        let mut sa: libc::sigaction = core::mem::zeroed();
        sa.sa_sigaction = timer_signal_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigfillset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGALRM, &sa, core::ptr::null_mut());
    }
    DISABLE_DEPTH.with(|d| d.set(0));
    PREEMPT_PENDING.with(|p| p.set(false));
    TIMER_ACTIVE.with(|t| t.set(false));
}

/// Restore the default disposition for `SIGALRM`. Called once from
/// `shutdown`.
pub fn timer_shutdown() {
    timer_stop();
    // SAFETY: restores a standard disposition.
    unsafe {
        libc::signal(libc::SIGALRM, libc::SIG_DFL);
    }
}

/// Arm the interval timer at `ns` nanoseconds, rearming periodically.
pub fn timer_start(ns: u64) {
    if TIMER_ACTIVE.with(|t| t.get()) {
        return;
    }
    let secs = (ns / 1_000_000_000) as libc::time_t;
    let micros = ((ns % 1_000_000_000) / 1_000) as libc::suseconds_t;
    let interval = libc::timeval {
        tv_sec: secs,
        tv_usec: micros.max(1),
    };
    let itv = libc::itimerval {
        it_interval: interval,
        it_value: interval,
    };
    // SAFETY: well-formed itimerval passed to a standard syscall wrapper.
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &itv, core::ptr::null_mut());
    }
    TIMER_ACTIVE.with(|t| t.set(true));
}

pub fn timer_stop() {
    if !TIMER_ACTIVE.with(|t| t.get()) {
        return;
    }
    let zero = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
    };
    // SAFETY: disarms the timer.
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &zero, core::ptr::null_mut());
    }
    TIMER_ACTIVE.with(|t| t.set(false));
}

/// Re-arm the timer at a new interval, preserving whether it was running.
pub fn timer_set_interval(ns: u64) {
    let was_active = TIMER_ACTIVE.with(|t| t.get());
    if was_active {
        timer_stop();
    }
    if was_active {
        timer_start(ns);
    }
}
