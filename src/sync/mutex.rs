//! Blocking mutex with NORMAL/RECURSIVE/ERRORCHECK semantics (section 4.7).

use std::cell::{Cell, RefCell};

use crate::error::{Error, Result};
use crate::preempt;
use crate::runtime;
use crate::scheduler;
use crate::tcb::{ThreadId, WaitQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexKind {
    Normal,
    Recursive,
    ErrorCheck,
}

pub struct Mutex {
    locked: Cell<bool>,
    owner: Cell<Option<ThreadId>>,
    recursion_count: Cell<u32>,
    waiters: RefCell<WaitQueue>,
    kind: MutexKind,
}

// Single execution stream: every field is touched only with preemption
// disabled, never concurrently from two OS threads. Safe to hand across
// user threads (and to name in a `Send` closure) for the same reason.
unsafe impl Sync for Mutex {}
unsafe impl Send for Mutex {}

impl Mutex {
    pub fn new(kind: MutexKind) -> Self {
        Mutex {
            locked: Cell::new(false),
            owner: Cell::new(None),
            recursion_count: Cell::new(0),
            waiters: RefCell::new(WaitQueue::new()),
            kind,
        }
    }

    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    pub fn lock(&self) -> Result<MutexGuard<'_>> {
        preempt::preemption_disable();
        let self_id = runtime::current_tid();

        if self.owner.get() == Some(self_id) {
            match self.kind {
                MutexKind::Recursive => {
                    self.recursion_count.set(self.recursion_count.get() + 1);
                    preempt::preemption_enable();
                    return Ok(MutexGuard { mutex: self });
                }
                MutexKind::ErrorCheck => {
                    preempt::preemption_enable();
                    return Err(Error::WouldDeadlock);
                }
                // NORMAL: re-locking by the owner is undefined behavior in
                // the reference too; it deadlocks here just the same.
                MutexKind::Normal => {}
            }
        }

        while self.locked.get() {
            log::trace!("thread {} blocking on mutex", self_id.0);
            scheduler::block_on_preemptible(|tid| self.waiters.borrow_mut().push_back(tid));
        }

        self.locked.set(true);
        self.owner.set(Some(self_id));
        self.recursion_count.set(1);
        preempt::preemption_enable();
        Ok(MutexGuard { mutex: self })
    }

    pub fn try_lock(&self) -> Result<MutexGuard<'_>> {
        preempt::preemption_disable();
        let self_id = runtime::current_tid();

        if self.owner.get() == Some(self_id) {
            match self.kind {
                MutexKind::Recursive => {
                    self.recursion_count.set(self.recursion_count.get() + 1);
                    preempt::preemption_enable();
                    return Ok(MutexGuard { mutex: self });
                }
                MutexKind::ErrorCheck => {
                    preempt::preemption_enable();
                    return Err(Error::Busy);
                }
                MutexKind::Normal => {}
            }
        }

        if !self.locked.get() {
            self.locked.set(true);
            self.owner.set(Some(self_id));
            self.recursion_count.set(1);
            preempt::preemption_enable();
            return Ok(MutexGuard { mutex: self });
        }

        preempt::preemption_enable();
        Err(Error::Busy)
    }

    /// `Err(Busy)` if currently locked or threads are waiting on it.
    pub fn try_destroy(&self) -> Result<()> {
        preempt::preemption_disable();
        let busy = self.locked.get() || !self.waiters.borrow().is_empty();
        preempt::preemption_enable();
        if busy {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    fn unlock(&self) -> Result<()> {
        preempt::preemption_disable();
        let self_id = runtime::current_tid();

        if self.kind == MutexKind::ErrorCheck && self.owner.get() != Some(self_id) {
            preempt::preemption_enable();
            return Err(Error::NotPermitted);
        }

        if self.kind == MutexKind::Recursive && self.owner.get() == Some(self_id) {
            let count = self.recursion_count.get() - 1;
            self.recursion_count.set(count);
            if count > 0 {
                preempt::preemption_enable();
                return Ok(());
            }
        }

        self.locked.set(false);
        self.owner.set(None);
        self.recursion_count.set(0);

        scheduler::wake_one(&mut self.waiters.borrow_mut());
        preempt::preemption_enable();
        Ok(())
    }

    /// Release the mutex and enqueue `waiter` on the wait queue of a
    /// condition variable in one preemption-disabled step, matching the
    /// reference's `cond_wait` (atomic release-and-block w.r.t. the timer).
    pub(crate) fn release_for_condvar(&self, waiter: ThreadId, cond_waiters: &mut WaitQueue) {
        cond_waiters.push_back(waiter);
        self.locked.set(false);
        self.owner.set(None);
        scheduler::wake_one(&mut self.waiters.borrow_mut());
    }

    /// Reacquire after a condition-variable wait, blocking as `lock` would.
    pub(crate) fn reacquire_for_condvar(&self) {
        let self_id = runtime::current_tid();
        while self.locked.get() {
            scheduler::block_on_preemptible(|tid| self.waiters.borrow_mut().push_back(tid));
        }
        self.locked.set(true);
        self.owner.set(Some(self_id));
        self.recursion_count.set(1);
    }
}

/// RAII guard returned by `Mutex::lock`/`try_lock`; releases the mutex when
/// dropped.
pub struct MutexGuard<'a> {
    pub(crate) mutex: &'a Mutex,
}

impl<'a> MutexGuard<'a> {
    pub(crate) fn new(mutex: &'a Mutex) -> Self {
        MutexGuard { mutex }
    }

    /// Hand the mutex reference back without running `unlock` — used by the
    /// condition variable, which releases the mutex itself atomically with
    /// registering the waiter.
    pub(crate) fn release(self) -> &'a Mutex {
        let mutex = self.mutex;
        std::mem::forget(self);
        mutex
    }
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        let _ = self.mutex.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{self, RuntimeConfig};
    use crate::tcb::ThreadAttr;

    fn with_runtime<T>(f: impl FnOnce() -> T) -> T {
        runtime::init(RuntimeConfig::default()).unwrap();
        let result = f();
        runtime::shutdown();
        result
    }

    #[test]
    fn recursive_mutex_allows_relock_by_owner() {
        with_runtime(|| {
            let mutex = Mutex::new(MutexKind::Recursive);
            let g1 = mutex.lock().unwrap();
            let g2 = mutex.lock().unwrap();
            drop(g2);
            drop(g1);
            assert!(mutex.try_lock().is_ok());
        });
    }

    #[test]
    fn errorcheck_mutex_rejects_relock_by_owner() {
        with_runtime(|| {
            let mutex = Mutex::new(MutexKind::ErrorCheck);
            let _g = mutex.lock().unwrap();
            assert_eq!(mutex.lock().map(|_| ()).unwrap_err(), Error::WouldDeadlock);
        });
    }

    #[test]
    fn try_lock_fails_while_locked() {
        with_runtime(|| {
            let mutex = Mutex::new(MutexKind::Normal);
            let _g = mutex.lock().unwrap();
            assert_eq!(mutex.try_lock().map(|_| ()).unwrap_err(), Error::Busy);
        });
    }

    #[test]
    fn spawned_thread_blocks_until_unlocked() {
        with_runtime(|| {
            use std::sync::Arc;
            let mutex = Arc::new(Mutex::new(MutexKind::Normal));
            let order = Arc::new(std::sync::Mutex::new(Vec::new()));

            let guard = mutex.lock().unwrap();

            let m2 = mutex.clone();
            let o2 = order.clone();
            let handle = runtime::spawn(ThreadAttr::default(), move || {
                let _g = m2.lock().unwrap();
                o2.lock().unwrap().push("child");
            })
            .unwrap();

            order.lock().unwrap().push("parent-holds-lock");
            drop(guard);
            handle.join().unwrap();

            assert_eq!(*order.lock().unwrap(), vec!["parent-holds-lock", "child"]);
        });
    }
}
