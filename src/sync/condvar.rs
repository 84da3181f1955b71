//! Condition variable (section 4.8): wait queue plus a signal sequence
//! counter. Spurious wakeups are permitted; callers re-check their
//! predicate, matching the reference implementation's `cond_wait`.

use std::cell::{Cell, RefCell};

use log::trace;

use crate::error::Result;
use crate::preempt;
use crate::runtime;
use crate::scheduler;
use crate::sync::mutex::MutexGuard;
use crate::tcb::{ThreadState, WaitQueue};

pub struct Condvar {
    waiters: RefCell<WaitQueue>,
    signal_seq: Cell<u64>,
}

unsafe impl Sync for Condvar {}
unsafe impl Send for Condvar {}

impl Default for Condvar {
    fn default() -> Self {
        Self::new()
    }
}

impl Condvar {
    pub fn new() -> Self {
        Condvar {
            waiters: RefCell::new(WaitQueue::new()),
            signal_seq: Cell::new(0),
        }
    }

    /// Atomically release `guard`'s mutex and block until woken, then
    /// reacquire the mutex before returning.
    pub fn wait<'a>(&self, guard: MutexGuard<'a>) -> Result<MutexGuard<'a>> {
        preempt::preemption_disable();
        let self_id = runtime::current_tid();
        trace!("thread {} waiting on condvar", self_id.0);

        runtime::with_runtime_mut(|rt| {
            if let Some(t) = rt.registry.get_mut(self_id) {
                t.state = ThreadState::Blocked;
                t.blocked_queue = true;
            }
        });

        let mutex = guard.release();
        mutex.release_for_condvar(self_id, &mut self.waiters.borrow_mut());

        preempt::preemption_enable();
        scheduler::schedule();
        preempt::preemption_disable();

        mutex.reacquire_for_condvar();
        preempt::preemption_enable();

        Ok(MutexGuard::new(mutex))
    }

    /// As `wait`, but gives up and returns `(guard, true)` once `deadline_ns`
    /// (a `crate::time::now_ns()`-comparable monotonic timestamp) passes.
    /// Detected at resume boundaries — a timed wait with no concurrent
    /// `signal`/`broadcast` is checked once per cooperative yield, per the
    /// polling model described in section 5.
    pub fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a>,
        deadline_ns: u64,
    ) -> Result<(MutexGuard<'a>, bool)> {
        preempt::preemption_disable();
        let self_id = runtime::current_tid();
        trace!("thread {} waiting on condvar (timed)", self_id.0);

        runtime::with_runtime_mut(|rt| {
            if let Some(t) = rt.registry.get_mut(self_id) {
                t.state = ThreadState::Blocked;
                t.blocked_queue = true;
            }
        });

        let mutex = guard.release();
        mutex.release_for_condvar(self_id, &mut self.waiters.borrow_mut());
        preempt::preemption_enable();

        let mut timed_out = false;
        loop {
            if crate::time::now_ns() >= deadline_ns {
                preempt::preemption_disable();
                self.waiters.borrow_mut().remove_specific(self_id);
                runtime::with_runtime_mut(|rt| {
                    if let Some(t) = rt.registry.get_mut(self_id) {
                        t.blocked_queue = false;
                    }
                });
                preempt::preemption_enable();
                timed_out = true;
                break;
            }

            preempt::preemption_disable();
            let still_queued = self.waiters.borrow().contains(self_id);
            preempt::preemption_enable();
            if !still_queued {
                break;
            }

            runtime::yield_now();
        }

        preempt::preemption_disable();
        mutex.reacquire_for_condvar();
        preempt::preemption_enable();

        Ok((MutexGuard::new(mutex), timed_out))
    }

    pub fn signal(&self) {
        preempt::preemption_disable();
        self.signal_seq.set(self.signal_seq.get() + 1);
        if !self.waiters.borrow().is_empty() {
            trace!("condvar signal waking a contended waiter");
        }
        scheduler::wake_one(&mut self.waiters.borrow_mut());
        preempt::preemption_enable();
    }

    pub fn broadcast(&self) {
        preempt::preemption_disable();
        self.signal_seq.set(self.signal_seq.get() + 1);
        if !self.waiters.borrow().is_empty() {
            trace!(
                "condvar broadcast waking {} contended waiters",
                self.waiters.borrow().len()
            );
        }
        scheduler::wake_all(&mut self.waiters.borrow_mut());
        preempt::preemption_enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{self, RuntimeConfig};
    use crate::sync::mutex::{Mutex, MutexKind};
    use crate::tcb::ThreadAttr;
    use std::sync::Arc;

    fn with_runtime<T>(f: impl FnOnce() -> T) -> T {
        runtime::init(RuntimeConfig::default()).unwrap();
        let result = f();
        runtime::shutdown();
        result
    }

    #[test]
    fn signal_wakes_a_single_waiter() {
        with_runtime(|| {
            let mutex = Arc::new(Mutex::new(MutexKind::Normal));
            let cv = Arc::new(Condvar::new());
            let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));

            let m2 = mutex.clone();
            let c2 = cv.clone();
            let r2 = ready.clone();
            let handle = runtime::spawn(ThreadAttr::default(), move || {
                let guard = m2.lock().unwrap();
                let guard = c2.wait(guard).unwrap();
                r2.store(true, std::sync::atomic::Ordering::SeqCst);
                drop(guard);
            })
            .unwrap();

            // Let the waiter reach `wait` and park.
            runtime::yield_now();
            runtime::yield_now();

            cv.signal();
            handle.join().unwrap();

            assert!(ready.load(std::sync::atomic::Ordering::SeqCst));
        });
    }

    #[test]
    fn wait_timeout_woken_by_signal_is_scheduled_only_once() {
        // A `signal` racing the deadline must not leave the waiter's
        // `ThreadId` duplicated in the run queue; a regression here used to
        // risk a corrupted resume on the next `schedule()`.
        with_runtime(|| {
            let mutex = Arc::new(Mutex::new(MutexKind::Normal));
            let cv = Arc::new(Condvar::new());

            let m2 = mutex.clone();
            let c2 = cv.clone();
            let handle = runtime::spawn(ThreadAttr::default(), move || {
                let guard = m2.lock().unwrap();
                let deadline = crate::time::now_ns() + 50_000_000;
                let (guard, timed_out) = c2.wait_timeout(guard, deadline).unwrap();
                drop(guard);
                timed_out
            })
            .unwrap();

            for _ in 0..50 {
                runtime::yield_now();
            }
            cv.signal();

            assert!(!handle.join().unwrap());
        });
    }

    #[test]
    fn wait_timeout_times_out_and_leaves_queue_usable() {
        with_runtime(|| {
            let mutex = Arc::new(Mutex::new(MutexKind::Normal));
            let cv = Arc::new(Condvar::new());

            let guard = mutex.lock().unwrap();
            let deadline = crate::time::now_ns();
            let (guard, timed_out) = cv.wait_timeout(guard, deadline).unwrap();
            assert!(timed_out);
            drop(guard);

            let m2 = mutex.clone();
            let c2 = cv.clone();
            let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let r2 = ready.clone();
            let handle = runtime::spawn(ThreadAttr::default(), move || {
                let guard = m2.lock().unwrap();
                let guard = c2.wait(guard).unwrap();
                r2.store(true, std::sync::atomic::Ordering::SeqCst);
                drop(guard);
            })
            .unwrap();

            runtime::yield_now();
            runtime::yield_now();
            cv.signal();
            handle.join().unwrap();

            assert!(ready.load(std::sync::atomic::Ordering::SeqCst));
        });
    }
}
