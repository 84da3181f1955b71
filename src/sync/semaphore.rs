//! Counting semaphore (section 4.9): an integer value plus a wait queue.

use std::cell::{Cell, RefCell};

use log::trace;

use crate::error::{Error, Result};
use crate::preempt;
use crate::scheduler;
use crate::tcb::WaitQueue;

pub struct Semaphore {
    value: Cell<i64>,
    waiters: RefCell<WaitQueue>,
}

// Single execution stream: every field is touched only with preemption
// disabled, never concurrently from two OS threads.
unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Semaphore {
            value: Cell::new(initial as i64),
            waiters: RefCell::new(WaitQueue::new()),
        }
    }

    /// Block while the value is non-positive, then decrement.
    pub fn wait(&self) {
        preempt::preemption_disable();
        while self.value.get() <= 0 {
            trace!(
                "thread {} blocking on semaphore",
                crate::runtime::current_tid().0
            );
            scheduler::block_on_preemptible(|tid| self.waiters.borrow_mut().push_back(tid));
        }
        self.value.set(self.value.get() - 1);
        preempt::preemption_enable();
    }

    /// Decrement without blocking if positive; otherwise `Err(WouldBlock)`.
    pub fn try_wait(&self) -> Result<()> {
        preempt::preemption_disable();
        let ok = self.value.get() > 0;
        if ok {
            self.value.set(self.value.get() - 1);
        }
        preempt::preemption_enable();
        if ok {
            Ok(())
        } else {
            Err(Error::WouldBlock)
        }
    }

    /// As `wait`, but gives up once `deadline_ns` (`crate::time::now_ns()`
    /// comparable) passes, polling at each cooperative yield per the
    /// timed-wait discipline shared with the condition variable.
    pub fn wait_timeout(&self, deadline_ns: u64) -> Result<()> {
        preempt::preemption_disable();
        if self.value.get() > 0 {
            self.value.set(self.value.get() - 1);
            preempt::preemption_enable();
            return Ok(());
        }
        let self_id = crate::runtime::current_tid();
        trace!("thread {} blocking on semaphore (timed)", self_id.0);
        self.waiters.borrow_mut().push_back(self_id);
        crate::runtime::with_runtime_mut(|rt| {
            if let Some(t) = rt.registry.get_mut(self_id) {
                t.state = crate::tcb::ThreadState::Blocked;
                t.blocked_queue = true;
            }
        });
        preempt::preemption_enable();

        loop {
            if crate::time::now_ns() >= deadline_ns {
                preempt::preemption_disable();
                let removed = self.waiters.borrow_mut().remove_specific(self_id);
                if removed {
                    crate::runtime::with_runtime_mut(|rt| {
                        if let Some(t) = rt.registry.get_mut(self_id) {
                            t.blocked_queue = false;
                        }
                    });
                }
                if !removed && self.value.get() > 0 {
                    // Woken by `post` just as the deadline passed: honor the
                    // wake rather than reporting a spurious timeout.
                    self.value.set(self.value.get() - 1);
                    preempt::preemption_enable();
                    return Ok(());
                }
                preempt::preemption_enable();
                return Err(Error::TimedOut);
            }

            preempt::preemption_disable();
            let still_queued = self.waiters.borrow().contains(self_id);
            preempt::preemption_enable();
            if !still_queued {
                break;
            }
            crate::runtime::yield_now();
        }

        preempt::preemption_disable();
        self.value.set(self.value.get() - 1);
        preempt::preemption_enable();
        Ok(())
    }

    /// Increment, waking one blocked waiter if any.
    pub fn post(&self) {
        preempt::preemption_disable();
        self.value.set(self.value.get() + 1);
        if !self.waiters.borrow().is_empty() {
            trace!("semaphore post waking a contended waiter");
        }
        scheduler::wake_one(&mut self.waiters.borrow_mut());
        preempt::preemption_enable();
    }

    pub fn value(&self) -> i64 {
        self.value.get()
    }
}
