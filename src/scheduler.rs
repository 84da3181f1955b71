//! Scheduler core: dequeue/switch/reschedule mechanism shared by every
//! policy (section 4.4).

use log::{debug, trace};

use crate::context::Context;
use crate::tcb::{ThreadId, ThreadState, WaitQueue, IDLE_TID};

/// Pick the next ready thread and switch to it. No-op if the policy hands
/// back the thread already running.
///
/// The runtime borrow is dropped before the raw context switch happens
/// below: a `swapcontext` call does not "return" until some other thread
/// switches back to this one, which may be long after this stack frame's
/// caller would otherwise have moved on. Holding a `RefCell` guard across
/// that gap would deadlock the next thread's own call into the same
/// thread-local. Extracting raw context pointers first and switching after
/// the borrow ends keeps the borrow scoped to bookkeeping only.
pub fn schedule() {
    let switch = crate::runtime::with_runtime_mut(|rt| {
        rt.stats.scheduler_invocations += 1;
        rt.in_scheduler = true;

        let next = rt
            .policy
            .dequeue(&mut rt.registry)
            .unwrap_or(IDLE_TID);

        if next == rt.current {
            rt.in_scheduler = false;
            return None;
        }

        let now = crate::time::now_ns();
        let current = rt.current;

        if let Some(cur) = rt.registry.get_mut(current) {
            if cur.state == ThreadState::Running {
                cur.state = ThreadState::Ready;
            }
            if cur.start_time > 0 {
                cur.total_runtime += now.saturating_sub(cur.start_time);
            }
        }

        if let Some(nxt) = rt.registry.get_mut(next) {
            nxt.state = ThreadState::Running;
            nxt.start_time = now;
        }

        rt.current = next;
        rt.stats.context_switches += 1;
        rt.in_scheduler = false;

        // SAFETY: `current` and `next` are distinct live slots in the same
        // registry; no other code mutates the registry between here and
        // the dereference below.
        let from_ptr: *mut Context = &mut rt
            .registry
            .get_mut(current)
            .expect("current thread must be registered")
            .context;
        let to_ptr: *const Context = &rt
            .registry
            .get(next)
            .expect("next thread must be registered")
            .context;

        Some((from_ptr, to_ptr, current, next))
    });

    if let Some((from_ptr, to_ptr, from_id, to_id)) = switch {
        trace!("context switch: thread {} -> thread {}", from_id.0, to_id.0);
        // SAFETY: both pointers were derived from live registry slots and
        // point into contexts whose owning TCBs outlive this call.
        unsafe {
            Context::swap(&mut *from_ptr, &*to_ptr);
        }
    }
}

/// Voluntarily give up the CPU. No-op for the idle thread.
pub fn yield_now() {
    let current = crate::runtime::current_tid();
    if current == IDLE_TID {
        return;
    }
    crate::runtime::with_runtime_mut(|rt| {
        rt.policy.on_yield(&mut rt.registry, current);
        if let Some(t) = rt.registry.get_mut(current) {
            t.state = ThreadState::Ready;
        }
        rt.policy.enqueue(&mut rt.registry, current);
    });
    schedule();
}

/// Mark the current thread blocked, append it to `wq`, and schedule away.
/// Returns once some other thread wakes this one via `unblock`.
pub fn block_on(wq: &mut WaitQueue) {
    let current = crate::runtime::current_tid();
    crate::runtime::with_runtime_mut(|rt| {
        if let Some(t) = rt.registry.get_mut(current) {
            t.state = ThreadState::Blocked;
            t.blocked_queue = true;
        }
    });
    wq.push_back(current);
    schedule();
}

/// Block the current thread the way the synchronization primitives need:
/// `enqueue` records it on the primitive's own wait queue under a
/// short-lived borrow that ends before the switch, preemption is released
/// so other threads keep ticking while this one is parked, and re-acquired
/// once some other thread hands control back. Must be called with
/// preemption already disabled by the caller (mirrors the reference
/// implementation's "release preemption, schedule, re-disable" pattern in
/// `mutex.c`/`condvar.c`/`semaphore.c`/`rwlock.c`).
pub fn block_on_preemptible<F: FnOnce(ThreadId)>(enqueue: F) {
    let current = crate::runtime::current_tid();
    crate::runtime::with_runtime_mut(|rt| {
        if let Some(t) = rt.registry.get_mut(current) {
            t.state = ThreadState::Blocked;
            t.blocked_queue = true;
        }
    });
    enqueue(current);
    crate::preempt::preemption_enable();
    schedule();
    crate::preempt::preemption_disable();
}

/// Transition a blocked thread back to ready and hand it to the policy.
///
/// A no-op when `tid` is not currently `Blocked`: a polling timed-wait
/// (`Condvar::wait_timeout`, `Semaphore::wait_timeout`) cycles its own state
/// back to `Ready` and re-enqueues itself on every `yield_now()` while still
/// registered on the primitive's wait queue, so by the time `signal`/`post`
/// pops it and calls `unblock` here it may already be sitting in the run
/// queue under its own steam. Enqueuing it again would duplicate that
/// `ThreadId` in the policy's run queue.
pub fn unblock(tid: ThreadId) {
    crate::runtime::with_runtime_mut(|rt| {
        let Some(t) = rt.registry.get_mut(tid) else {
            return;
        };
        if t.state != ThreadState::Blocked {
            return;
        }
        t.state = ThreadState::Ready;
        t.blocked_queue = false;
        rt.policy.enqueue(&mut rt.registry, tid);
    });
}

/// Wake the head of a wait queue, if any (section 4.2).
pub fn wake_one(wq: &mut WaitQueue) {
    if let Some(tid) = wq.pop_front() {
        unblock(tid);
    }
}

/// Wake every thread currently in a wait queue.
pub fn wake_all(wq: &mut WaitQueue) {
    while let Some(tid) = wq.pop_front() {
        unblock(tid);
    }
}

/// Invoked from the timer signal handler (directly, or deferred through
/// `preemption_enable`) when it is safe to do so.
pub fn tick() {
    let should_preempt = crate::runtime::with_runtime_mut(|rt| {
        rt.stats.scheduler_ticks += 1;
        let current = rt.current;
        if current == IDLE_TID {
            return false;
        }

        let now = crate::time::now_ns();
        let elapsed = rt
            .registry
            .get(current)
            .map(|t| now.saturating_sub(t.start_time))
            .unwrap_or(0);

        rt.policy.on_tick(&mut rt.registry, current, elapsed);

        if rt.preemption_enabled && rt.policy.should_preempt(&rt.registry, current) {
            if let Some(t) = rt.registry.get_mut(current) {
                t.state = ThreadState::Ready;
            }
            rt.policy.enqueue(&mut rt.registry, current);
            true
        } else {
            false
        }
    });

    if should_preempt {
        debug!("preemption tick requeued thread {}", crate::runtime::current_tid().0);
        schedule();
    }
}
