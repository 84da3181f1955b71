//! Round-robin policy: a single FIFO queue (section 4.3.1).

use super::{SchedPolicy, DEFAULT_TIMESLICE_NS};
use crate::tcb::{Registry, ThreadId, WaitQueue};

pub struct RoundRobinPolicy {
    ready: WaitQueue,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        RoundRobinPolicy {
            ready: WaitQueue::new(),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for RoundRobinPolicy {
    fn enqueue(&mut self, registry: &mut Registry, tid: ThreadId) {
        if let Some(t) = registry.get_mut(tid) {
            t.timeslice_remaining = DEFAULT_TIMESLICE_NS;
        }
        self.ready.push_back(tid);
    }

    fn dequeue(&mut self, _registry: &mut Registry) -> Option<ThreadId> {
        self.ready.pop_front()
    }

    fn remove(&mut self, _registry: &mut Registry, tid: ThreadId) {
        self.ready.remove_specific(tid);
    }

    fn on_yield(&mut self, _registry: &mut Registry, _tid: ThreadId) {
        // Thread goes to the back of the queue via the next enqueue; no
        // per-policy bookkeeping needed.
    }

    fn on_tick(&mut self, registry: &mut Registry, tid: ThreadId, elapsed_ns: u64) {
        if let Some(t) = registry.get_mut(tid) {
            t.timeslice_remaining = t.timeslice_remaining.saturating_sub(elapsed_ns);
        }
    }

    fn should_preempt(&self, registry: &Registry, current: ThreadId) -> bool {
        let exhausted = registry
            .get(current)
            .map(|t| t.timeslice_remaining == 0)
            .unwrap_or(false);
        exhausted && !self.ready.is_empty()
    }

    fn update_priority(&mut self, _registry: &mut Registry, _tid: ThreadId) {
        // Round-robin has no priority concept.
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}
