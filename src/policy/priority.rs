//! Multi-level priority policy: 32 FIFO queues plus a non-empty bitmap
//! (section 4.3.2).

use super::{SchedPolicy, DEFAULT_TIMESLICE_NS};
use crate::tcb::{Registry, ThreadId, WaitQueue, PRIORITY_LEVELS};

pub struct PriorityPolicy {
    queues: [WaitQueue; PRIORITY_LEVELS],
    bitmap: u32,
}

impl PriorityPolicy {
    pub fn new() -> Self {
        PriorityPolicy {
            queues: core::array::from_fn(|_| WaitQueue::new()),
            bitmap: 0,
        }
    }

    fn clamp(priority: i32) -> usize {
        priority.clamp(0, PRIORITY_LEVELS as i32 - 1) as usize
    }

    fn highest_nonempty(&self) -> Option<usize> {
        if self.bitmap == 0 {
            return None;
        }
        Some(31 - self.bitmap.leading_zeros() as usize)
    }
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for PriorityPolicy {
    fn enqueue(&mut self, registry: &mut Registry, tid: ThreadId) {
        let level = registry
            .get(tid)
            .map(|t| Self::clamp(t.priority))
            .unwrap_or(0);
        if let Some(t) = registry.get_mut(tid) {
            t.timeslice_remaining = DEFAULT_TIMESLICE_NS;
        }
        self.queues[level].push_back(tid);
        self.bitmap |= 1 << level;
    }

    fn dequeue(&mut self, _registry: &mut Registry) -> Option<ThreadId> {
        let level = self.highest_nonempty()?;
        let tid = self.queues[level].pop_front();
        if self.queues[level].is_empty() {
            self.bitmap &= !(1 << level);
        }
        tid
    }

    fn remove(&mut self, registry: &mut Registry, tid: ThreadId) {
        let level = registry
            .get(tid)
            .map(|t| Self::clamp(t.priority))
            .unwrap_or(0);
        if self.queues[level].remove_specific(tid) {
            if self.queues[level].is_empty() {
                self.bitmap &= !(1 << level);
            }
            return;
        }
        // Thread may have been re-bucketed since it was last seen; fall
        // back to a full scan (mirrors the reference's priority_remove).
        for (i, q) in self.queues.iter_mut().enumerate() {
            if q.remove_specific(tid) {
                if q.is_empty() {
                    self.bitmap &= !(1 << i);
                }
                return;
            }
        }
    }

    fn on_yield(&mut self, _registry: &mut Registry, _tid: ThreadId) {}

    fn on_tick(&mut self, registry: &mut Registry, tid: ThreadId, elapsed_ns: u64) {
        if let Some(t) = registry.get_mut(tid) {
            t.timeslice_remaining = t.timeslice_remaining.saturating_sub(elapsed_ns);
        }
    }

    fn should_preempt(&self, registry: &Registry, current: ThreadId) -> bool {
        let Some(current_priority) = registry.get(current).map(|t| t.priority) else {
            return false;
        };
        if let Some(highest) = self.highest_nonempty()
            && highest as i32 > current_priority {
                return true;
            }
        let exhausted = registry
            .get(current)
            .map(|t| t.timeslice_remaining == 0)
            .unwrap_or(false);
        exhausted && !self.queues[Self::clamp(current_priority)].is_empty()
    }

    fn update_priority(&mut self, registry: &mut Registry, tid: ThreadId) {
        for (i, q) in self.queues.iter_mut().enumerate() {
            if q.remove_specific(tid) {
                if q.is_empty() {
                    self.bitmap &= !(1 << i);
                }
                self.enqueue(registry, tid);
                return;
            }
        }
    }

    fn name(&self) -> &'static str {
        "priority"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcb::Tcb;

    fn spawn_at(registry: &mut Registry, priority: i32) -> ThreadId {
        let mut tcb = Tcb::new_idle();
        tcb.id = ThreadId(usize::MAX);
        tcb.priority = priority;
        registry.insert(tcb).unwrap()
    }

    #[test]
    fn dequeues_highest_priority_first() {
        let mut registry = Registry::new(16);
        let mut policy = PriorityPolicy::new();
        let low = spawn_at(&mut registry, 5);
        let high = spawn_at(&mut registry, 30);
        policy.enqueue(&mut registry, low);
        policy.enqueue(&mut registry, high);
        assert_eq!(policy.dequeue(&mut registry), Some(high));
        assert_eq!(policy.dequeue(&mut registry), Some(low));
    }

    #[test]
    fn fifo_within_same_level() {
        let mut registry = Registry::new(16);
        let mut policy = PriorityPolicy::new();
        let a = spawn_at(&mut registry, 10);
        let b = spawn_at(&mut registry, 10);
        policy.enqueue(&mut registry, a);
        policy.enqueue(&mut registry, b);
        assert_eq!(policy.dequeue(&mut registry), Some(a));
        assert_eq!(policy.dequeue(&mut registry), Some(b));
    }
}
