//! The thread control block and its registry (section 3).

use std::any::Any;
use std::collections::VecDeque;

use crate::context::Context;
use crate::stack::Stack;
use crate::time::nice_to_weight;

/// Process-wide unique identifier for a user thread. Id 0 is reserved for
/// the idle thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub usize);

pub const IDLE_TID: ThreadId = ThreadId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Ready,
    Running,
    Blocked,
    Terminated,
    /// Exited but not yet reaped by a joiner (distinguished from
    /// `Terminated` only for observability; scheduling-wise both are "not
    /// runnable").
    Joinable,
}

pub const PRIORITY_MIN: i32 = 0;
pub const PRIORITY_MAX: i32 = 31;
pub const PRIORITY_DEFAULT: i32 = 16;
pub const PRIORITY_LEVELS: usize = 32;

pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 19;

/// A boxed, type-erased thread entry point. Captures the user closure and
/// returns its result boxed as `Any` so a homogeneous registry can hold
/// threads of differing return types; `JoinHandle<T>` downcasts on join.
pub type Entry = Box<dyn FnOnce() -> Box<dyn Any + Send> + Send>;

pub struct Tcb {
    pub id: ThreadId,
    pub name: Option<String>,

    pub context: Context,
    pub state: ThreadState,

    pub stack: Option<Stack>,

    pub entry: Option<Entry>,
    pub retval: Option<Box<dyn Any + Send>>,

    pub priority: i32,
    pub nice: i32,
    pub weight: u32,
    pub vruntime: u64,
    pub start_time: u64,
    pub total_runtime: u64,
    pub timeslice_remaining: u64,

    pub waiting_on: Option<ThreadId>,
    pub blocked_queue: bool,

    pub detached: bool,
    pub cancel_pending: bool,
    pub in_critical_section: bool,
    pub exited: bool,

    pub joiner: Option<ThreadId>,
}

impl Tcb {
    pub fn new_idle() -> Self {
        Tcb {
            id: IDLE_TID,
            name: Some("idle".to_string()),
            context: Context::uninit(),
            state: ThreadState::Ready,
            stack: None,
            entry: None,
            retval: None,
            priority: PRIORITY_DEFAULT,
            nice: 0,
            weight: nice_to_weight(0),
            vruntime: 0,
            start_time: 0,
            total_runtime: 0,
            timeslice_remaining: 0,
            waiting_on: None,
            blocked_queue: false,
            detached: true,
            cancel_pending: false,
            in_critical_section: false,
            exited: false,
            joiner: None,
        }
    }
}

/// Attributes used at thread creation (section 6).
#[derive(Debug, Clone)]
pub struct ThreadAttr {
    pub stack_size: usize,
    pub priority: i32,
    pub nice: i32,
    pub detached: bool,
    pub name: Option<String>,
}

impl Default for ThreadAttr {
    fn default() -> Self {
        ThreadAttr {
            stack_size: crate::stack::STACK_DEFAULT,
            priority: PRIORITY_DEFAULT,
            nice: 0,
            detached: false,
            name: None,
        }
    }
}

/// Fixed-capacity TCB registry. All live TCBs (including the idle and main
/// threads) are reachable only through this arena, addressed by `ThreadId`.
pub struct Registry {
    slots: Vec<Option<Tcb>>,
    next_tid: usize,
    live_count: usize,
    max_threads: usize,
}

impl Registry {
    pub fn new(max_threads: usize) -> Self {
        Registry {
            slots: Vec::new(),
            next_tid: 1,
            live_count: 0,
            max_threads,
        }
    }

    pub fn insert(&mut self, mut tcb: Tcb) -> crate::error::Result<ThreadId> {
        if tcb.id != IDLE_TID {
            if self.live_count >= self.max_threads {
                return Err(crate::error::Error::OutOfMemory);
            }
            let id = ThreadId(self.next_tid);
            self.next_tid += 1;
            tcb.id = id;
        }
        let idx = tcb.id.0;
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        self.live_count += 1;
        let id = tcb.id;
        self.slots[idx] = Some(tcb);
        Ok(id)
    }

    pub fn get(&self, id: ThreadId) -> Option<&Tcb> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, id: ThreadId) -> Option<Tcb> {
        let slot = self.slots.get_mut(id.0)?;
        let tcb = slot.take();
        if tcb.is_some() {
            self.live_count -= 1;
        }
        tcb
    }

    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn all_ids(&self) -> Vec<ThreadId> {
        self.slots
            .iter()
            .filter_map(|s| s.as_ref().map(|t| t.id))
            .collect()
    }
}

/// A FIFO of blocked `ThreadId`s (section 4.2). Run queues for the simpler
/// policies reuse this same structure.
#[derive(Default)]
pub struct WaitQueue {
    queue: VecDeque<ThreadId>,
}

impl WaitQueue {
    pub fn new() -> Self {
        WaitQueue {
            queue: VecDeque::new(),
        }
    }

    pub fn push_back(&mut self, tid: ThreadId) {
        self.queue.push_back(tid);
    }

    pub fn pop_front(&mut self) -> Option<ThreadId> {
        self.queue.pop_front()
    }

    pub fn remove_specific(&mut self, tid: ThreadId) -> bool {
        if let Some(pos) = self.queue.iter().position(|&t| t == tid) {
            self.queue.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.queue.iter().any(|&t| t == tid)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
