//! A user-space cooperative/preemptive threading runtime: many "user
//! threads" multiplexed onto a single OS execution context, with their own
//! stacks and machine contexts, three pluggable scheduling policies, and
//! blocking synchronization primitives built on run/wait queues.
//!
//! See `DESIGN.md` for the grounding of each module and the open-question
//! decisions recorded while adapting this from its reference kernel.

pub mod context;
pub mod error;
pub mod policy;
pub mod preempt;
pub mod runtime;
pub mod scheduler;
pub mod stack;
pub mod sync;
pub mod tcb;
pub mod time;

pub use error::{Error, Result};
pub use policy::SchedPolicyKind;
pub use runtime::{
    current, equal, exit, init, nice, policy_kind, policy_name, priority, reset_stats, set_nice,
    set_preemption, set_priority, set_timeslice, shutdown, sleep, spawn, stats, tid, timeslice,
    yield_now, JoinHandle, RuntimeConfig, Stats,
};
pub use sync::{Condvar, Mutex, MutexGuard, MutexKind, RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore};
pub use tcb::{ThreadAttr, ThreadId};
