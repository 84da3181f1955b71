//! Blocking synchronization primitives built on the scheduler's wait
//! queues (sections 4.7-4.10).

pub mod condvar;
pub mod mutex;
pub mod rwlock;
pub mod semaphore;

pub use condvar::Condvar;
pub use mutex::{Mutex, MutexGuard, MutexKind};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use semaphore::Semaphore;
