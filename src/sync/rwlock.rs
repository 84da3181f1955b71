//! Writer-preferring read/write lock (section 4.10).

use std::cell::{Cell, RefCell};

use log::trace;

use crate::error::{Error, Result};
use crate::preempt;
use crate::runtime;
use crate::scheduler;
use crate::tcb::{ThreadId, WaitQueue};

pub struct RwLock {
    readers: Cell<u32>,
    writer: Cell<Option<ThreadId>>,
    pending_writers: Cell<u32>,
    reader_waiters: RefCell<WaitQueue>,
    writer_waiters: RefCell<WaitQueue>,
}

// Single execution stream: every field is touched only with preemption
// disabled, never concurrently from two OS threads.
unsafe impl Sync for RwLock {}
unsafe impl Send for RwLock {}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RwLock {
    pub fn new() -> Self {
        RwLock {
            readers: Cell::new(0),
            writer: Cell::new(None),
            pending_writers: Cell::new(0),
            reader_waiters: RefCell::new(WaitQueue::new()),
            writer_waiters: RefCell::new(WaitQueue::new()),
        }
    }

    fn reader_blocked(&self) -> bool {
        self.writer.get().is_some() || self.pending_writers.get() > 0
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_>> {
        preempt::preemption_disable();
        while self.reader_blocked() {
            trace!("thread {} blocking on rwlock read", runtime::current_tid().0);
            scheduler::block_on_preemptible(|tid| self.reader_waiters.borrow_mut().push_back(tid));
        }
        self.readers.set(self.readers.get() + 1);
        preempt::preemption_enable();
        Ok(RwLockReadGuard { lock: self })
    }

    pub fn try_read(&self) -> Result<RwLockReadGuard<'_>> {
        preempt::preemption_disable();
        if self.reader_blocked() {
            preempt::preemption_enable();
            return Err(Error::Busy);
        }
        self.readers.set(self.readers.get() + 1);
        preempt::preemption_enable();
        Ok(RwLockReadGuard { lock: self })
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_>> {
        preempt::preemption_disable();
        self.pending_writers.set(self.pending_writers.get() + 1);
        while self.readers.get() > 0 || self.writer.get().is_some() {
            trace!("thread {} blocking on rwlock write", runtime::current_tid().0);
            scheduler::block_on_preemptible(|tid| self.writer_waiters.borrow_mut().push_back(tid));
        }
        self.pending_writers.set(self.pending_writers.get() - 1);
        self.writer.set(Some(runtime::current_tid()));
        preempt::preemption_enable();
        Ok(RwLockWriteGuard { lock: self })
    }

    pub fn try_write(&self) -> Result<RwLockWriteGuard<'_>> {
        preempt::preemption_disable();
        if self.readers.get() > 0 || self.writer.get().is_some() {
            preempt::preemption_enable();
            return Err(Error::Busy);
        }
        self.writer.set(Some(runtime::current_tid()));
        preempt::preemption_enable();
        Ok(RwLockWriteGuard { lock: self })
    }

    fn unlock_read(&self) {
        preempt::preemption_disable();
        self.readers.set(self.readers.get() - 1);
        if self.readers.get() == 0 && self.pending_writers.get() > 0 {
            trace!("rwlock unlock waking a contended writer");
            scheduler::wake_one(&mut self.writer_waiters.borrow_mut());
        }
        preempt::preemption_enable();
    }

    fn unlock_write(&self) {
        preempt::preemption_disable();
        self.writer.set(None);
        if !self.writer_waiters.borrow().is_empty() {
            trace!("rwlock unlock waking a contended writer");
            scheduler::wake_one(&mut self.writer_waiters.borrow_mut());
        } else if !self.reader_waiters.borrow().is_empty() {
            trace!("rwlock unlock waking contended readers");
            scheduler::wake_all(&mut self.reader_waiters.borrow_mut());
        }
        preempt::preemption_enable();
    }

    /// `Err(Busy)` if any reader or writer currently holds the lock.
    pub fn try_destroy(&self) -> Result<()> {
        preempt::preemption_disable();
        let busy = self.readers.get() > 0 || self.writer.get().is_some();
        preempt::preemption_enable();
        if busy {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }
}

pub struct RwLockReadGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for RwLockReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_read();
    }
}

pub struct RwLockWriteGuard<'a> {
    lock: &'a RwLock,
}

impl Drop for RwLockWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_write();
    }
}
