//! Synchronization primitives built over [`OnceVar`](crate::OnceVar) cells
//! and an intrusive waiter list.
//!
//! Each primitive keeps its bookkeeping and a FIFO
//! [`List`](crate::util::list::List) of waiters under one lightweight lock.
//! A waiter is an [`OnceVar<()>`](crate::OnceVar) the waiting computation
//! polls; signalling a waiter means delivering `()` into its cell. Delivery
//! happens after the primitive's lock has been dropped, so wakers never fire
//! inside the critical section.
//!
//! Cancellation never loses a signal: a cancelled waiter removes itself from
//! the list under the primitive's lock, and a signal that had already been
//! claimed for a waiter that then cancelled is passed to the next waiter.

mod barrier;
mod mutex;
mod notify;
mod rwlock;
mod semaphore;

pub use self::{
    barrier::{Barrier, BarrierWait, BarrierWaitResult},
    mutex::{Lock, LockOwned, Mutex, MutexGuard, OwnedMutexGuard},
    notify::{Notified, Notify},
    rwlock::{Read, RwLock, RwLockReadGuard, RwLockWriteGuard, Write},
    semaphore::{Acquire, Permit, Semaphore},
};

use std::sync::Arc;

use crate::{
    once_var::OnceVar,
    util::list::{Link, Linked},
};

/// One queued waiter: the cell its computation polls, plus the embedded
/// list link.
pub(crate) struct Waiter {
    cell: OnceVar<()>,
    link: Link<Waiter>,
}

impl Waiter {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            cell: OnceVar::new(),
            link: Link::new(),
        })
    }

    pub(crate) fn cell(&self) -> &OnceVar<()> {
        &self.cell
    }
}

impl Linked for Waiter {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}
