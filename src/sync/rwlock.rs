use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tracing::trace;

use super::Waiter;
use crate::{util::list::List, wake::Context, Computation, Error, Poll, PollResult};

/// An asynchronous reader-writer lock.
///
/// Any number of readers may hold the lock simultaneously; a writer holds it
/// exclusively. Writers have priority once the current reader batch drains:
/// while a writer is queued, newly arriving readers queue behind it rather
/// than joining the running batch, so writers cannot be starved.
///
/// Cancellation follows the mutex rules: a cancelled waiter leaves its
/// queue, and a grant that had already been handed to a cancelled waiter is
/// re-routed.
pub struct RwLock<T: ?Sized> {
    state: StdMutex<RwState>,
    data: UnsafeCell<T>,
}

struct RwState {
    readers: usize,
    writer: bool,
    read_waiters: List<Waiter>,
    write_waiters: List<Waiter>,
}

/// A computation acquiring shared access. Returned by [`RwLock::read`].
#[must_use = "computations do nothing unless polled"]
pub struct Read<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
    waiter: Option<Arc<Waiter>>,
    done: bool,
    cancelled: bool,
}

/// A computation acquiring exclusive access. Returned by [`RwLock::write`].
#[must_use = "computations do nothing unless polled"]
pub struct Write<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
    waiter: Option<Arc<Waiter>>,
    done: bool,
    cancelled: bool,
}

/// Shared access to the data; releases on drop.
#[must_use = "if unused, the read lock releases immediately"]
pub struct RwLockReadGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

/// Exclusive access to the data; releases on drop.
#[must_use = "if unused, the write lock releases immediately"]
pub struct RwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a RwLock<T>,
}

unsafe impl<T: ?Sized + Send> Send for RwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLock<T> {}

unsafe impl<T: ?Sized + Sync> Sync for RwLockReadGuard<'_, T> {}
unsafe impl<T: ?Sized + Send> Send for RwLockWriteGuard<'_, T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for RwLockWriteGuard<'_, T> {}

enum Grant {
    Writer(Arc<Waiter>),
    Readers(Vec<Arc<Waiter>>),
}

// === impl RwLock ===

impl<T> RwLock<T> {
    /// Returns a new, unlocked `RwLock` protecting `data`.
    pub fn new(data: T) -> Self {
        Self {
            state: StdMutex::new(RwState {
                readers: 0,
                writer: false,
                read_waiters: List::new(),
                write_waiters: List::new(),
            }),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the lock and returns the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> RwLock<T> {
    /// Returns a computation that completes with shared access.
    pub fn read(&self) -> Read<'_, T> {
        Read {
            lock: self,
            waiter: None,
            done: false,
            cancelled: false,
        }
    }

    /// Returns a computation that completes with exclusive access.
    pub fn write(&self) -> Write<'_, T> {
        Write {
            lock: self,
            waiter: None,
            done: false,
            cancelled: false,
        }
    }

    /// Acquires shared access without waiting, if no writer holds or awaits
    /// the lock.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, T>> {
        let mut state = self.state_lock();
        if !state.writer && state.write_waiters.is_empty() {
            state.readers += 1;
            drop(state);
            Some(RwLockReadGuard { lock: self })
        } else {
            None
        }
    }

    /// Acquires exclusive access without waiting, if the lock is idle.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, T>> {
        let mut state = self.state_lock();
        if !state.writer && state.readers == 0 && state.write_waiters.is_empty() {
            state.writer = true;
            drop(state);
            Some(RwLockWriteGuard { lock: self })
        } else {
            None
        }
    }

    fn state_lock(&self) -> StdMutexGuard<'_, RwState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_read(&self, waiter: &mut Option<Arc<Waiter>>, cx: &mut Context<'_>) -> PollResult<()> {
        let queued = match waiter {
            Some(queued) => queued.clone(),
            None => {
                let mut state = self.state_lock();
                if !state.writer && state.write_waiters.is_empty() {
                    state.readers += 1;
                    return Ok(Poll::Ready(()));
                }
                let queued = Waiter::new();
                state.read_waiters.push_back(queued.clone());
                drop(state);
                *waiter = Some(queued.clone());
                queued
            }
        };
        queued.cell().poll_value(cx)
    }

    fn poll_write(&self, waiter: &mut Option<Arc<Waiter>>, cx: &mut Context<'_>) -> PollResult<()> {
        let queued = match waiter {
            Some(queued) => queued.clone(),
            None => {
                let mut state = self.state_lock();
                if !state.writer && state.readers == 0 && state.write_waiters.is_empty() {
                    state.writer = true;
                    return Ok(Poll::Ready(()));
                }
                let queued = Waiter::new();
                state.write_waiters.push_back(queued.clone());
                drop(state);
                *waiter = Some(queued.clone());
                queued
            }
        };
        queued.cell().poll_value(cx)
    }

    fn cancel_read(&self, waiter: Option<Arc<Waiter>>) {
        let Some(waiter) = waiter else { return };
        let removed = { self.state_lock().read_waiters.remove(&waiter) };
        waiter.cell().cancel();
        if !removed && waiter.cell().try_read().is_some() {
            self.release_read();
        }
    }

    fn cancel_write(&self, waiter: Option<Arc<Waiter>>) {
        let Some(waiter) = waiter else { return };
        let removed = { self.state_lock().write_waiters.remove(&waiter) };
        waiter.cell().cancel();
        if !removed && waiter.cell().try_read().is_some() {
            self.release_write();
        } else if removed {
            // Retiring a queued writer may make the reader queue admissible
            // right away.
            self.rebalance();
        }
    }

    fn release_read(&self) {
        {
            let mut state = self.state_lock();
            state.readers -= 1;
        }
        self.rebalance();
    }

    fn release_write(&self) {
        {
            let mut state = self.state_lock();
            state.writer = false;
        }
        self.rebalance();
    }

    /// Grants the lock to whoever is entitled to it next: a queued writer
    /// once the reader batch drains, otherwise the whole queue of readers.
    fn rebalance(&self) {
        loop {
            let grant = {
                let mut state = self.state_lock();
                if state.writer {
                    None
                } else if state.readers == 0 && !state.write_waiters.is_empty() {
                    let next = state
                        .write_waiters
                        .pop_front()
                        .expect("the writer queue is non-empty");
                    state.writer = true;
                    Some(Grant::Writer(next))
                } else if state.write_waiters.is_empty() && !state.read_waiters.is_empty() {
                    let batch = state.read_waiters.drain();
                    state.readers += batch.len();
                    Some(Grant::Readers(batch))
                } else {
                    None
                }
            };

            match grant {
                None => return,
                Some(Grant::Writer(next)) => {
                    if next.cell().deliver(()) {
                        trace!("RwLock -> granted writer");
                        return;
                    }
                    // The writer cancelled in the meantime; retract and
                    // retry.
                    self.state_lock().writer = false;
                }
                Some(Grant::Readers(batch)) => {
                    let mut refused = 0;
                    for reader in batch {
                        if !reader.cell().deliver(()) {
                            refused += 1;
                        }
                    }
                    if refused == 0 {
                        return;
                    }
                    let mut state = self.state_lock();
                    state.readers -= refused;
                    if state.readers > 0 {
                        return;
                    }
                    // Every granted reader had cancelled; a writer may now
                    // be admissible.
                }
            }
        }
    }
}

impl<T: Default> Default for RwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RwLock");
        match self.try_read() {
            Some(guard) => s.field("data", &&*guard),
            None => s.field("data", &format_args!("<locked>")),
        };
        s.finish()
    }
}

// === impl Read / Write ===

impl<'a, T: ?Sized> Computation for Read<'a, T> {
    type Output = RwLockReadGuard<'a, T>;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<RwLockReadGuard<'a, T>> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        assert!(!self.done, "`Read` polled again after producing its guard");
        match self.lock.poll_read(&mut self.waiter, cx)? {
            Poll::Ready(()) => {
                self.done = true;
                self.waiter = None;
                Ok(Poll::Ready(RwLockReadGuard { lock: self.lock }))
            }
            Poll::Pending => Ok(Poll::Pending),
        }
    }

    fn cancel(&mut self) {
        if self.done || self.cancelled {
            return;
        }
        self.cancelled = true;
        self.lock.cancel_read(self.waiter.take());
    }
}

impl<T: ?Sized> Drop for Read<'_, T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T: ?Sized> fmt::Debug for Read<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Read")
            .field("queued", &self.waiter.is_some())
            .finish_non_exhaustive()
    }
}

impl<'a, T: ?Sized> Computation for Write<'a, T> {
    type Output = RwLockWriteGuard<'a, T>;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<RwLockWriteGuard<'a, T>> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        assert!(!self.done, "`Write` polled again after producing its guard");
        match self.lock.poll_write(&mut self.waiter, cx)? {
            Poll::Ready(()) => {
                self.done = true;
                self.waiter = None;
                Ok(Poll::Ready(RwLockWriteGuard { lock: self.lock }))
            }
            Poll::Pending => Ok(Poll::Pending),
        }
    }

    fn cancel(&mut self) {
        if self.done || self.cancelled {
            return;
        }
        self.cancelled = true;
        self.lock.cancel_write(self.waiter.take());
    }
}

impl<T: ?Sized> Drop for Write<'_, T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T: ?Sized> fmt::Debug for Write<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Write")
            .field("queued", &self.waiter.is_some())
            .finish_non_exhaustive()
    }
}

// === impl guards ===

impl<T: ?Sized> Deref for RwLockReadGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe {
            // Safety: shared access is held while the guard lives.
            &*self.lock.data.get()
        }
    }
}

impl<T: ?Sized> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockReadGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

impl<T: ?Sized> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe {
            // Safety: exclusive access is held while the guard lives.
            &*self.lock.data.get()
        }
    }
}

impl<T: ?Sized> DerefMut for RwLockWriteGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe {
            // Safety: exclusive access is held while the guard lives.
            &mut *self.lock.data.get()
        }
    }
}

impl<T: ?Sized> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for RwLockWriteGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::Waker;

    fn poll_once<C: Computation>(computation: &mut C) -> PollResult<C::Output> {
        let waker = Waker::noop();
        let mut cx = Context::new(&waker);
        computation.poll(&mut cx)
    }

    #[test]
    fn readers_share() {
        let lock = RwLock::new(7);
        let a = lock.try_read().expect("first reader");
        let b = lock.try_read().expect("second reader");
        assert_eq!(*a + *b, 14);
        assert!(lock.try_write().is_none());
        drop((a, b));
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn queued_writer_blocks_new_readers() {
        let lock = RwLock::new(0u32);
        let reader = lock.try_read().expect("lock is idle");

        let mut writer = lock.write();
        assert!(poll_once(&mut writer).unwrap().is_pending());

        // A reader arriving behind the queued writer must wait.
        let mut late_reader = lock.read();
        assert!(poll_once(&mut late_reader).unwrap().is_pending());
        assert!(lock.try_read().is_none());

        drop(reader);
        let write_guard = match poll_once(&mut writer).unwrap() {
            Poll::Ready(guard) => guard,
            Poll::Pending => panic!("writer should be granted once readers drain"),
        };
        assert!(poll_once(&mut late_reader).unwrap().is_pending());

        drop(write_guard);
        assert!(poll_once(&mut late_reader).unwrap().is_ready());
    }

    #[test]
    fn write_then_read_batch() {
        let lock = RwLock::new(1u32);
        let mut writer = lock.write();
        let mut guard = match poll_once(&mut writer).unwrap() {
            Poll::Ready(guard) => guard,
            Poll::Pending => panic!("idle lock grants a writer immediately"),
        };
        *guard += 1;

        let mut readers: Vec<_> = (0..3).map(|_| lock.read()).collect();
        for read in &mut readers {
            assert!(poll_once(read).unwrap().is_pending());
        }

        drop(guard);
        for read in &mut readers {
            match poll_once(read).unwrap() {
                Poll::Ready(guard) => assert_eq!(*guard, 2),
                Poll::Pending => panic!("the whole reader batch is admitted together"),
            }
        }
    }

    #[test]
    fn cancelled_writer_unblocks_readers() {
        let lock = RwLock::new(());
        let reader = lock.try_read().expect("lock is idle");

        let mut writer = lock.write();
        assert!(poll_once(&mut writer).unwrap().is_pending());
        let mut late_reader = lock.read();
        assert!(poll_once(&mut late_reader).unwrap().is_pending());

        writer.cancel();
        drop(reader);
        assert!(poll_once(&mut late_reader).unwrap().is_ready());
    }
}
