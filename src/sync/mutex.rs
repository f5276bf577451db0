use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tracing::trace;

use super::Waiter;
use crate::{util::list::List, wake::Context, Computation, Error, Poll, PollResult};

/// An asynchronous mutual exclusion lock protecting shared data.
///
/// [`lock`](Self::lock) returns a computation that completes with a
/// [`MutexGuard`] once no other holder remains. The lock is fair: waiters
/// are granted in first-in, first-out order, and the guard's drop hands the
/// lock directly to the next queued waiter. There is no poisoning.
///
/// Cancelling a pending [`Lock`] removes its waiter from the queue; if the
/// lock had already been handed to that waiter, it is passed on to the next
/// one.
pub struct Mutex<T: ?Sized> {
    state: StdMutex<LockState>,
    data: UnsafeCell<T>,
}

struct LockState {
    locked: bool,
    waiters: List<Waiter>,
}

/// A computation acquiring a [`Mutex`]. Returned by [`Mutex::lock`].
#[must_use = "computations do nothing unless polled"]
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    waiter: Option<Arc<Waiter>>,
    done: bool,
    cancelled: bool,
}

/// Owned counterpart of [`Lock`], returned by [`Mutex::lock_owned`].
///
/// Holds an [`Arc`] clone of the mutex, so it is `'static` and can be
/// spawned on a scheduler.
#[must_use = "computations do nothing unless polled"]
pub struct LockOwned<T: ?Sized> {
    mutex: Arc<Mutex<T>>,
    waiter: Option<Arc<Waiter>>,
    done: bool,
    cancelled: bool,
}

/// Releases the [`Mutex`] on drop, waking the next waiter.
#[must_use = "if unused, the Mutex unlocks immediately"]
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
}

/// Owned counterpart of [`MutexGuard`], produced by [`LockOwned`].
#[must_use = "if unused, the Mutex unlocks immediately"]
pub struct OwnedMutexGuard<T: ?Sized> {
    mutex: Arc<Mutex<T>>,
}

unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

unsafe impl<T: ?Sized + Send> Send for MutexGuard<'_, T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for MutexGuard<'_, T> {}
unsafe impl<T: ?Sized + Send> Send for OwnedMutexGuard<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for OwnedMutexGuard<T> {}

// === impl Mutex ===

impl<T> Mutex<T> {
    /// Returns a new, unlocked `Mutex` protecting `data`.
    pub fn new(data: T) -> Self {
        Self {
            state: StdMutex::new(LockState {
                locked: false,
                waiters: List::new(),
            }),
            data: UnsafeCell::new(data),
        }
    }

    /// Consumes the mutex and returns the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Returns a computation that completes with the lock guard.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            waiter: None,
            done: false,
            cancelled: false,
        }
    }

    /// Acquires the lock without waiting, if it is free and nobody is
    /// queued ahead.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let mut state = self.state_lock();
        if !state.locked && state.waiters.is_empty() {
            state.locked = true;
            drop(state);
            Some(MutexGuard { mutex: self })
        } else {
            None
        }
    }

    /// Like [`lock`](Self::lock), but the produced guard owns an [`Arc`]
    /// clone of the mutex and is valid for `'static`.
    pub fn lock_owned(self: &Arc<Self>) -> LockOwned<T> {
        LockOwned {
            mutex: self.clone(),
            waiter: None,
            done: false,
            cancelled: false,
        }
    }

    fn state_lock(&self) -> StdMutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One poll of the acquire protocol: fast-path grab, or enqueue once and
    /// wait on the waiter cell.
    fn poll_acquire(
        &self,
        waiter: &mut Option<Arc<Waiter>>,
        cx: &mut Context<'_>,
    ) -> PollResult<()> {
        let queued = match waiter {
            Some(queued) => queued.clone(),
            None => {
                let mut state = self.state_lock();
                if !state.locked && state.waiters.is_empty() {
                    state.locked = true;
                    return Ok(Poll::Ready(()));
                }
                let queued = Waiter::new();
                state.waiters.push_back(queued.clone());
                drop(state);
                *waiter = Some(queued.clone());
                queued
            }
        };
        queued.cell().poll_value(cx)
    }

    fn cancel_acquire(&self, waiter: Option<Arc<Waiter>>) {
        let Some(waiter) = waiter else { return };
        let removed = { self.state_lock().waiters.remove(&waiter) };
        waiter.cell().cancel();
        if !removed && waiter.cell().try_read().is_some() {
            // The lock had already been handed to this waiter; release it
            // onward so the handoff is not lost.
            trace!("Mutex -> cancelled waiter re-releases the lock");
            self.unlock();
        }
    }

    /// Hands the lock to the next live waiter, or unlocks.
    fn unlock(&self) {
        loop {
            let next = {
                let mut state = self.state_lock();
                match state.waiters.pop_front() {
                    Some(next) => next,
                    None => {
                        state.locked = false;
                        return;
                    }
                }
            };
            // The lock stays held; ownership moves to the woken waiter.
            if next.cell().deliver(()) {
                return;
            }
        }
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => s.field("data", &&*guard),
            None => s.field("data", &format_args!("<locked>")),
        };
        s.finish()
    }
}

// === impl Lock ===

impl<'a, T: ?Sized> Computation for Lock<'a, T> {
    type Output = MutexGuard<'a, T>;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<MutexGuard<'a, T>> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        assert!(!self.done, "`Lock` polled again after producing its guard");
        match self.mutex.poll_acquire(&mut self.waiter, cx)? {
            Poll::Ready(()) => {
                self.done = true;
                self.waiter = None;
                Ok(Poll::Ready(MutexGuard { mutex: self.mutex }))
            }
            Poll::Pending => Ok(Poll::Pending),
        }
    }

    fn cancel(&mut self) {
        if self.done || self.cancelled {
            return;
        }
        self.cancelled = true;
        self.mutex.cancel_acquire(self.waiter.take());
    }
}

impl<T: ?Sized> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T: ?Sized> fmt::Debug for Lock<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("queued", &self.waiter.is_some())
            .finish_non_exhaustive()
    }
}

// === impl LockOwned ===

impl<T: ?Sized> Computation for LockOwned<T> {
    type Output = OwnedMutexGuard<T>;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<OwnedMutexGuard<T>> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        assert!(
            !self.done,
            "`LockOwned` polled again after producing its guard"
        );
        match self.mutex.poll_acquire(&mut self.waiter, cx)? {
            Poll::Ready(()) => {
                self.done = true;
                self.waiter = None;
                Ok(Poll::Ready(OwnedMutexGuard {
                    mutex: self.mutex.clone(),
                }))
            }
            Poll::Pending => Ok(Poll::Pending),
        }
    }

    fn cancel(&mut self) {
        if self.done || self.cancelled {
            return;
        }
        self.cancelled = true;
        self.mutex.cancel_acquire(self.waiter.take());
    }
}

impl<T: ?Sized> Drop for LockOwned<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T: ?Sized> fmt::Debug for LockOwned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockOwned")
            .field("queued", &self.waiter.is_some())
            .finish_non_exhaustive()
    }
}

// === impl MutexGuard ===

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe {
            // Safety: holding the guard means holding the lock.
            &*self.mutex.data.get()
        }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe {
            // Safety: holding the guard means holding the lock.
            &mut *self.mutex.data.get()
        }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

// === impl OwnedMutexGuard ===

impl<T: ?Sized> Deref for OwnedMutexGuard<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe {
            // Safety: holding the guard means holding the lock.
            &*self.mutex.data.get()
        }
    }
}

impl<T: ?Sized> DerefMut for OwnedMutexGuard<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe {
            // Safety: holding the guard means holding the lock.
            &mut *self.mutex.data.get()
        }
    }
}

impl<T: ?Sized> Drop for OwnedMutexGuard<T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for OwnedMutexGuard<T> {
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
    fn uncontended_lock_is_immediate() {
        let mutex = Mutex::new(1);
        let mut lock = mutex.lock();
        let guard = match poll_once(&mut lock).unwrap() {
            Poll::Ready(guard) => guard,
            Poll::Pending => panic!("uncontended lock should be ready"),
        };
        assert_eq!(*guard, 1);
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn handoff_is_fifo() {
        let mutex = Mutex::new(0u32);
        let guard = mutex.try_lock().expect("mutex is free");

        let mut second = mutex.lock();
        let mut third = mutex.lock();
        assert!(poll_once(&mut second).unwrap().is_pending());
        assert!(poll_once(&mut third).unwrap().is_pending());

        drop(guard);
        assert!(poll_once(&mut third).unwrap().is_pending());
        let g2 = poll_once(&mut second).unwrap();
        assert!(g2.is_ready());
        drop(g2);
        assert!(poll_once(&mut third).unwrap().is_ready());
    }

    #[test]
    fn cancelled_waiter_does_not_stall_the_queue() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().expect("mutex is free");

        let mut second = mutex.lock();
        let mut third = mutex.lock();
        assert!(poll_once(&mut second).unwrap().is_pending());
        assert!(poll_once(&mut third).unwrap().is_pending());

        second.cancel();
        drop(guard);
        assert!(poll_once(&mut third).unwrap().is_ready());
        assert!(poll_once(&mut second).unwrap_err().is_cancelled());
    }

    #[test]
    fn granted_then_cancelled_lock_is_passed_on() {
        let mutex = Mutex::new(());
        let guard = mutex.try_lock().expect("mutex is free");

        let mut second = mutex.lock();
        let mut third = mutex.lock();
        assert!(poll_once(&mut second).unwrap().is_pending());
        assert!(poll_once(&mut third).unwrap().is_pending());

        // The unlock hands the mutex to `second`; cancelling `second`
        // before it observes the grant must pass the lock to `third`.
        drop(guard);
        second.cancel();
        assert!(poll_once(&mut third).unwrap().is_ready());
    }
}
