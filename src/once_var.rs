//! A single-assignment asynchronous cell.

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::{
    computation::{Computation, Future},
    wake::{Context, Waker},
    Error, Poll, PollResult,
};

/// A single-assignment asynchronous cell, the crate's minimal rendezvous
/// primitive.
///
/// One side [writes](Self::write) a value exactly once; the other side polls
/// the cell as a [`Computation`] and completes when the value arrives.
/// Handles are cheap clones of the same shared cell.
///
/// A `OnceVar` is *single-consumer by construction*: it stores at most one
/// waiting [`Waker`], and a later registration replaces the earlier one. Two
/// computations polling the same cell concurrently will steal each other's
/// wake-ups.
///
/// # States
///
/// The cell moves through five states under a lightweight lock: empty,
/// waiting (a waker is registered), filled, cancelled, and cancelled with a
/// value. Writing wakes a registered waiter; the waker is invoked exactly
/// once, after the cell's lock is released. Cancelling an empty or waiting
/// cell makes later polls raise [`Error::cancelled`]; cancelling a filled
/// cell preserves the value for readers that already raced ahead.
///
/// # Examples
///
/// ```
/// use enoki::{block_on, OnceVar};
///
/// let cell = OnceVar::new();
/// let writer = cell.clone();
///
/// let handle = std::thread::spawn(move || {
///     writer.write(7).unwrap();
/// });
///
/// assert_eq!(block_on(cell.clone()).unwrap(), 7);
/// handle.join().unwrap();
/// assert!(cell.try_write(9).is_err());
/// ```
pub struct OnceVar<T> {
    inner: Arc<Mutex<State<T>>>,
}

enum State<T> {
    Empty,
    Waiting(Waker),
    HasValue(T),
    Cancelled,
    CancelledWithValue(T),
}

// === impl OnceVar ===

impl<T> OnceVar<T> {
    /// Returns a new, empty cell.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(State::Empty)),
        }
    }

    /// Writes `value` into the cell if no value was written before.
    ///
    /// A registered waiter is woken. Writing into a cancelled cell succeeds
    /// (the value is preserved for readers that already observed it), but no
    /// new waiter will receive it.
    ///
    /// # Errors
    ///
    /// Returns `value` back if the cell already holds one.
    pub fn try_write(&self, value: T) -> Result<(), T> {
        let waiter = {
            let mut state = self.lock();
            match core::mem::replace(&mut *state, State::Empty) {
                State::Empty => {
                    *state = State::HasValue(value);
                    None
                }
                State::Waiting(waker) => {
                    *state = State::HasValue(value);
                    Some(waker)
                }
                State::Cancelled => {
                    *state = State::CancelledWithValue(value);
                    None
                }
                prev @ (State::HasValue(_) | State::CancelledWithValue(_)) => {
                    *state = prev;
                    return Err(value);
                }
            }
        };

        // Wake strictly after the lock is dropped, so the woken side can
        // immediately re-poll without re-entering this cell's critical
        // section.
        if let Some(waker) = waiter {
            trace!("OnceVar::try_write -> waking waiter");
            waker.wake();
        }
        Ok(())
    }

    /// Writes `value` into the cell.
    ///
    /// # Errors
    ///
    /// Returns a [double-write error](Error::is_double_write) if the cell
    /// already holds a value.
    pub fn write(&self, value: T) -> Result<(), Error> {
        self.try_write(value).map_err(|_| Error::double_write())
    }

    /// Cancels the cell.
    ///
    /// An empty or waiting cell transitions to cancelled and a registered
    /// waiter is woken so its next poll observes the cancellation. A filled
    /// cell keeps its value. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        let waiter = {
            let mut state = self.lock();
            match core::mem::replace(&mut *state, State::Cancelled) {
                State::Empty | State::Cancelled => None,
                State::Waiting(waker) => Some(waker),
                State::HasValue(value) | State::CancelledWithValue(value) => {
                    *state = State::CancelledWithValue(value);
                    None
                }
            }
        };

        if let Some(waker) = waiter {
            trace!("OnceVar::cancel -> waking waiter");
            waker.wake();
        }
    }

    /// Delivers `value` only if a live waiter (or a not-yet-polled consumer)
    /// can still receive it.
    ///
    /// Unlike [`try_write`](Self::try_write), this refuses to park a value in
    /// a cancelled cell and reports the refusal, so the caller can re-route
    /// the signal to another waiter instead of losing it.
    pub(crate) fn deliver(&self, value: T) -> bool {
        let waiter = {
            let mut state = self.lock();
            match core::mem::replace(&mut *state, State::Empty) {
                State::Empty => {
                    *state = State::HasValue(value);
                    None
                }
                State::Waiting(waker) => {
                    *state = State::HasValue(value);
                    Some(waker)
                }
                prev => {
                    *state = prev;
                    return false;
                }
            }
        };

        if let Some(waker) = waiter {
            waker.wake();
        }
        true
    }

    /// Returns `true` once the cell has been cancelled (with or without a
    /// value).
    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(
            &*self.lock(),
            State::Cancelled | State::CancelledWithValue(_)
        )
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> OnceVar<T> {
    /// Non-blocking peek: returns the stored value, if any.
    ///
    /// A value remains readable after the cell is cancelled.
    pub fn try_read(&self) -> Option<T> {
        match &*self.lock() {
            State::HasValue(value) | State::CancelledWithValue(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// One poll of the cell; shared by the [`Computation`] impl and the sync
    /// primitives, which poll waiter cells they do not own exclusively.
    pub(crate) fn poll_value(&self, cx: &mut Context<'_>) -> PollResult<T> {
        let mut state = self.lock();
        match &*state {
            State::HasValue(value) | State::CancelledWithValue(value) => {
                Ok(Poll::Ready(value.clone()))
            }
            State::Cancelled => Err(Error::cancelled()),
            State::Empty | State::Waiting(_) => {
                *state = State::Waiting(cx.waker().clone());
                Ok(Poll::Pending)
            }
        }
    }
}

impl<T: Clone> Computation for OnceVar<T> {
    type Output = T;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<T> {
        self.poll_value(cx)
    }

    fn cancel(&mut self) {
        OnceVar::cancel(self);
    }
}

impl<T: Clone> Future for OnceVar<T> {
    type Output = T;
    type Computation = OnceVar<T>;

    fn run(&self) -> OnceVar<T> {
        self.clone()
    }
}

impl<T> Clone for OnceVar<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for OnceVar<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for OnceVar<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.lock() {
            State::Empty => "Empty",
            State::Waiting(_) => "Waiting",
            State::HasValue(_) => "HasValue",
            State::Cancelled => "Cancelled",
            State::CancelledWithValue(_) => "CancelledWithValue",
        };
        f.debug_struct("OnceVar").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn poll_with_noop<T: Clone>(cell: &OnceVar<T>) -> PollResult<T> {
        let waker = Waker::noop();
        let mut cx = Context::new(&waker);
        cell.poll_value(&mut cx)
    }

    #[test]
    fn write_then_poll() {
        let cell = OnceVar::new();
        cell.write(3).unwrap();
        assert_eq!(poll_with_noop(&cell).unwrap(), Poll::Ready(3));
        assert_eq!(poll_with_noop(&cell).unwrap(), Poll::Ready(3));
    }

    #[test]
    fn second_write_is_refused() {
        let cell = OnceVar::new();
        assert!(cell.try_write(1).is_ok());
        assert_eq!(cell.try_write(2), Err(2));
        assert!(cell.write(3).unwrap_err().is_double_write());
        assert_eq!(cell.try_read(), Some(1));
    }

    #[test]
    fn write_wakes_registered_waiter() {
        let cell = OnceVar::new();
        let wakes = Arc::new(AtomicUsize::new(0));
        let waker = Waker::from_fn({
            let wakes = wakes.clone();
            move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            }
        });

        let mut cx = Context::new(&waker);
        assert_eq!(cell.poll_value(&mut cx).unwrap(), Poll::Pending);
        cell.write(9).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 1);
        assert_eq!(poll_with_noop(&cell).unwrap(), Poll::Ready(9));
    }

    #[test]
    fn cancel_empty_then_poll_raises() {
        let cell: OnceVar<u32> = OnceVar::new();
        cell.cancel();
        cell.cancel();
        assert!(poll_with_noop(&cell).unwrap_err().is_cancelled());
    }

    #[test]
    fn cancel_preserves_value() {
        let cell = OnceVar::new();
        cell.write(5).unwrap();
        cell.cancel();
        assert_eq!(cell.try_read(), Some(5));
        assert_eq!(poll_with_noop(&cell).unwrap(), Poll::Ready(5));
        assert_eq!(cell.try_write(6), Err(6));
    }

    #[test]
    fn deliver_refuses_cancelled_cell() {
        let cell = OnceVar::new();
        cell.cancel();
        assert!(!cell.deliver(1));
        assert_eq!(cell.try_read(), None);

        let live = OnceVar::new();
        assert!(live.deliver(2));
        assert_eq!(live.try_read(), Some(2));
    }

    #[test]
    fn exactly_one_concurrent_write_wins() {
        const WRITERS: usize = 8;

        for _ in 0..64 {
            let cell = OnceVar::new();
            let wins = AtomicUsize::new(0);
            std::thread::scope(|scope| {
                for id in 0..WRITERS {
                    let cell = cell.clone();
                    let wins = &wins;
                    scope.spawn(move || {
                        if cell.try_write(id).is_ok() {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            });
            assert_eq!(wins.load(Ordering::SeqCst), 1);
            assert!(cell.try_read().is_some());
        }
    }
}
