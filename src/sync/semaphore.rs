use core::fmt;
use core::mem;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tracing::trace;

use super::Waiter;
use crate::{util::list::List, wake::Context, Computation, Error, Poll, PollResult};

/// A counting semaphore.
///
/// [`acquire`](Self::acquire) takes one permit, waiting FIFO-fairly if none
/// is available, and completes with an RAII [`Permit`] that returns the
/// permit on drop. Released permits are handed directly to the next queued
/// waiter; a waiter that cancels after being handed a permit passes it on,
/// so permits are never lost.
pub struct Semaphore {
    state: StdMutex<SemState>,
}

struct SemState {
    permits: usize,
    waiters: List<Waiter>,
}

/// A computation acquiring one permit. Returned by [`Semaphore::acquire`].
#[must_use = "computations do nothing unless polled"]
pub struct Acquire<'a> {
    semaphore: &'a Semaphore,
    waiter: Option<Arc<Waiter>>,
    done: bool,
    cancelled: bool,
}

/// One held permit; returned to the semaphore on drop.
#[must_use = "dropping a Permit immediately returns it"]
pub struct Permit<'a> {
    semaphore: &'a Semaphore,
}

// === impl Semaphore ===

impl Semaphore {
    /// Returns a semaphore with `permits` permits available.
    pub fn new(permits: usize) -> Self {
        Self {
            state: StdMutex::new(SemState {
                permits,
                waiters: List::new(),
            }),
        }
    }

    /// The number of permits currently available.
    pub fn available_permits(&self) -> usize {
        self.state_lock().permits
    }

    /// Returns a computation that completes with a [`Permit`].
    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            waiter: None,
            done: false,
            cancelled: false,
        }
    }

    /// Takes a permit without waiting, if one is available and nobody is
    /// queued ahead.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut state = self.state_lock();
        if state.permits > 0 && state.waiters.is_empty() {
            state.permits -= 1;
            drop(state);
            Some(Permit { semaphore: self })
        } else {
            None
        }
    }

    /// Adds `permits` permits, handing them to queued waiters first.
    pub fn add_permits(&self, permits: usize) {
        let mut remaining = permits;
        while remaining > 0 {
            let waiter = {
                let mut state = self.state_lock();
                match state.waiters.pop_front() {
                    Some(waiter) => waiter,
                    None => {
                        state.permits += remaining;
                        return;
                    }
                }
            };
            if waiter.cell().deliver(()) {
                trace!("Semaphore::add_permits -> handed to waiter");
                remaining -= 1;
            }
        }
    }

    fn state_lock(&self) -> StdMutexGuard<'_, SemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn poll_acquire(
        &self,
        waiter: &mut Option<Arc<Waiter>>,
        cx: &mut Context<'_>,
    ) -> PollResult<()> {
        let queued = match waiter {
            Some(queued) => queued.clone(),
            None => {
                let mut state = self.state_lock();
                if state.permits > 0 && state.waiters.is_empty() {
                    state.permits -= 1;
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
            // A permit was already handed to this waiter; pass it on.
            self.add_permits(1);
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state_lock();
        f.debug_struct("Semaphore")
            .field("permits", &state.permits)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

// === impl Acquire ===

impl<'a> Computation for Acquire<'a> {
    type Output = Permit<'a>;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Permit<'a>> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        assert!(
            !self.done,
            "`Acquire` polled again after producing its permit"
        );
        match self.semaphore.poll_acquire(&mut self.waiter, cx)? {
            Poll::Ready(()) => {
                self.done = true;
                self.waiter = None;
                Ok(Poll::Ready(Permit {
                    semaphore: self.semaphore,
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
        self.semaphore.cancel_acquire(self.waiter.take());
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Acquire<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("queued", &self.waiter.is_some())
            .finish_non_exhaustive()
    }
}

// === impl Permit ===

impl Permit<'_> {
    /// Keeps the permit out of the semaphore permanently.
    pub fn forget(self) {
        mem::forget(self);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.semaphore.add_permits(1);
    }
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}
