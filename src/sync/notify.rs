use core::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tracing::trace;

use super::Waiter;
use crate::{util::list::List, wake::Context, Computation, Error, Poll, PollResult};

/// Wakes one or all waiting computations.
///
/// [`notified`](Self::notified) returns a computation that completes when a
/// notification arrives. [`notify_one`](Self::notify_one) releases the
/// waiter at the front of the queue; [`notify_all`](Self::notify_all)
/// releases every queued waiter.
///
/// A notification sent while nobody is waiting is dropped; `Notify` stores
/// no permits.
pub struct Notify {
    waiters: StdMutex<List<Waiter>>,
}

/// A computation waiting on a [`Notify`]. Returned by
/// [`Notify::notified`].
#[must_use = "computations do nothing unless polled"]
pub struct Notified<'a> {
    notify: &'a Notify,
    waiter: Option<Arc<Waiter>>,
    done: bool,
    cancelled: bool,
}

// === impl Notify ===

impl Notify {
    /// Returns a new `Notify` with no queued waiters.
    pub fn new() -> Self {
        Self {
            waiters: StdMutex::new(List::new()),
        }
    }

    /// Returns a computation that completes on the next notification
    /// delivered to it.
    ///
    /// The waiter joins the queue on its first poll, not when this method is
    /// called.
    pub fn notified(&self) -> Notified<'_> {
        Notified {
            notify: self,
            waiter: None,
            done: false,
            cancelled: false,
        }
    }

    /// Releases the waiter at the front of the queue, if any.
    pub fn notify_one(&self) {
        loop {
            let waiter = { self.lock().pop_front() };
            match waiter {
                None => return,
                // A waiter that cancelled while we held the lock refuses
                // delivery; route the notification to the next one.
                Some(waiter) => {
                    if waiter.cell().deliver(()) {
                        trace!("Notify::notify_one -> delivered");
                        return;
                    }
                }
            }
        }
    }

    /// Releases every queued waiter.
    pub fn notify_all(&self) {
        let drained = { self.lock().drain() };
        trace!(waiters = drained.len(), "Notify::notify_all");
        for waiter in drained {
            let _ = waiter.cell().deliver(());
        }
    }

    fn lock(&self) -> StdMutexGuard<'_, List<Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Notify {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notify")
            .field("waiters", &self.lock().len())
            .finish()
    }
}

// === impl Notified ===

impl Notified<'_> {
    fn dispose(&mut self) {
        if self.done || self.cancelled {
            return;
        }
        self.cancelled = true;
        let Some(waiter) = self.waiter.take() else {
            return;
        };

        let removed = { self.notify.lock().remove(&waiter) };
        waiter.cell().cancel();
        if !removed && waiter.cell().try_read().is_some() {
            // The notification was already claimed for this waiter; hand it
            // to the next one instead of losing it.
            self.notify.notify_one();
        }
    }
}

impl Computation for Notified<'_> {
    type Output = ();

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<()> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        if self.done {
            return Ok(Poll::Ready(()));
        }

        let waiter = match &self.waiter {
            Some(waiter) => waiter.clone(),
            None => {
                let waiter = Waiter::new();
                self.notify.lock().push_back(waiter.clone());
                self.waiter = Some(waiter.clone());
                waiter
            }
        };

        match waiter.cell().poll_value(cx)? {
            Poll::Ready(()) => {
                self.done = true;
                self.waiter = None;
                Ok(Poll::Ready(()))
            }
            Poll::Pending => Ok(Poll::Pending),
        }
    }

    fn cancel(&mut self) {
        self.dispose();
    }
}

impl Drop for Notified<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Notified<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notified")
            .field("queued", &self.waiter.is_some())
            .field("done", &self.done)
            .finish_non_exhaustive()
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
    fn notify_one_releases_in_fifo_order() {
        let notify = Notify::new();
        let mut first = notify.notified();
        let mut second = notify.notified();

        assert_eq!(poll_once(&mut first).unwrap(), Poll::Pending);
        assert_eq!(poll_once(&mut second).unwrap(), Poll::Pending);

        notify.notify_one();
        assert_eq!(poll_once(&mut first).unwrap(), Poll::Ready(()));
        assert_eq!(poll_once(&mut second).unwrap(), Poll::Pending);

        notify.notify_one();
        assert_eq!(poll_once(&mut second).unwrap(), Poll::Ready(()));
    }

    #[test]
    fn notify_all_drains_the_queue() {
        let notify = Notify::new();
        let mut waiters: Vec<_> = (0..4).map(|_| notify.notified()).collect();
        for waiter in &mut waiters {
            assert_eq!(poll_once(waiter).unwrap(), Poll::Pending);
        }

        notify.notify_all();
        for waiter in &mut waiters {
            assert_eq!(poll_once(waiter).unwrap(), Poll::Ready(()));
        }
    }

    #[test]
    fn notification_with_no_waiters_is_dropped() {
        let notify = Notify::new();
        notify.notify_one();

        let mut waiter = notify.notified();
        assert_eq!(poll_once(&mut waiter).unwrap(), Poll::Pending);
    }

    #[test]
    fn cancelled_waiter_passes_its_signal_on() {
        let notify = Notify::new();
        let mut first = notify.notified();
        let mut second = notify.notified();
        assert_eq!(poll_once(&mut first).unwrap(), Poll::Pending);
        assert_eq!(poll_once(&mut second).unwrap(), Poll::Pending);

        first.cancel();
        notify.notify_one();
        assert_eq!(poll_once(&mut second).unwrap(), Poll::Ready(()));
        assert!(poll_once(&mut first).unwrap_err().is_cancelled());
    }
}
