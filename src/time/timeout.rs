use core::fmt;
use std::error;

use super::timer::Sleep;
use crate::{wake::Context, Computation, Error, Poll, PollResult};

/// Races a computation against a deadline. Returned by [`Timer::timeout`].
///
/// Completes with `Ok(value)` if the inner computation finishes first, or
/// `Err(`[`Elapsed`]`)` if the deadline does; the loser is cancelled.
///
/// [`Timer::timeout`]: super::Timer::timeout
#[must_use = "computations do nothing unless polled"]
pub struct Timeout<C> {
    inner: Option<C>,
    sleep: Sleep,
    done: bool,
    cancelled: bool,
    error: Option<Error>,
}

/// The deadline of a [`Timeout`] passed before its computation completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Elapsed(());

// === impl Timeout ===

impl super::Timer {
    /// Returns a computation racing `computation` against `duration`.
    pub fn timeout<C: Computation>(
        &self,
        duration: std::time::Duration,
        computation: C,
    ) -> Timeout<C> {
        Timeout {
            inner: Some(computation),
            sleep: self.sleep(duration),
            done: false,
            cancelled: false,
            error: None,
        }
    }
}

impl<C: Computation> Computation for Timeout<C> {
    type Output = Result<C::Output, Elapsed>;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Self::Output> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        assert!(!self.done, "`Timeout` polled again after completing");

        let inner = self
            .inner
            .as_mut()
            .expect("the inner computation is held until a terminal result");
        match inner.poll(cx) {
            Ok(Poll::Ready(value)) => {
                self.inner = None;
                self.sleep.cancel();
                self.done = true;
                Ok(Poll::Ready(Ok(value)))
            }
            Err(error) => {
                self.inner = None;
                self.sleep.cancel();
                self.error = Some(error.clone());
                Err(error)
            }
            Ok(Poll::Pending) => match self.sleep.poll(cx) {
                Ok(Poll::Ready(())) => {
                    if let Some(inner) = &mut self.inner {
                        inner.cancel();
                    }
                    self.inner = None;
                    self.done = true;
                    Ok(Poll::Ready(Err(Elapsed(()))))
                }
                Ok(Poll::Pending) => Ok(Poll::Pending),
                Err(error) => {
                    if let Some(inner) = &mut self.inner {
                        inner.cancel();
                    }
                    self.inner = None;
                    self.error = Some(error.clone());
                    Err(error)
                }
            },
        }
    }

    fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        if let Some(inner) = &mut self.inner {
            inner.cancel();
        }
        self.inner = None;
        self.sleep.cancel();
    }
}

impl<C> fmt::Debug for Timeout<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timeout")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

// === impl Elapsed ===

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("deadline elapsed")
    }
}

impl error::Error for Elapsed {}
