use core::fmt;

use crate::{wake::Context, Computation, Error, Poll, PollResult};

/// A deferred value. See [`lazy`](super::lazy).
#[must_use = "computations do nothing unless polled"]
pub struct Lazy<F, T> {
    f: Option<F>,
    value: Option<T>,
}

impl<F, T> Lazy<F, T> {
    pub(super) fn new(f: F) -> Self {
        Self {
            f: Some(f),
            value: None,
        }
    }
}

impl<F, T> Computation for Lazy<F, T>
where
    F: FnOnce() -> T,
    T: Clone,
{
    type Output = T;

    fn poll(&mut self, _cx: &mut Context<'_>) -> PollResult<T> {
        if let Some(value) = &self.value {
            return Ok(Poll::Ready(value.clone()));
        }
        match self.f.take() {
            Some(f) => {
                let value = f();
                self.value = Some(value.clone());
                Ok(Poll::Ready(value))
            }
            // The closure is only gone if we were cancelled before the
            // first poll.
            None => Err(Error::cancelled()),
        }
    }

    fn cancel(&mut self) {
        self.f = None;
    }
}

impl<F, T> fmt::Debug for Lazy<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("evaluated", &self.value.is_some())
            .finish_non_exhaustive()
    }
}
