use core::fmt;

use crate::{wake::Context, Computation, Error, PollResult};

/// Defers building its inner computation until the first poll. See
/// [`delay`](super::delay).
#[must_use = "computations do nothing unless polled"]
pub struct Delay<F, C> {
    make: Option<F>,
    inner: Option<C>,
    cancelled: bool,
}

impl<F, C> Delay<F, C> {
    pub(super) fn new(make: F) -> Self {
        Self {
            make: Some(make),
            inner: None,
            cancelled: false,
        }
    }
}

impl<F, C> Computation for Delay<F, C>
where
    F: FnOnce() -> C,
    C: Computation,
{
    type Output = C::Output;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<C::Output> {
        // Never build the inner computation after cancellation.
        if self.cancelled {
            return Err(Error::cancelled());
        }
        if self.inner.is_none() {
            let make = self
                .make
                .take()
                .expect("the creator is present until the first poll");
            self.inner = Some(make());
        }
        self.inner
            .as_mut()
            .expect("just built the inner computation")
            .poll(cx)
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        self.make = None;
        if let Some(inner) = &mut self.inner {
            inner.cancel();
        }
    }
}

impl<F, C> fmt::Debug for Delay<F, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("started", &self.inner.is_some())
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}
