use core::fmt;

use crate::{wake::Context, Computation, Error, Poll, PollResult};

/// Reifies raised errors as values. See [`catch`](super::catch).
#[must_use = "computations do nothing unless polled"]
pub struct Catch<S: Computation> {
    source: Option<S>,
    result: Option<Result<S::Output, Error>>,
}

/// Discards the source's value. See [`ignore`](super::ignore).
#[must_use = "computations do nothing unless polled"]
pub struct Ignore<S> {
    source: Option<S>,
    error: Option<Error>,
}

// === impl Catch ===

impl<S: Computation> Catch<S> {
    pub(super) fn new(source: S) -> Self {
        Self {
            source: Some(source),
            result: None,
        }
    }
}

impl<S> Computation for Catch<S>
where
    S: Computation,
    S::Output: Clone,
{
    type Output = Result<S::Output, Error>;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Self::Output> {
        if let Some(result) = &self.result {
            return Ok(Poll::Ready(result.clone()));
        }

        let source = self
            .source
            .as_mut()
            .expect("the source is held until a terminal result");
        match source.poll(cx) {
            Ok(Poll::Pending) => Ok(Poll::Pending),
            Ok(Poll::Ready(value)) => {
                self.source = None;
                self.result = Some(Ok(value.clone()));
                Ok(Poll::Ready(Ok(value)))
            }
            Err(error) => {
                self.source = None;
                self.result = Some(Err(error.clone()));
                Ok(Poll::Ready(Err(error)))
            }
        }
    }

    fn cancel(&mut self) {
        if let Some(source) = &mut self.source {
            source.cancel();
        }
    }
}

impl<S: Computation> fmt::Debug for Catch<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catch")
            .field("done", &self.result.is_some())
            .finish_non_exhaustive()
    }
}

// === impl Ignore ===

impl<S> Ignore<S> {
    pub(super) fn new(source: S) -> Self {
        Self {
            source: Some(source),
            error: None,
        }
    }
}

impl<S: Computation> Computation for Ignore<S> {
    type Output = ();

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let Some(source) = &mut self.source else {
            return Ok(Poll::Ready(()));
        };
        match source.poll(cx) {
            Ok(Poll::Pending) => Ok(Poll::Pending),
            Ok(Poll::Ready(_)) => {
                self.source = None;
                Ok(Poll::Ready(()))
            }
            Err(error) => {
                self.source = None;
                self.error = Some(error.clone());
                Err(error)
            }
        }
    }

    fn cancel(&mut self) {
        if let Some(source) = &mut self.source {
            source.cancel();
        }
    }
}

impl<S> fmt::Debug for Ignore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ignore")
            .field("done", &self.source.is_none())
            .finish_non_exhaustive()
    }
}
