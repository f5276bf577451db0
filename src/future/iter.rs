use core::fmt;

use crate::{wake::Context, Computation, Error, Poll, PollResult};

/// Drives a body computation to completion for each item of an iterator.
/// See [`for_each`](super::for_each).
#[must_use = "computations do nothing unless polled"]
pub struct ForEach<I, F, C> {
    iter: I,
    body: F,
    current: Option<C>,
    cancelled: bool,
    error: Option<Error>,
}

impl<I, F, C> ForEach<I, F, C> {
    pub(super) fn new(iter: I, body: F) -> Self {
        Self {
            iter,
            body,
            current: None,
            cancelled: false,
            error: None,
        }
    }
}

impl<I, F, C> Computation for ForEach<I, F, C>
where
    I: Iterator,
    F: FnMut(I::Item) -> C,
    C: Computation<Output = ()>,
{
    type Output = ();

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<()> {
        // Cancellation is sticky for this combinator.
        if self.cancelled {
            return Err(Error::cancelled());
        }
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        loop {
            if let Some(current) = &mut self.current {
                let polled = current.poll(cx);
                match polled {
                    Ok(Poll::Pending) => return Ok(Poll::Pending),
                    Ok(Poll::Ready(())) => self.current = None,
                    Err(error) => {
                        self.current = None;
                        self.error = Some(error.clone());
                        return Err(error);
                    }
                }
            }
            match self.iter.next() {
                Some(item) => self.current = Some((self.body)(item)),
                None => return Ok(Poll::Ready(())),
            }
        }
    }

    fn cancel(&mut self) {
        self.cancelled = true;
        if let Some(current) = &mut self.current {
            current.cancel();
        }
        self.current = None;
    }
}

impl<I, F, C> fmt::Debug for ForEach<I, F, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForEach")
            .field("in_item", &self.current.is_some())
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}
