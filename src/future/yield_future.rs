use crate::{wake::Context, Computation, Poll, PollResult};

/// A computation that yields to the driver one or more times before
/// completing. See [`yield_now`](super::yield_now).
#[derive(Debug)]
#[must_use = "computations do nothing unless polled"]
pub struct Yield {
    yields: usize,
}

impl Yield {
    /// Returns a computation that yields `yields` times before completing.
    #[inline]
    pub const fn new(yields: usize) -> Self {
        Self { yields }
    }
}

impl Computation for Yield {
    type Output = ();

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<()> {
        if self.yields == 0 {
            return Ok(Poll::Ready(()));
        }
        self.yields -= 1;
        // Ask for a re-poll before suspending, so the driver re-runs us on
        // its next pass.
        cx.waker().wake();
        Ok(Poll::Pending)
    }

    fn cancel(&mut self) {}
}
