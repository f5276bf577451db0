use core::fmt;
use core::mem;

use tracing::trace;

use crate::{wake::Context, Computation, Error, Poll, PollResult};

/// Completes with both children's values. See [`merge`](super::merge).
#[must_use = "computations do nothing unless polled"]
pub struct Merge<A: Computation, B: Computation> {
    left: Branch<A>,
    right: Branch<B>,
    error: Option<Error>,
}

/// Completes with the first child's value. See [`first`](super::first).
#[must_use = "computations do nothing unless polled"]
pub struct First<A: Computation, B: Computation> {
    left: Option<A>,
    right: Option<B>,
    winner: Option<A::Output>,
    error: Option<Error>,
}

/// Applies one child's function to the other child's value. See
/// [`apply`](super::apply).
#[must_use = "computations do nothing unless polled"]
pub struct Apply<FC: Computation, VC: Computation, T> {
    function: Branch<FC>,
    input: Branch<VC>,
    value: Option<T>,
    error: Option<Error>,
}

/// One side of a two-child combinator.
///
/// A side that has produced its value is never polled again; its value is
/// parked here until the combinator as a whole completes.
enum Branch<C: Computation> {
    Polling(C),
    Done(C::Output),
    Gone,
}

// === impl Branch ===

impl<C: Computation> Branch<C> {
    /// Polls the side if it is still running, parking a produced value.
    ///
    /// A raised error leaves the side `Gone` and is returned for the caller
    /// to latch.
    fn advance(&mut self, cx: &mut Context<'_>) -> Result<(), Error> {
        if let Branch::Polling(computation) = self {
            let polled = computation.poll(cx);
            match polled {
                Ok(Poll::Ready(value)) => *self = Branch::Done(value),
                Ok(Poll::Pending) => {}
                Err(error) => {
                    *self = Branch::Gone;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        matches!(self, Branch::Done(_))
    }

    /// Cancels a still-running side and drops it.
    fn abandon(&mut self) {
        if let Branch::Polling(computation) = self {
            computation.cancel();
        }
        *self = Branch::Gone;
    }

    fn cancel(&mut self) {
        if let Branch::Polling(computation) = self {
            computation.cancel();
        }
    }

    fn take_value(&mut self) -> Option<C::Output> {
        match mem::replace(self, Branch::Gone) {
            Branch::Done(value) => Some(value),
            other => {
                *self = other;
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Branch::Polling(_) => "Polling",
            Branch::Done(_) => "Done",
            Branch::Gone => "Gone",
        }
    }
}

// === impl Merge ===

impl<A: Computation, B: Computation> Merge<A, B> {
    pub(super) fn new(left: A, right: B) -> Self {
        Self {
            left: Branch::Polling(left),
            right: Branch::Polling(right),
            error: None,
        }
    }
}

impl<A, B> Computation for Merge<A, B>
where
    A: Computation,
    B: Computation,
    A::Output: Clone,
    B::Output: Clone,
{
    type Output = (A::Output, B::Output);

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Self::Output> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }

        // Left first, then right; neither side is favored beyond ordering.
        if let Err(error) = self.left.advance(cx) {
            trace!("Merge -> left side raised, cancelling right");
            self.right.abandon();
            self.error = Some(error.clone());
            return Err(error);
        }
        if let Err(error) = self.right.advance(cx) {
            trace!("Merge -> right side raised, cancelling left");
            self.left.abandon();
            self.error = Some(error.clone());
            return Err(error);
        }

        match (&self.left, &self.right) {
            (Branch::Done(left), Branch::Done(right)) => {
                Ok(Poll::Ready((left.clone(), right.clone())))
            }
            _ => Ok(Poll::Pending),
        }
    }

    fn cancel(&mut self) {
        self.left.cancel();
        self.right.cancel();
    }
}

impl<A: Computation, B: Computation> fmt::Debug for Merge<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Merge")
            .field("left", &self.left.name())
            .field("right", &self.right.name())
            .field("failed", &self.error.is_some())
            .finish()
    }
}

// === impl First ===

impl<A: Computation, B: Computation> First<A, B> {
    pub(super) fn new(left: A, right: B) -> Self {
        Self {
            left: Some(left),
            right: Some(right),
            winner: None,
            error: None,
        }
    }
}

impl<A, B> Computation for First<A, B>
where
    A: Computation,
    B: Computation<Output = A::Output>,
    A::Output: Clone,
{
    type Output = A::Output;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Self::Output> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if let Some(winner) = &self.winner {
            return Ok(Poll::Ready(winner.clone()));
        }

        // Left polled first; ties favor left.
        if let Some(left) = &mut self.left {
            let polled = left.poll(cx);
            match polled {
                Ok(Poll::Ready(value)) => {
                    self.left = None;
                    if let Some(mut right) = self.right.take() {
                        right.cancel();
                    }
                    self.winner = Some(value.clone());
                    return Ok(Poll::Ready(value));
                }
                Ok(Poll::Pending) => {}
                Err(error) => {
                    self.left = None;
                    if let Some(mut right) = self.right.take() {
                        right.cancel();
                    }
                    self.error = Some(error.clone());
                    return Err(error);
                }
            }
        }

        if let Some(right) = &mut self.right {
            let polled = right.poll(cx);
            match polled {
                Ok(Poll::Ready(value)) => {
                    self.right = None;
                    if let Some(mut left) = self.left.take() {
                        left.cancel();
                    }
                    self.winner = Some(value.clone());
                    return Ok(Poll::Ready(value));
                }
                Ok(Poll::Pending) => {}
                Err(error) => {
                    self.right = None;
                    if let Some(mut left) = self.left.take() {
                        left.cancel();
                    }
                    self.error = Some(error.clone());
                    return Err(error);
                }
            }
        }

        Ok(Poll::Pending)
    }

    fn cancel(&mut self) {
        if let Some(left) = &mut self.left {
            left.cancel();
        }
        if let Some(right) = &mut self.right {
            right.cancel();
        }
    }
}

impl<A: Computation, B: Computation> fmt::Debug for First<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("First")
            .field("decided", &self.winner.is_some())
            .field("failed", &self.error.is_some())
            .finish()
    }
}

// === impl Apply ===

impl<FC: Computation, VC: Computation, T> Apply<FC, VC, T> {
    pub(super) fn new(function: FC, input: VC) -> Self {
        Self {
            function: Branch::Polling(function),
            input: Branch::Polling(input),
            value: None,
            error: None,
        }
    }
}

impl<FC, VC, T> Computation for Apply<FC, VC, T>
where
    FC: Computation,
    VC: Computation,
    FC::Output: FnOnce(VC::Output) -> T,
    T: Clone,
{
    type Output = T;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<T> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if let Some(value) = &self.value {
            return Ok(Poll::Ready(value.clone()));
        }

        if let Err(error) = self.function.advance(cx) {
            self.input.abandon();
            self.error = Some(error.clone());
            return Err(error);
        }
        if let Err(error) = self.input.advance(cx) {
            self.function.abandon();
            self.error = Some(error.clone());
            return Err(error);
        }

        if self.function.is_done() && self.input.is_done() {
            let f = self
                .function
                .take_value()
                .expect("both sides are done");
            let input = self.input.take_value().expect("both sides are done");
            let value = f(input);
            self.value = Some(value.clone());
            return Ok(Poll::Ready(value));
        }
        Ok(Poll::Pending)
    }

    fn cancel(&mut self) {
        self.function.cancel();
        self.input.cancel();
    }
}

impl<FC: Computation, VC: Computation, T> fmt::Debug for Apply<FC, VC, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apply")
            .field("function", &self.function.name())
            .field("input", &self.input.name())
            .field("done", &self.value.is_some())
            .finish()
    }
}
