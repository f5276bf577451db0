use core::fmt;
use core::marker::PhantomData;

use crate::{computation::Future, wake::Context, Computation, Poll, PollResult};

/// A computation immediately ready with a value. See [`ready`](super::ready).
#[derive(Clone, Debug)]
#[must_use = "computations do nothing unless polled"]
pub struct Ready<T> {
    value: T,
}

/// A computation that never completes. See [`never`](super::never).
#[must_use = "computations do nothing unless polled"]
pub struct Never<T> {
    _output: PhantomData<fn() -> T>,
}

// === impl Ready ===

impl<T> Ready<T> {
    pub(super) fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Clone> Computation for Ready<T> {
    type Output = T;

    fn poll(&mut self, _cx: &mut Context<'_>) -> PollResult<T> {
        Ok(Poll::Ready(self.value.clone()))
    }

    fn cancel(&mut self) {}
}

impl<T: Clone> Future for Ready<T> {
    type Output = T;
    type Computation = Ready<T>;

    fn run(&self) -> Ready<T> {
        self.clone()
    }
}

// === impl Never ===

impl<T> Never<T> {
    pub(super) fn new() -> Self {
        Self {
            _output: PhantomData,
        }
    }
}

impl<T> Computation for Never<T> {
    type Output = T;

    fn poll(&mut self, _cx: &mut Context<'_>) -> PollResult<T> {
        // The waker is deliberately dropped unused; nothing will ever wake
        // this computation.
        Ok(Poll::Pending)
    }

    fn cancel(&mut self) {}
}

impl<T> Future for Never<T> {
    type Output = T;
    type Computation = Never<T>;

    fn run(&self) -> Never<T> {
        Never::new()
    }
}

impl<T> Clone for Never<T> {
    fn clone(&self) -> Self {
        Never::new()
    }
}

impl<T> fmt::Debug for Never<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Never").finish()
    }
}
