use core::fmt;

use crate::{wake::Context, Computation, Error, Poll, PollResult};

/// Sequences a source computation into its continuation. See
/// [`bind`](super::bind).
#[must_use = "computations do nothing unless polled"]
pub struct Bind<S, F, N> {
    state: State<S, F, N>,
}

enum State<S, F, N> {
    Source { source: S, binder: Option<F> },
    Next(N),
    Failed(Error),
}

/// Applies a function to a computation's value. See [`map`](super::map).
#[must_use = "computations do nothing unless polled"]
pub struct Map<S, F, T> {
    source: Option<S>,
    f: Option<F>,
    value: Option<T>,
    error: Option<Error>,
}

/// Flattens a computation of a computation. See [`join`](super::join).
#[must_use = "computations do nothing unless polled"]
pub struct Join<S: Computation> {
    state: JoinState<S>,
}

enum JoinState<S: Computation> {
    Source(S),
    Inner(S::Output),
    Failed(Error),
}

// === impl Bind ===

impl<S, F, N> Bind<S, F, N> {
    pub(super) fn new(binder: F, source: S) -> Self {
        Self {
            state: State::Source {
                source,
                binder: Some(binder),
            },
        }
    }
}

impl<S, F, N> Computation for Bind<S, F, N>
where
    S: Computation,
    F: FnOnce(S::Output) -> N,
    N: Computation,
{
    type Output = N::Output;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<N::Output> {
        loop {
            match &mut self.state {
                State::Failed(error) => return Err(error.clone()),
                State::Next(next) => {
                    let polled = next.poll(cx);
                    return match polled {
                        Err(error) => {
                            self.state = State::Failed(error.clone());
                            Err(error)
                        }
                        other => other,
                    };
                }
                State::Source { source, binder } => {
                    let polled = source.poll(cx);
                    match polled {
                        Ok(Poll::Pending) => return Ok(Poll::Pending),
                        Ok(Poll::Ready(value)) => {
                            let binder = binder.take().expect("the binder runs exactly once");
                            let next = binder(value);
                            // Replacing the state drops the source before the
                            // continuation is first polled.
                            self.state = State::Next(next);
                        }
                        Err(error) => {
                            self.state = State::Failed(error.clone());
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    fn cancel(&mut self) {
        match &mut self.state {
            State::Source { source, .. } => source.cancel(),
            State::Next(next) => next.cancel(),
            State::Failed(_) => {}
        }
    }
}

impl<S, F, N> fmt::Debug for Bind<S, F, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Source { .. } => "Source",
            State::Next(_) => "Next",
            State::Failed(_) => "Failed",
        };
        f.debug_struct("Bind").field("state", &state).finish()
    }
}

// === impl Map ===

impl<S, F, T> Map<S, F, T> {
    pub(super) fn new(f: F, source: S) -> Self {
        Self {
            source: Some(source),
            f: Some(f),
            value: None,
            error: None,
        }
    }
}

impl<S, F, T> Computation for Map<S, F, T>
where
    S: Computation,
    F: FnOnce(S::Output) -> T,
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

        let source = self
            .source
            .as_mut()
            .expect("the source is held until a terminal result");
        match source.poll(cx) {
            Ok(Poll::Pending) => Ok(Poll::Pending),
            Ok(Poll::Ready(input)) => {
                let f = self.f.take().expect("the function runs exactly once");
                let value = f(input);
                self.source = None;
                self.value = Some(value.clone());
                Ok(Poll::Ready(value))
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

impl<S, F, T> fmt::Debug for Map<S, F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Map")
            .field("done", &self.value.is_some())
            .finish_non_exhaustive()
    }
}

// === impl Join ===

impl<S: Computation> Join<S> {
    pub(super) fn new(source: S) -> Self {
        Self {
            state: JoinState::Source(source),
        }
    }
}

impl<S> Computation for Join<S>
where
    S: Computation,
    S::Output: Computation,
{
    type Output = <S::Output as Computation>::Output;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Self::Output> {
        loop {
            match &mut self.state {
                JoinState::Failed(error) => return Err(error.clone()),
                JoinState::Inner(inner) => {
                    let polled = inner.poll(cx);
                    return match polled {
                        Err(error) => {
                            self.state = JoinState::Failed(error.clone());
                            Err(error)
                        }
                        other => other,
                    };
                }
                JoinState::Source(source) => {
                    let polled = source.poll(cx);
                    match polled {
                        Ok(Poll::Pending) => return Ok(Poll::Pending),
                        Ok(Poll::Ready(inner)) => {
                            self.state = JoinState::Inner(inner);
                        }
                        Err(error) => {
                            self.state = JoinState::Failed(error.clone());
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    fn cancel(&mut self) {
        match &mut self.state {
            JoinState::Source(source) => source.cancel(),
            JoinState::Inner(inner) => inner.cancel(),
            JoinState::Failed(_) => {}
        }
    }
}

impl<S: Computation> fmt::Debug for Join<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            JoinState::Source(_) => "Source",
            JoinState::Inner(_) => "Inner",
            JoinState::Failed(_) => "Failed",
        };
        f.debug_struct("Join").field("state", &state).finish()
    }
}
