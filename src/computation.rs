//! The two-level computation interface: [`Computation`] and [`Future`].

use core::fmt;

use crate::{wake::Context, Error, Poll, PollResult};

/// A poll-driven, cancellable unit of asynchronous work.
///
/// A computation is driven by repeated calls to [`poll`](Self::poll). Each
/// poll either makes progress synchronously and returns
/// [`Ready`](Poll::Ready), or stores the context's waker somewhere that will
/// be invoked once further polling may succeed and returns
/// [`Pending`](Poll::Pending). The wake may fire before the current poll even
/// returns; scheduling the re-poll is the driver's job, not the
/// computation's.
///
/// # Contract
///
/// - **Monotone**: after the first `Ready(v)`, later polls return an
///   observationally equal value. Combinators enforce this by memoizing;
///   one-shot resource computations (lock guards, join waits) treat a poll
///   after completion as a driver bug.
/// - **Serialized**: a computation is never polled concurrently with itself.
/// - **Cancellable**: [`cancel`](Self::cancel) is idempotent, non-blocking,
///   and must be tolerated while a poll is in flight. Polling after
///   cancellation is a contract violation; see [`CancelFuse`] for a wrapper
///   that turns such polls into deterministic errors.
/// - **Owning**: a computation exclusively owns its children, cancels them
///   when it is itself cancelled, and releases them once it is `Ready` so
///   that resources (timers, queued waiters) unwind early.
pub trait Computation {
    /// The type of the value this computation completes with.
    type Output;

    /// Attempts to drive this computation to completion.
    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Self::Output>;

    /// Cancels this computation and every computation it owns.
    fn cancel(&mut self);
}

impl<C: Computation + ?Sized> Computation for Box<C> {
    type Output = C::Output;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<Self::Output> {
        (**self).poll(cx)
    }

    fn cancel(&mut self) {
        (**self).cancel();
    }
}

/// An owned, type-erased computation.
pub type BoxComputation<T> = Box<dyn Computation<Output = T> + Send>;

/// A factory producing fresh [`Computation`]s.
///
/// Futures are reusable: every call to [`run`](Self::run) yields a new,
/// independent computation. Any `Fn() -> C` closure is a future, so futures
/// compose by closing over other futures:
///
/// ```
/// use enoki::{block_on, future, Future};
///
/// let doubled = || future::map(|n: u32| n * 2, future::ready(21));
/// assert_eq!(block_on(doubled.run()).unwrap(), 42);
/// assert_eq!(block_on(doubled.run()).unwrap(), 42);
/// ```
pub trait Future {
    /// The type the produced computations complete with.
    type Output;

    /// The concrete computation type this factory produces.
    type Computation: Computation<Output = Self::Output>;

    /// Produces a fresh computation.
    fn run(&self) -> Self::Computation;
}

impl<C, F> Future for F
where
    F: Fn() -> C,
    C: Computation,
{
    type Output = C::Output;
    type Computation = C;

    fn run(&self) -> C {
        (self)()
    }
}

/// Builds a computation from a poll closure and a cancel closure.
///
/// The poll closure receives the [`Context`] for each poll and is
/// responsible for the full poll contract, including idempotence after
/// `Ready`; use [`from_fn_memo`] when the closure should only be asked for a
/// value once.
pub fn from_fn<T, P, C>(poll: P, cancel: C) -> FromFn<P, C>
where
    P: FnMut(&mut Context<'_>) -> PollResult<T>,
    C: FnMut(),
{
    FromFn { poll, cancel }
}

/// Like [`from_fn`], but the first `Ready` value is cached and served to
/// every subsequent poll, so the poll closure is never consulted again after
/// it completes.
pub fn from_fn_memo<T, P, C>(poll: P, cancel: C) -> Memo<FromFn<P, C>>
where
    T: Clone,
    P: FnMut(&mut Context<'_>) -> PollResult<T>,
    C: FnMut(),
{
    Memo::new(from_fn(poll, cancel))
}

/// A computation built from closures by [`from_fn`].
pub struct FromFn<P, C> {
    poll: P,
    cancel: C,
}

impl<T, P, C> Computation for FromFn<P, C>
where
    P: FnMut(&mut Context<'_>) -> PollResult<T>,
    C: FnMut(),
{
    type Output = T;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<T> {
        (self.poll)(cx)
    }

    fn cancel(&mut self) {
        (self.cancel)();
    }
}

impl<P, C> fmt::Debug for FromFn<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FromFn").finish_non_exhaustive()
    }
}

/// Caches the first `Ready` value of the wrapped computation and serves a
/// clone of it to every poll thereafter.
///
/// The inner computation is released as soon as it completes. A raised error
/// is latched the same way, so the inner computation is never polled past
/// its first terminal result.
pub struct Memo<C: Computation> {
    inner: Option<C>,
    value: Option<C::Output>,
    error: Option<Error>,
}

impl<C: Computation> fmt::Debug for Memo<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("done", &self.value.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Computation> Memo<C> {
    /// Wraps `inner` in a memoizing shell.
    pub fn new(inner: C) -> Self {
        Self {
            inner: Some(inner),
            value: None,
            error: None,
        }
    }
}

impl<C> Computation for Memo<C>
where
    C: Computation,
    C::Output: Clone,
{
    type Output = C::Output;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<C::Output> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if let Some(value) = &self.value {
            return Ok(Poll::Ready(value.clone()));
        }

        let inner = self
            .inner
            .as_mut()
            .expect("a `Memo` with no terminal result still holds its inner computation");
        match inner.poll(cx) {
            Ok(Poll::Ready(value)) => {
                self.inner = None;
                self.value = Some(value.clone());
                Ok(Poll::Ready(value))
            }
            Ok(Poll::Pending) => Ok(Poll::Pending),
            Err(error) => {
                self.inner = None;
                self.error = Some(error.clone());
                Err(error)
            }
        }
    }

    fn cancel(&mut self) {
        if let Some(inner) = &mut self.inner {
            inner.cancel();
        }
    }
}

/// Makes post-cancellation polls deterministic.
///
/// The abstract contract leaves polling after [`cancel`](Computation::cancel)
/// undefined. Wrapping a computation in a `CancelFuse` blows the fuse on
/// cancellation: every later poll returns [`Error::cancelled`] instead of
/// reaching the inner computation. Opt-in, mostly useful while debugging
/// drivers.
#[derive(Debug)]
pub struct CancelFuse<C> {
    inner: C,
    cancelled: bool,
}

/// Wraps `inner` in a [`CancelFuse`].
pub fn cancel_fuse<C: Computation>(inner: C) -> CancelFuse<C> {
    CancelFuse {
        inner,
        cancelled: false,
    }
}

impl<C: Computation> Computation for CancelFuse<C> {
    type Output = C::Output;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<C::Output> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        self.inner.poll(cx)
    }

    fn cancel(&mut self) {
        if !self.cancelled {
            self.cancelled = true;
            self.inner.cancel();
        }
    }
}
