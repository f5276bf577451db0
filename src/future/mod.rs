//! The combinator algebra.
//!
//! Free constructors build leaf computations ([`ready`], [`never`],
//! [`lazy`], [`yield_now`]) and compose existing ones ([`bind`], [`map`],
//! [`apply`], [`merge`], [`first`], [`join`], [`catch`], [`ignore`],
//! [`for_each`], [`delay`]).
//!
//! Every combinator owns the children it wraps: its own
//! [`cancel`](crate::Computation::cancel) cancels them, a raised error from
//! one child cancels the surviving siblings before the error is latched and
//! re-raised from every later poll, and children are released once the
//! combinator is `Ready`. A child is polled with the same
//! [`Context`](crate::Context) the combinator was given, so a wake from any
//! depth of the tree reaches the original driver.

mod bind;
mod catch;
mod delay;
mod iter;
mod lazy;
mod merge;
mod ready;
mod yield_future;

pub use self::{
    bind::{Bind, Join, Map},
    catch::{Catch, Ignore},
    delay::Delay,
    iter::ForEach,
    lazy::Lazy,
    merge::{Apply, First, Merge},
    ready::{Never, Ready},
    yield_future::Yield,
};

use core::iter::Fuse;

use crate::Computation;

/// A computation that is immediately ready with `value`.
///
/// Cancelling it is a no-op, and it is its own reusable
/// [`Future`](crate::Future).
pub fn ready<T: Clone>(value: T) -> Ready<T> {
    Ready::new(value)
}

/// [`ready`] with the unit value.
pub fn unit() -> Ready<()> {
    Ready::new(())
}

/// A computation that never completes.
///
/// Mostly useful as scaffolding in tests and as the neutral element of
/// [`first`].
pub fn never<T>() -> Never<T> {
    Never::new()
}

/// Evaluates `f` on the first poll and is ready with the result from then
/// on.
pub fn lazy<F, T>(f: F) -> Lazy<F, T>
where
    F: FnOnce() -> T,
    T: Clone,
{
    Lazy::new(f)
}

/// Defers building the inner computation until the first poll.
///
/// Cancelling before the first poll prevents the inner computation from ever
/// being built.
pub fn delay<F, C>(make: F) -> Delay<F, C>
where
    F: FnOnce() -> C,
    C: Computation,
{
    Delay::new(make)
}

/// Sequences `source` into the computation produced by `binder`.
///
/// `source` is polled to completion, dropped, and replaced by
/// `binder(value)`, which is polled from then on.
pub fn bind<S, F, N>(binder: F, source: S) -> Bind<S, F, N>
where
    S: Computation,
    F: FnOnce(S::Output) -> N,
    N: Computation,
{
    Bind::new(binder, source)
}

/// Applies `f` to the value `source` completes with.
///
/// The mapped value is memoized, so `f` runs at most once.
pub fn map<S, F, T>(f: F, source: S) -> Map<S, F, T>
where
    S: Computation,
    F: FnOnce(S::Output) -> T,
    T: Clone,
{
    Map::new(f, source)
}

/// Completes with `function`'s value applied to `input`'s value.
///
/// Both children are polled on every poll until each has produced its value;
/// neither is ever polled past its own `Ready`. The application result is
/// memoized.
pub fn apply<FC, VC, T>(function: FC, input: VC) -> Apply<FC, VC, T>
where
    FC: Computation,
    VC: Computation,
    FC::Output: FnOnce(VC::Output) -> T,
    T: Clone,
{
    Apply::new(function, input)
}

/// Completes with both values once both children have completed.
///
/// Children are polled left first on every poll. If either raises, the other
/// is cancelled and the error is latched.
pub fn merge<A, B>(left: A, right: B) -> Merge<A, B>
where
    A: Computation,
    B: Computation,
{
    Merge::new(left, right)
}

/// Completes with the first value either child produces.
///
/// The left child is polled first and wins ties. The loser is cancelled as
/// soon as a winner is known.
pub fn first<A, B>(left: A, right: B) -> First<A, B>
where
    A: Computation,
    B: Computation<Output = A::Output>,
{
    First::new(left, right)
}

/// Flattens a computation that completes with another computation.
pub fn join<S>(source: S) -> Join<S>
where
    S: Computation,
    S::Output: Computation,
{
    Join::new(source)
}

/// Converts a raised error into an ordinary value.
///
/// Completes with `Ok(value)` if `source` completes, or `Ready(Err(error))`
/// if polling `source` raises.
pub fn catch<S: Computation>(source: S) -> Catch<S> {
    Catch::new(source)
}

/// Discards the value `source` completes with.
pub fn ignore<S: Computation>(source: S) -> Ignore<S> {
    Ignore::new(source)
}

/// Yields to the driver exactly once: the first poll wakes the context and
/// returns `Pending`, the second completes.
///
/// Used to break up long synchronous runs.
pub fn yield_now() -> Yield {
    Yield::new(1)
}

/// Drives `body(item)` to completion for each item of `iter`, in order.
///
/// On `Pending` the loop suspends and resumes exactly where it left off.
/// Cancellation is sticky: a poll after cancel raises
/// [`Error::cancelled`](crate::Error::cancelled).
pub fn for_each<I, F, C>(iter: I, body: F) -> ForEach<Fuse<I::IntoIter>, F, C>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> C,
    C: Computation<Output = ()>,
{
    ForEach::new(iter.into_iter().fuse(), body)
}
