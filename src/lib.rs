//! A cooperative, poll-driven asynchronous computation library.
//!
//! `enoki` is built around a *pull* model of asynchrony: a computation never
//! pushes its result into a callback. Instead, an external driver repeatedly
//! [polls](Computation::poll) the computation, and each poll either produces a
//! final value ([`Poll::Ready`]) or reports that no progress is currently
//! possible ([`Poll::Pending`]). Before returning `Pending`, the computation
//! stores the [`Waker`] found on its [`Context`], and invokes it when another
//! poll may succeed. The driver is then responsible for scheduling the
//! re-poll.
//!
//! The library has two levels:
//!
//! - [`Computation`]: a single execution. It holds resources, may be polled
//!   to completion, and may be [cancelled](Computation::cancel). A
//!   computation is used once.
//! - [`Future`]: a *factory* of computations. Calling [`Future::run`] yields
//!   a fresh, independent [`Computation`]. Futures are reusable.
//!
//! On top of these sit:
//!
//! - the combinator algebra in [`future`] (`ready`, `bind`, `map`, `merge`,
//!   `first`, and friends),
//! - [`OnceVar`], a single-assignment asynchronous cell and the crate's
//!   canonical rendezvous primitive,
//! - the waiter-list synchronization primitives in [`sync`] (notify, mutex,
//!   rwlock, semaphore, barrier),
//! - the scheduler contract and drivers in [`scheduler`] ([`Spawn`],
//!   [`JoinHandle`], a tick-based [`Scheduler`], and [`block_on`]),
//! - timers in [`time`].
//!
//! # Errors
//!
//! Polling returns [`PollResult`], so a failing computation surfaces an
//! [`Error`] rather than a value. Combinators propagate errors with `?`,
//! cancel any still-live siblings, and latch the error so that every
//! subsequent poll re-raises it. The [`future::catch`] combinator converts a
//! raised error into an ordinary `Ready(Err(_))` value.
//!
//! # Cancellation
//!
//! Every computation can be cancelled. Cancellation is synchronous,
//! idempotent, and non-blocking; it propagates to owned child computations.
//! Polling a computation after cancelling it is a contract violation; wrap a
//! computation in [`CancelFuse`] to make such polls deterministically return
//! a cancellation error instead.

#![warn(missing_debug_implementations, rust_2018_idioms)]

pub mod computation;
pub mod error;
pub mod future;
pub mod once_var;
pub mod poll;
pub mod scheduler;
pub mod sync;
pub mod time;
pub mod util;
pub mod wake;

#[doc(inline)]
pub use self::{
    computation::{
        cancel_fuse, from_fn, from_fn_memo, BoxComputation, CancelFuse, Computation, Future, Memo,
    },
    error::Error,
    once_var::OnceVar,
    poll::Poll,
    scheduler::{block_on, spawn, JoinHandle, Scheduler, Spawn},
    wake::{Context, Wake, Waker},
};

/// The result of one poll: [`Poll::Ready`], [`Poll::Pending`], or a raised
/// [`Error`].
pub type PollResult<T> = Result<Poll<T>, Error>;
