//! The per-poll callback token: [`Wake`], [`Waker`], and [`Context`].

use core::fmt;
use std::sync::Arc;

use crate::scheduler::Spawn;

/// Something that can be signalled that a pending computation may now make
/// progress.
///
/// Implementations must tolerate being woken concurrently, repeatedly, and
/// from any thread, including while the poll that registered the waker is
/// still running. Spurious wakes are permitted; a driver treats a wake as
/// "poll again", never as "the value is ready".
pub trait Wake: Send + Sync {
    /// Signals that the associated computation should be polled again.
    fn wake(&self);
}

/// A cheap, clonable handle to a [`Wake`] implementation.
///
/// Wakers are handed to computations through a [`Context`]. A computation
/// that returns [`Pending`](crate::Poll::Pending) first clones the waker out
/// of the context and stores it wherever the eventual wake-up originates. A
/// stored waker may be dropped without ever being invoked.
#[derive(Clone)]
pub struct Waker {
    inner: Arc<dyn Wake>,
}

/// The context passed to every [`poll`](crate::Computation::poll).
///
/// A context is borrowed for the duration of a single poll. It carries the
/// [`Waker`] to store for wake-ups, and optionally a handle to the scheduler
/// driving the computation, so that computations can spawn siblings without
/// any global registry. Anything that must outlive the poll clones the waker;
/// the context itself must not escape.
pub struct Context<'a> {
    waker: &'a Waker,
    scheduler: Option<&'a dyn Spawn>,
}

// === impl Waker ===

impl Waker {
    /// Returns a waker dispatching to `wake`.
    pub fn new(wake: Arc<dyn Wake>) -> Self {
        Self { inner: wake }
    }

    /// Returns a waker that invokes `f` on every wake.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        struct FnWake<F>(F);

        impl<F: Fn() + Send + Sync> Wake for FnWake<F> {
            fn wake(&self) {
                (self.0)()
            }
        }

        Self::new(Arc::new(FnWake(f)))
    }

    /// Returns a waker that does nothing when woken.
    ///
    /// Useful for polling computations that are known to be ready, and in
    /// tests.
    pub fn noop() -> Self {
        struct Noop;

        impl Wake for Noop {
            fn wake(&self) {}
        }

        Self::new(Arc::new(Noop))
    }

    /// Wakes the computation this waker belongs to.
    #[inline]
    pub fn wake(&self) {
        self.inner.wake();
    }

    /// Returns `true` if both wakers dispatch to the same [`Wake`] instance.
    pub fn will_wake(&self, other: &Waker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Waker").finish_non_exhaustive()
    }
}

// === impl Context ===

impl<'a> Context<'a> {
    /// Returns a context carrying `waker` and no scheduler handle.
    pub fn new(waker: &'a Waker) -> Self {
        Self {
            waker,
            scheduler: None,
        }
    }

    /// Returns a context carrying `waker` and a handle to the scheduler
    /// driving the current computation.
    pub fn with_scheduler(waker: &'a Waker, scheduler: &'a dyn Spawn) -> Self {
        Self {
            waker,
            scheduler: Some(scheduler),
        }
    }

    /// The waker to store before returning [`Pending`](crate::Poll::Pending).
    #[inline]
    pub fn waker(&self) -> &Waker {
        self.waker
    }

    /// The scheduler driving this computation, if one attached itself.
    ///
    /// The synchronous driver ([`block_on`](crate::block_on)) attaches no
    /// scheduler.
    pub fn scheduler(&self) -> Option<&'a dyn Spawn> {
        self.scheduler
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("scheduler", &self.scheduler.is_some())
            .finish_non_exhaustive()
    }
}
