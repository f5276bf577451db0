//! Errors raised through polls.

use core::fmt;
use std::{error, sync::Arc};

/// An error raised by polling a computation.
///
/// Three kinds of error flow through polls:
///
/// - **cancellation**: the computation was [cancelled] and then polled,
/// - **double write**: a second value was [written](crate::OnceVar::write)
///   into a [`OnceVar`](crate::OnceVar),
/// - **raised**: an error raised by user code inside a poll, propagated
///   verbatim by every combinator in between.
///
/// Raised errors are reference counted so a combinator can latch one and
/// re-raise it from every subsequent poll.
///
/// [cancelled]: crate::Computation::cancel
#[derive(Clone, Debug)]
pub struct Error {
    kind: Kind,
}

#[derive(Clone, Debug)]
enum Kind {
    Cancelled,
    DoubleWrite,
    Raised(Arc<dyn error::Error + Send + Sync>),
}

// === impl Error ===

impl Error {
    /// Returns the error reported when a cancelled computation is polled.
    pub fn cancelled() -> Self {
        Self {
            kind: Kind::Cancelled,
        }
    }

    pub(crate) fn double_write() -> Self {
        Self {
            kind: Kind::DoubleWrite,
        }
    }

    /// Wraps an arbitrary error raised from inside a poll.
    pub fn raised(error: impl Into<Box<dyn error::Error + Send + Sync>>) -> Self {
        Self {
            kind: Kind::Raised(Arc::from(error.into())),
        }
    }

    /// Returns `true` if this error reports cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, Kind::Cancelled)
    }

    /// Returns `true` if this error reports a second write to a
    /// [`OnceVar`](crate::OnceVar).
    pub fn is_double_write(&self) -> bool {
        matches!(self.kind, Kind::DoubleWrite)
    }

    /// Returns the raised error, if this is one.
    pub fn raised_ref(&self) -> Option<&(dyn error::Error + Send + Sync + 'static)> {
        match &self.kind {
            Kind::Raised(error) => Some(&**error),
            _ => None,
        }
    }

    /// Returns `true` if `other` wraps the same raised error as `self`.
    ///
    /// Latching combinators re-raise a shared handle to the original error,
    /// so "the same exception came out twice" is pointer identity here.
    pub fn same_raised(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (Kind::Raised(a), Kind::Raised(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Cancelled => f.pad("computation cancelled"),
            Kind::DoubleWrite => f.pad("value already written"),
            Kind::Raised(error) => fmt::Display::fmt(error, f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            Kind::Raised(error) => Some(&**error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert!(Error::cancelled().is_cancelled());
        assert!(Error::double_write().is_double_write());

        let raised = Error::raised("boom");
        assert!(!raised.is_cancelled());
        assert_eq!(raised.to_string(), "boom");
        assert!(raised.same_raised(&raised.clone()));
        assert!(!raised.same_raised(&Error::raised("boom")));
    }
}
