//! Time sources and timer-driven computations.
//!
//! A [`Timer`] owns a deadline heap and a worker thread that fires due
//! entries by waking their stored wakers. [`Timer::sleep`] returns a
//! computation completing at a deadline; [`Timer::timeout`] races another
//! computation against one. The [`Clock`] a timer reads is injected at
//! construction, so tests can substitute their own time source.

mod clock;
mod timeout;
mod timer;

pub use self::{
    clock::Clock,
    timeout::{Elapsed, Timeout},
    timer::{Sleep, Timer},
};
