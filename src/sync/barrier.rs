use core::fmt;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};

use tracing::trace;

use super::Waiter;
use crate::{util::list::List, wake::Context, Computation, Error, Poll, PollResult};

/// A cyclic rendezvous point for a fixed number of computations.
///
/// Each participant polls the computation returned by [`wait`](Self::wait);
/// the final arrival releases the whole batch and is reported as the
/// [leader](BarrierWaitResult::is_leader). The barrier resets afterwards and
/// can be reused for the next round.
///
/// A participant that cancels before the batch completes withdraws its
/// arrival, so the remaining participants still rendezvous correctly.
pub struct Barrier {
    state: StdMutex<BarrierState>,
    participants: usize,
}

struct BarrierState {
    arrived: usize,
    waiters: List<Waiter>,
}

/// A computation waiting at a [`Barrier`]. Returned by [`Barrier::wait`].
#[must_use = "computations do nothing unless polled"]
pub struct BarrierWait<'a> {
    barrier: &'a Barrier,
    waiter: Option<Arc<Waiter>>,
    result: Option<BarrierWaitResult>,
    cancelled: bool,
}

/// Reports how a barrier wait completed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BarrierWaitResult {
    leader: bool,
}

// === impl Barrier ===

impl Barrier {
    /// Returns a barrier releasing batches of `participants` computations.
    ///
    /// A barrier of zero participants behaves like one of a single
    /// participant: every wait completes immediately as the leader.
    pub fn new(participants: usize) -> Self {
        Self {
            state: StdMutex::new(BarrierState {
                arrived: 0,
                waiters: List::new(),
            }),
            participants: participants.max(1),
        }
    }

    /// Returns a computation that completes once `participants`
    /// computations are waiting.
    pub fn wait(&self) -> BarrierWait<'_> {
        BarrierWait {
            barrier: self,
            waiter: None,
            result: None,
            cancelled: false,
        }
    }

    fn state_lock(&self) -> StdMutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state_lock();
        f.debug_struct("Barrier")
            .field("participants", &self.participants)
            .field("arrived", &state.arrived)
            .finish()
    }
}

// === impl BarrierWait ===

impl Computation for BarrierWait<'_> {
    type Output = BarrierWaitResult;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<BarrierWaitResult> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        if let Some(result) = self.result {
            return Ok(Poll::Ready(result));
        }

        if self.waiter.is_none() {
            let mut state = self.barrier.state_lock();
            state.arrived += 1;
            if state.arrived >= self.barrier.participants {
                // Final arrival: release the batch and reset for the next
                // round.
                state.arrived = 0;
                let batch = state.waiters.drain();
                drop(state);
                trace!(released = batch.len(), "Barrier -> released batch");
                for waiter in batch {
                    let _ = waiter.cell().deliver(());
                }
                let result = BarrierWaitResult { leader: true };
                self.result = Some(result);
                return Ok(Poll::Ready(result));
            }
            let waiter = Waiter::new();
            state.waiters.push_back(waiter.clone());
            drop(state);
            self.waiter = Some(waiter);
        }

        let waiter = self
            .waiter
            .as_ref()
            .expect("enqueued on the first poll")
            .clone();
        match waiter.cell().poll_value(cx)? {
            Poll::Ready(()) => {
                let result = BarrierWaitResult { leader: false };
                self.result = Some(result);
                self.waiter = None;
                Ok(Poll::Ready(result))
            }
            Poll::Pending => Ok(Poll::Pending),
        }
    }

    fn cancel(&mut self) {
        if self.cancelled || self.result.is_some() {
            return;
        }
        self.cancelled = true;
        let Some(waiter) = self.waiter.take() else {
            return;
        };

        {
            let mut state = self.barrier.state_lock();
            if state.waiters.remove(&waiter) {
                // Withdraw this arrival so the batch does not wait for a
                // participant that will never be released.
                state.arrived -= 1;
            }
        }
        waiter.cell().cancel();
    }
}

impl Drop for BarrierWait<'_> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for BarrierWait<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BarrierWait")
            .field("queued", &self.waiter.is_some())
            .field("done", &self.result.is_some())
            .finish_non_exhaustive()
    }
}

// === impl BarrierWaitResult ===

impl BarrierWaitResult {
    /// Returns `true` for exactly one participant of each batch: the final
    /// arrival.
    pub fn is_leader(&self) -> bool {
        self.leader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::Waker;

    fn poll_once<C: Computation>(computation: &mut C) -> PollResult<C::Output> {
        let waker = Waker::noop();
        let mut cx = Context::new(&waker);
        computation.poll(&mut cx)
    }

    #[test]
    fn batch_releases_on_final_arrival() {
        let barrier = Barrier::new(3);
        let mut first = barrier.wait();
        let mut second = barrier.wait();
        assert!(poll_once(&mut first).unwrap().is_pending());
        assert!(poll_once(&mut second).unwrap().is_pending());

        let mut third = barrier.wait();
        let leader = match poll_once(&mut third).unwrap() {
            Poll::Ready(result) => result,
            Poll::Pending => panic!("the final arrival completes immediately"),
        };
        assert!(leader.is_leader());

        for wait in [&mut first, &mut second] {
            match poll_once(wait).unwrap() {
                Poll::Ready(result) => assert!(!result.is_leader()),
                Poll::Pending => panic!("released waiters complete"),
            }
        }
    }

    #[test]
    fn barrier_is_cyclic() {
        let barrier = Barrier::new(2);
        for _ in 0..3 {
            let mut a = barrier.wait();
            assert!(poll_once(&mut a).unwrap().is_pending());
            let mut b = barrier.wait();
            assert!(poll_once(&mut b).unwrap().is_ready());
            assert!(poll_once(&mut a).unwrap().is_ready());
        }
    }

    #[test]
    fn cancelled_arrival_is_withdrawn() {
        let barrier = Barrier::new(2);
        let mut a = barrier.wait();
        assert!(poll_once(&mut a).unwrap().is_pending());
        a.cancel();

        // The cancelled arrival no longer counts, so two fresh waits are
        // needed to release a batch.
        let mut b = barrier.wait();
        assert!(poll_once(&mut b).unwrap().is_pending());
        let mut c = barrier.wait();
        assert!(poll_once(&mut c).unwrap().is_ready());
        assert!(poll_once(&mut b).unwrap().is_ready());
    }

    #[test]
    fn single_participant_never_waits() {
        let barrier = Barrier::new(1);
        for _ in 0..2 {
            let mut wait = barrier.wait();
            match poll_once(&mut wait).unwrap() {
                Poll::Ready(result) => assert!(result.is_leader()),
                Poll::Pending => panic!("a one-participant barrier never blocks"),
            }
        }
    }
}
