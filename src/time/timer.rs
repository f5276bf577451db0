use core::cmp::Ordering as CmpOrdering;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::trace;

use super::Clock;
use crate::{
    wake::{Context, Waker},
    Computation, Error, Poll, PollResult,
};

/// Fires one-shot deadlines.
///
/// A `Timer` keeps pending entries in a deadline-ordered heap serviced by a
/// worker thread. When an entry's deadline passes, the worker wakes the
/// waker the sleeping computation stored. Dropping the timer shuts the
/// worker down; sleeps that have not fired by then never will.
pub struct Timer {
    inner: Arc<TimerInner>,
    worker: Option<thread::JoinHandle<()>>,
}

struct TimerInner {
    clock: Clock,
    state: StdMutex<TimerState>,
    condvar: Condvar,
}

struct TimerState {
    entries: BinaryHeap<EntryRef>,
    next_id: u64,
    shutdown: bool,
}

/// Heap entry: min-ordered by deadline, then insertion id.
struct EntryRef {
    deadline: std::time::Instant,
    id: u64,
    entry: Arc<SleepEntry>,
}

struct SleepEntry {
    fired: AtomicBool,
    cancelled: AtomicBool,
    waker: StdMutex<Option<Waker>>,
}

/// A computation that completes when its deadline passes. Returned by
/// [`Timer::sleep`].
#[must_use = "computations do nothing unless polled"]
pub struct Sleep {
    entry: Arc<SleepEntry>,
}

// === impl Timer ===

impl Timer {
    /// Returns a timer reading the host's monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(Clock::monotonic())
    }

    /// Returns a timer reading `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        let inner = Arc::new(TimerInner {
            clock,
            state: StdMutex::new(TimerState {
                entries: BinaryHeap::new(),
                next_id: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
        });
        let worker = {
            let inner = inner.clone();
            thread::Builder::new()
                .name("enoki-timer".into())
                .spawn(move || inner.run())
                .expect("failed to spawn the timer worker thread")
        };
        Self {
            inner,
            worker: Some(worker),
        }
    }

    /// The clock this timer reads.
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns a computation that completes `duration` from now.
    ///
    /// Cancelling the computation cancels the timer entry; the entry itself
    /// is discarded when its deadline is reached.
    pub fn sleep(&self, duration: Duration) -> Sleep {
        let entry = Arc::new(SleepEntry {
            fired: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            waker: StdMutex::new(None),
        });
        let deadline = self.inner.clock.now() + duration;
        {
            let mut state = self.inner.state_lock();
            let id = state.next_id;
            state.next_id += 1;
            state.entries.push(EntryRef {
                deadline,
                id,
                entry: entry.clone(),
            });
        }
        // The new entry may be the earliest; let the worker re-evaluate.
        self.inner.condvar.notify_one();
        Sleep { entry }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.inner.state_lock().shutdown = true;
        self.inner.condvar.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("pending", &self.inner.state_lock().entries.len())
            .finish()
    }
}

impl TimerInner {
    fn state_lock(&self) -> StdMutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run(&self) {
        let mut state = self.state_lock();
        loop {
            if state.shutdown {
                return;
            }

            let now = self.clock.now();
            let mut due = Vec::new();
            while let Some(next) = state.entries.peek() {
                if next.deadline > now {
                    break;
                }
                due.push(state.entries.pop().expect("peeked an entry"));
            }

            if !due.is_empty() {
                // Fire outside the lock; wakers may run arbitrary driver
                // code.
                drop(state);
                trace!(fired = due.len(), "Timer -> firing due entries");
                for entry in due {
                    entry.entry.fire();
                }
                state = self.state_lock();
                continue;
            }

            state = match state.entries.peek() {
                Some(next) => {
                    let wait = next.deadline.saturating_duration_since(now);
                    self.condvar
                        .wait_timeout(state, wait)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .condvar
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

// === impl EntryRef ===

impl PartialEq for EntryRef {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for EntryRef {}

impl PartialOrd for EntryRef {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for EntryRef {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline is on
        // top.
        (other.deadline, other.id).cmp(&(self.deadline, self.id))
    }
}

// === impl SleepEntry ===

impl SleepEntry {
    fn fire(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.fired.store(true, Ordering::Release);
        let waker = {
            self.waker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

// === impl Sleep ===

impl Computation for Sleep {
    type Output = ();

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<()> {
        if self.entry.cancelled.load(Ordering::Acquire) {
            return Err(Error::cancelled());
        }
        if self.entry.fired.load(Ordering::Acquire) {
            return Ok(Poll::Ready(()));
        }

        {
            let mut waker = self
                .entry
                .waker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *waker = Some(cx.waker().clone());
        }
        // The deadline may have passed while the waker was being stored.
        if self.entry.fired.load(Ordering::Acquire) {
            return Ok(Poll::Ready(()));
        }
        Ok(Poll::Pending)
    }

    fn cancel(&mut self) {
        self.entry.cancelled.store(true, Ordering::Release);
        self.entry
            .waker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl fmt::Debug for Sleep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sleep")
            .field("fired", &self.entry.fired.load(Ordering::Relaxed))
            .field("cancelled", &self.entry.cancelled.load(Ordering::Relaxed))
            .finish()
    }
}
