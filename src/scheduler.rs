//! The scheduler contract, join handles, a tick-based scheduler, and the
//! synchronous driver.
//!
//! [`Spawn`] is the whole contract a scheduler must satisfy: take ownership
//! of an erased computation and arrange for it to be polled until it
//! completes. [`spawn`] and [`spawn_computation`] layer typed results on
//! top, wrapping the computation so its outcome lands in a result cell and
//! handing back a [`JoinHandle`].
//!
//! [`Scheduler`] is the crate's concrete driver: single threaded and
//! cooperative, it polls everything in its run queue each [`tick`]
//! (tolerating wakes from any thread), and reports what it did in a
//! [`Tick`]. [`block_on`] is the minimal driver for consuming a result from
//! synchronous code.
//!
//! [`tick`]: Scheduler::tick

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, Weak};

use tracing::{debug_span, trace};

use crate::{
    computation::{BoxComputation, Computation, Future},
    once_var::OnceVar,
    wake::{Context, Wake, Waker},
    Error, Poll, PollResult,
};

/// The scheduler contract: take ownership of a computation and poll it to
/// completion.
///
/// Computations discover the scheduler driving them through
/// [`Context::scheduler`], never through a global.
pub trait Spawn: Send + Sync {
    /// Takes ownership of `computation` and arranges for it to be polled
    /// until it completes.
    fn spawn_erased(&self, computation: BoxComputation<()>);
}

/// Spawns a fresh computation produced by `future` onto `scheduler`.
///
/// The result is captured in the returned [`JoinHandle`].
pub fn spawn<S, F>(scheduler: &S, future: &F) -> JoinHandle<F::Output>
where
    S: Spawn + ?Sized,
    F: Future,
    F::Computation: Send + 'static,
    F::Output: Send + 'static,
{
    spawn_computation(scheduler, future.run())
}

/// Spawns an already-built computation onto `scheduler`.
pub fn spawn_computation<S, C>(scheduler: &S, computation: C) -> JoinHandle<C::Output>
where
    S: Spawn + ?Sized,
    C: Computation + Send + 'static,
    C::Output: Send + 'static,
{
    let cell = OnceVar::new();
    let shared = Arc::new(TaskShared {
        cancelled: AtomicBool::new(false),
        waker: StdMutex::new(None),
    });
    scheduler.spawn_erased(Box::new(TaskShell {
        inner: Some(computation),
        cell: cell.clone(),
        shared: shared.clone(),
    }));
    JoinHandle { cell, shared }
}

/// An owned permission to await, cancel, or block on a spawned computation.
///
/// A `JoinHandle` is itself a [`Future`]: running it yields a computation
/// that completes with the task's result (or re-raises the error the task
/// raised). Dropping the handle detaches the task; it keeps running.
pub struct JoinHandle<T> {
    cell: OnceVar<Result<T, Error>>,
    shared: Arc<TaskShared>,
}

/// A computation awaiting a spawned task's result. Produced by running a
/// [`JoinHandle`].
#[must_use = "computations do nothing unless polled"]
pub struct JoinWait<T> {
    cell: OnceVar<Result<T, Error>>,
    cancelled: bool,
}

struct TaskShared {
    cancelled: AtomicBool,
    waker: StdMutex<Option<Waker>>,
}

/// Adapts a typed computation into the erased unit computation a scheduler
/// owns: the result is routed into the handle's cell instead of returned.
struct TaskShell<C: Computation> {
    inner: Option<C>,
    cell: OnceVar<Result<C::Output, Error>>,
    shared: Arc<TaskShared>,
}

// === impl JoinHandle ===

impl<T> JoinHandle<T> {
    /// Cancels the spawned computation.
    ///
    /// The cancellation is observed the next time the scheduler polls the
    /// task; pending joiners see a cancellation error. Cancelling a task
    /// that already completed leaves its result readable.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.cell.cancel();
        let waker = {
            self.shared
                .waker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T: Clone> JoinHandle<T> {
    /// Returns `true` once the task has completed, raised, or been
    /// cancelled.
    pub fn is_finished(&self) -> bool {
        self.cell.try_read().is_some() || self.cell.is_cancelled()
    }

    /// Blocks the calling thread until the task completes.
    ///
    /// # Errors
    ///
    /// Re-raises the error the task raised, or a cancellation error if the
    /// task was cancelled first.
    pub fn join(&self) -> Result<T, Error> {
        block_on(self.run())
    }
}

impl<T: Clone> Future for JoinHandle<T> {
    type Output = T;
    type Computation = JoinWait<T>;

    fn run(&self) -> JoinWait<T> {
        JoinWait {
            cell: self.cell.clone(),
            cancelled: false,
        }
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("cell", &self.cell)
            .finish_non_exhaustive()
    }
}

// === impl JoinWait ===

impl<T: Clone> Computation for JoinWait<T> {
    type Output = T;

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<T> {
        if self.cancelled {
            return Err(Error::cancelled());
        }
        match self.cell.poll_value(cx)? {
            Poll::Ready(Ok(value)) => Ok(Poll::Ready(value)),
            Poll::Ready(Err(error)) => Err(error),
            Poll::Pending => Ok(Poll::Pending),
        }
    }

    /// Stops waiting. The task itself is unaffected; use
    /// [`JoinHandle::cancel`] to cancel the task.
    fn cancel(&mut self) {
        self.cancelled = true;
    }
}

impl<T> fmt::Debug for JoinWait<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinWait")
            .field("cell", &self.cell)
            .finish_non_exhaustive()
    }
}

// === impl TaskShell ===

impl<C: Computation> Computation for TaskShell<C> {
    type Output = ();

    fn poll(&mut self, cx: &mut Context<'_>) -> PollResult<()> {
        if self.shared.cancelled.load(Ordering::Acquire) {
            if let Some(inner) = &mut self.inner {
                inner.cancel();
            }
            self.inner = None;
            self.cell.cancel();
            return Ok(Poll::Ready(()));
        }

        // Keep the latest waker visible to `JoinHandle::cancel`, so a
        // cancellation from another thread can force a prompt re-poll.
        {
            let mut waker = self
                .shared
                .waker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *waker = Some(cx.waker().clone());
        }

        let Some(inner) = &mut self.inner else {
            return Ok(Poll::Ready(()));
        };
        match inner.poll(cx) {
            Ok(Poll::Pending) => Ok(Poll::Pending),
            Ok(Poll::Ready(value)) => {
                self.inner = None;
                let _ = self.cell.try_write(Ok(value));
                Ok(Poll::Ready(()))
            }
            Err(error) => {
                trace!(%error, "task raised");
                self.inner = None;
                let _ = self.cell.try_write(Err(error));
                Ok(Poll::Ready(()))
            }
        }
    }

    fn cancel(&mut self) {
        self.shared.cancelled.store(true, Ordering::Release);
        if let Some(inner) = &mut self.inner {
            inner.cancel();
        }
        self.inner = None;
        self.cell.cancel();
    }
}

// === impl Scheduler ===

/// A single-threaded, tick-based cooperative scheduler.
///
/// Tasks are polled by calling [`tick`](Self::tick) from whichever thread
/// owns the scheduler; wake-ups may arrive from any thread and re-enqueue
/// the woken task for the next tick.
#[derive(Clone, Default)]
pub struct Scheduler {
    core: Arc<Core>,
}

#[derive(Default)]
struct Core {
    run_queue: StdMutex<VecDeque<Arc<Task>>>,
}

struct Task {
    state: AtomicU8,
    computation: StdMutex<Option<BoxComputation<()>>>,
    core: Weak<Core>,
}

struct TaskWaker {
    task: Arc<Task>,
}

/// What one call to [`Scheduler::tick`] did.
#[derive(Debug)]
#[non_exhaustive]
pub struct Tick {
    /// How many task polls were performed.
    pub polled: usize,
    /// How many tasks completed (or raised) during this tick.
    pub completed: usize,
    /// Whether woken tasks remain queued after this tick.
    pub has_remaining: bool,
}

/// Task states. A task moves `QUEUED -> RUNNING -> {IDLE, QUEUED, COMPLETE}`;
/// a wake during `RUNNING` parks as `NOTIFIED` and re-queues when the poll
/// finishes.
const IDLE: u8 = 0;
const QUEUED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const COMPLETE: u8 = 4;

impl Scheduler {
    /// How many tasks are polled per call to [`tick`](Self::tick).
    pub const DEFAULT_TICK_SIZE: usize = 256;

    /// Returns a new scheduler with an empty run queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a fresh computation produced by `future`.
    pub fn spawn<F>(&self, future: &F) -> JoinHandle<F::Output>
    where
        F: Future,
        F::Computation: Send + 'static,
        F::Output: Send + 'static,
    {
        spawn(self, future)
    }

    /// Spawns an already-built computation.
    pub fn spawn_computation<C>(&self, computation: C) -> JoinHandle<C::Output>
    where
        C: Computation + Send + 'static,
        C::Output: Send + 'static,
    {
        spawn_computation(self, computation)
    }

    /// Polls up to [`DEFAULT_TICK_SIZE`](Self::DEFAULT_TICK_SIZE) queued
    /// tasks.
    pub fn tick(&self) -> Tick {
        self.tick_n(Self::DEFAULT_TICK_SIZE)
    }

    fn tick_n(&self, limit: usize) -> Tick {
        let mut tick = Tick {
            polled: 0,
            completed: 0,
            has_remaining: false,
        };

        while tick.polled < limit {
            let task = {
                let mut queue = self.core.queue_lock();
                match queue.pop_front() {
                    Some(task) => task,
                    None => return tick,
                }
            };

            task.state.store(RUNNING, Ordering::Release);
            let computation = {
                task.computation
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
            };
            let Some(mut computation) = computation else {
                task.state.store(COMPLETE, Ordering::Release);
                continue;
            };

            let waker = Waker::new(Arc::new(TaskWaker { task: task.clone() }));
            let mut cx = Context::with_scheduler(&waker, self);
            let span = debug_span!("poll");
            let _enter = span.enter();
            let poll = computation.poll(&mut cx);
            tick.polled += 1;

            match poll {
                Ok(Poll::Pending) => {
                    // Park the computation before leaving RUNNING, so a
                    // concurrent wake always finds it in place.
                    {
                        let mut slot = task
                            .computation
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        *slot = Some(computation);
                    }
                    if task
                        .state
                        .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        // Woken while running; go around again.
                        task.state.store(QUEUED, Ordering::Release);
                        self.core.queue_lock().push_back(task.clone());
                    }
                }
                Ok(Poll::Ready(())) => {
                    task.state.store(COMPLETE, Ordering::Release);
                    tick.completed += 1;
                }
                Err(error) => {
                    trace!(%error, "task raised during tick");
                    task.state.store(COMPLETE, Ordering::Release);
                    tick.completed += 1;
                }
            }
        }

        tick.has_remaining = !self.core.queue_lock().is_empty();
        tick
    }
}

impl Spawn for Scheduler {
    fn spawn_erased(&self, computation: BoxComputation<()>) {
        let task = Arc::new(Task {
            state: AtomicU8::new(QUEUED),
            computation: StdMutex::new(Some(computation)),
            core: Arc::downgrade(&self.core),
        });
        self.core.queue_lock().push_back(task);
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("queued", &self.core.queue_lock().len())
            .finish()
    }
}

impl Core {
    fn queue_lock(&self) -> StdMutexGuard<'_, VecDeque<Arc<Task>>> {
        self.run_queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Wake for TaskWaker {
    fn wake(&self) {
        let task = &self.task;
        loop {
            let state = task.state.load(Ordering::Acquire);
            match state {
                IDLE => {
                    if task
                        .state
                        .compare_exchange(IDLE, QUEUED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        if let Some(core) = task.core.upgrade() {
                            core.queue_lock().push_back(task.clone());
                        }
                        return;
                    }
                }
                RUNNING => {
                    if task
                        .state
                        .compare_exchange(RUNNING, NOTIFIED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return;
                    }
                }
                // Already queued, already notified, or already done.
                _ => return,
            }
        }
    }
}

// === block_on ===

/// Drives `computation` to completion on the calling thread.
///
/// The driver polls, parks on an auto-resetting wait handle whenever the
/// computation is pending, and re-polls when woken. Wakes may arrive from
/// any thread; spurious wakes just cause an extra poll. No scheduler is
/// attached to the context.
///
/// # Errors
///
/// Re-raises whatever error the computation raises.
///
/// # Examples
///
/// ```
/// use enoki::{block_on, future};
///
/// assert_eq!(block_on(future::ready(42)).unwrap(), 42);
/// ```
pub fn block_on<C: Computation>(mut computation: C) -> Result<C::Output, Error> {
    struct Parker {
        unparked: StdMutex<bool>,
        condvar: Condvar,
    }

    impl Parker {
        fn park(&self) {
            let mut unparked = self.unparked.lock().unwrap_or_else(PoisonError::into_inner);
            while !*unparked {
                unparked = self
                    .condvar
                    .wait(unparked)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            // Auto-reset: consume the wake.
            *unparked = false;
        }
    }

    impl Wake for Parker {
        fn wake(&self) {
            let mut unparked = self.unparked.lock().unwrap_or_else(PoisonError::into_inner);
            *unparked = true;
            self.condvar.notify_one();
        }
    }

    let parker = Arc::new(Parker {
        unparked: StdMutex::new(false),
        condvar: Condvar::new(),
    });
    let waker = Waker::new(parker.clone());
    let mut cx = Context::new(&waker);

    loop {
        match computation.poll(&mut cx)? {
            Poll::Ready(value) => return Ok(value),
            Poll::Pending => parker.park(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future;
    use crate::util::test::trace_init;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tick_polls_spawned_tasks() {
        let _trace = trace_init();
        let scheduler = Scheduler::new();
        let worked = Arc::new(AtomicBool::new(false));

        let flag = worked.clone();
        scheduler.spawn_computation(future::map(
            move |()| flag.store(true, Ordering::Release),
            future::yield_now(),
        ));

        let tick = scheduler.tick();
        assert!(worked.load(Ordering::Acquire));
        assert_eq!(tick.completed, 1);
        assert_eq!(tick.polled, 2);
        assert!(!tick.has_remaining);
    }

    #[test]
    fn schedule_many() {
        let _trace = trace_init();
        const TASKS: usize = 10;

        let scheduler = Scheduler::new();
        let completed = Arc::new(AtomicUsize::new(0));

        for _ in 0..TASKS {
            let completed = completed.clone();
            scheduler.spawn_computation(future::map(
                move |()| {
                    completed.fetch_add(1, Ordering::SeqCst);
                },
                future::yield_now(),
            ));
        }

        let tick = scheduler.tick();
        assert_eq!(tick.completed, TASKS);
        assert_eq!(tick.polled, TASKS * 2);
        assert_eq!(completed.load(Ordering::SeqCst), TASKS);
    }

    #[test]
    fn join_handle_returns_the_result() {
        let _trace = trace_init();
        let scheduler = Scheduler::new();
        let handle = scheduler.spawn(&|| future::ready(42));

        let tick = scheduler.tick();
        assert_eq!(tick.completed, 1);
        assert!(handle.is_finished());
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn join_handle_reraises() {
        let _trace = trace_init();
        let scheduler = Scheduler::new();
        let handle = scheduler.spawn_computation(future::map(
            |_: u32| -> u32 { unreachable!("the source always raises") },
            crate::from_fn::<u32, _, _>(|_cx| Err(Error::raised("worker failed")), || {}),
        ));

        scheduler.tick();
        let error = handle.join().unwrap_err();
        assert_eq!(error.to_string(), "worker failed");
    }

    #[test]
    fn cancelled_task_stops_and_joiners_observe_it() {
        let _trace = trace_init();
        let scheduler = Scheduler::new();
        let handle = scheduler.spawn_computation(future::never::<u32>());

        scheduler.tick();
        handle.cancel();
        let tick = scheduler.tick();
        assert_eq!(tick.completed, 1);
        assert!(handle.join().unwrap_err().is_cancelled());
    }

    #[test]
    fn external_wake_reenqueues() {
        let _trace = trace_init();
        let scheduler = Scheduler::new();
        let cell = OnceVar::new();
        let handle = scheduler.spawn_computation(cell.clone());

        assert_eq!(scheduler.tick().completed, 0);

        let writer = cell.clone();
        let thread = std::thread::spawn(move || {
            writer.write(5).unwrap();
        });
        thread.join().expect("writer thread");

        while !handle.is_finished() {
            scheduler.tick();
            std::thread::yield_now();
        }
        assert_eq!(handle.join().unwrap(), 5);
    }

    #[test]
    fn block_on_runs_ready_without_parking() {
        assert_eq!(block_on(future::ready("done")).unwrap(), "done");
    }
}
