//! Cross-thread and scheduler-driven exercises of the sync primitives.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enoki::sync::{Barrier, Mutex, Notify, RwLock, Semaphore};
use enoki::{block_on, future, OnceVar, Scheduler};

#[test]
fn mutex_excludes_across_threads() {
    const THREADS: usize = 8;
    const ITERS: usize = 100;

    let mutex = Mutex::new(0u64);
    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                for _ in 0..ITERS {
                    let mut guard = block_on(mutex.lock()).expect("lock never raises");
                    *guard += 1;
                }
            });
        }
    });
    assert_eq!(*block_on(mutex.lock()).unwrap(), (THREADS * ITERS) as u64);
}

#[test]
fn mutex_owned_guards_work_under_a_scheduler() {
    const TASKS: usize = 6;

    let scheduler = Scheduler::new();
    let mutex = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..TASKS)
        .map(|id| {
            let mutex = mutex.clone();
            scheduler.spawn_computation(future::map(
                move |mut guard: enoki::sync::OwnedMutexGuard<Vec<usize>>| {
                    guard.push(id);
                },
                mutex.lock_owned(),
            ))
        })
        .collect();

    while handles.iter().any(|handle| !handle.is_finished()) {
        scheduler.tick();
    }

    let seen = block_on(mutex.lock_owned()).unwrap();
    assert_eq!(seen.len(), TASKS);
    // FIFO handoff preserves spawn order.
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn semaphore_bounds_concurrency() {
    const PERMITS: usize = 3;
    const THREADS: usize = 12;

    let semaphore = Semaphore::new(PERMITS);
    let running = AtomicUsize::new(0);
    let high_water = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            scope.spawn(|| {
                let permit = block_on(semaphore.acquire()).expect("acquire never raises");
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(1));
                running.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }
    });

    assert!(high_water.load(Ordering::SeqCst) <= PERMITS);
    assert_eq!(semaphore.available_permits(), PERMITS);
}

#[test]
fn rwlock_allows_reader_batches_between_writers() {
    let lock = RwLock::new(0u32);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let guard = block_on(lock.read()).expect("read never raises");
                    let seen = *guard;
                    drop(guard);
                    assert!(seen <= 200);
                }
            });
        }
        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..100 {
                    let mut guard = block_on(lock.write()).expect("write never raises");
                    *guard += 1;
                }
            });
        }
    });
    assert_eq!(*block_on(lock.read()).unwrap(), 200);
}

#[test]
fn barrier_releases_batches_with_one_leader() {
    const PARTICIPANTS: usize = 5;

    let barrier = Barrier::new(PARTICIPANTS);
    let leaders = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for _ in 0..PARTICIPANTS {
            scope.spawn(|| {
                let result = block_on(barrier.wait()).expect("wait never raises");
                if result.is_leader() {
                    leaders.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(leaders.load(Ordering::SeqCst), 1);
}

#[test]
fn notify_wakes_a_parked_waiter() {
    let notify = Arc::new(Notify::new());

    let waker_side = notify.clone();
    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(5));
        waker_side.notify_one();
    });

    block_on(notify.notified()).expect("notified never raises");
    thread.join().expect("notifier thread");
}

#[test]
fn once_var_handoff_between_spawned_tasks() {
    let scheduler = Scheduler::new();
    let cell: OnceVar<u32> = OnceVar::new();

    let reader = scheduler.spawn_computation(cell.clone());
    let writer_cell = cell.clone();
    let writer = scheduler.spawn_computation(future::lazy(move || {
        writer_cell.write(11).expect("single writer");
    }));

    while !reader.is_finished() || !writer.is_finished() {
        scheduler.tick();
    }
    assert_eq!(reader.join().unwrap(), 11);
}

#[test]
fn wake_between_pending_and_park_is_not_lost() {
    // The writer fires while the consumer is between "saw Pending" and
    // "parked"; the driver must still unblock.
    for _ in 0..100 {
        let cell = OnceVar::new();
        let writer = cell.clone();
        let thread = std::thread::spawn(move || {
            writer.write(1u8).expect("single writer");
        });
        assert_eq!(block_on(cell).unwrap(), 1);
        thread.join().expect("writer thread");
    }
}
