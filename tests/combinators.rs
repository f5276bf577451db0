//! End-to-end scenarios for the combinator algebra.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use enoki::time::Timer;
use enoki::{
    block_on, cancel_fuse, from_fn, future, Computation, Context, Error, OnceVar, Poll, PollResult,
    Waker,
};

fn poll_once<C: Computation>(computation: &mut C) -> PollResult<C::Output> {
    let waker = Waker::noop();
    let mut cx = Context::new(&waker);
    computation.poll(&mut cx)
}

/// A computation that returns `Pending` `n` times (waking itself each time,
/// like a yield) before completing with `value`.
fn pending_then<T: Clone>(
    n: usize,
    value: T,
) -> impl Computation<Output = T> {
    let mut remaining = n;
    from_fn(
        move |cx: &mut Context<'_>| {
            if remaining == 0 {
                return Ok(Poll::Ready(value.clone()));
            }
            remaining -= 1;
            cx.waker().wake();
            Ok(Poll::Pending)
        },
        || {},
    )
}

/// A never-ready computation that records whether it was cancelled.
fn cancel_probe<T>(flag: &Rc<Cell<bool>>) -> impl Computation<Output = T> {
    let flag = flag.clone();
    from_fn(
        |_cx: &mut Context<'_>| Ok(Poll::Pending),
        move || flag.set(true),
    )
}

#[test]
fn ready_completes_immediately() {
    assert_eq!(block_on(future::ready(42)).unwrap(), 42);
}

#[test]
fn map_applies_and_memoizes() {
    assert_eq!(
        block_on(future::map(|n: i32| n + 1, future::ready(41))).unwrap(),
        42
    );

    let mut mapped = future::map(|n: i32| n + 1, future::ready(41));
    assert_eq!(poll_once(&mut mapped).unwrap(), Poll::Ready(42));
    assert_eq!(poll_once(&mut mapped).unwrap(), Poll::Ready(42));
}

#[test]
fn bind_chains() {
    let chained = future::bind(|a: i32| future::ready(a * 2), future::ready(21));
    assert_eq!(block_on(chained).unwrap(), 42);
}

#[test]
fn bind_traverses_pending_sources() {
    let chained = future::bind(
        |a: i32| pending_then(2, a + 2),
        pending_then(3, 40),
    );
    assert_eq!(block_on(chained).unwrap(), 42);
}

#[test]
fn merge_pairs_both_sides() {
    assert_eq!(
        block_on(future::merge(future::ready("a"), future::ready(1))).unwrap(),
        ("a", 1)
    );
}

#[test]
fn merge_waits_for_the_slower_side() {
    let merged = future::merge(pending_then(3, 'l'), pending_then(1, 'r'));
    assert_eq!(block_on(merged).unwrap(), ('l', 'r'));
}

#[test]
fn merge_polls_left_then_right() {
    let order = Rc::new(std::cell::RefCell::new(Vec::new()));
    let record = |tag: &'static str| {
        let order = order.clone();
        from_fn(
            move |_cx: &mut Context<'_>| {
                order.borrow_mut().push(tag);
                Ok(Poll::Ready(()))
            },
            || {},
        )
    };

    let mut merged = future::merge(record("left"), record("right"));
    assert!(poll_once(&mut merged).unwrap().is_ready());
    assert_eq!(*order.borrow(), ["left", "right"]);
}

#[test]
fn first_favors_the_ready_side_and_cancels_the_loser() {
    let cancelled = Rc::new(Cell::new(false));
    let loser = cancel_probe::<&str>(&cancelled);

    let raced = future::first(loser, future::ready("R"));
    assert_eq!(block_on(raced).unwrap(), "R");
    assert!(cancelled.get(), "the losing side must be cancelled");
}

#[test]
fn first_against_a_sleep_takes_the_immediate_value() {
    let timer = Timer::new();
    let slow = future::bind(
        |()| future::ready("L"),
        timer.sleep(Duration::from_millis(10)),
    );
    let raced = future::first(slow, future::ready("R"));
    assert_eq!(block_on(raced).unwrap(), "R");
}

#[test]
fn first_ties_favor_the_left() {
    let raced = future::first(future::ready("L"), future::ready("R"));
    assert_eq!(block_on(raced).unwrap(), "L");
}

#[test]
fn apply_combines_function_and_argument() {
    let applied = future::apply(future::ready(|n: i32| n + 1), pending_then(2, 41));
    assert_eq!(block_on(applied).unwrap(), 42);
}

#[test]
fn join_flattens() {
    let nested = future::join(future::ready(future::ready(7)));
    assert_eq!(block_on(nested).unwrap(), 7);
}

#[test]
fn lazy_runs_once() {
    let runs = Rc::new(Cell::new(0));
    let counter = runs.clone();
    let mut lazy = future::lazy(move || {
        counter.set(counter.get() + 1);
        9
    });

    assert_eq!(poll_once(&mut lazy).unwrap(), Poll::Ready(9));
    assert_eq!(poll_once(&mut lazy).unwrap(), Poll::Ready(9));
    assert_eq!(runs.get(), 1);
}

#[test]
fn delay_defers_construction() {
    let built = Rc::new(Cell::new(false));
    let flag = built.clone();
    let mut delayed = future::delay(move || {
        flag.set(true);
        future::ready(1)
    });

    assert!(!built.get());
    assert_eq!(poll_once(&mut delayed).unwrap(), Poll::Ready(1));
    assert!(built.get());
}

#[test]
fn catch_reifies_raised_errors() {
    let caught = future::catch(from_fn::<i32, _, _>(
        |_cx| Err(Error::raised("exploded")),
        || {},
    ));
    let result = block_on(caught).unwrap();
    assert_eq!(result.unwrap_err().to_string(), "exploded");

    let passed = future::catch(future::ready(3));
    assert_eq!(block_on(passed).unwrap().unwrap(), 3);
}

#[test]
fn ignore_discards_the_value() {
    block_on(future::ignore(future::ready("whatever"))).unwrap();
}

#[test]
fn yields_complete_under_the_driver() {
    let computation = future::bind(|()| future::ready(42), future::yield_now());
    assert_eq!(block_on(computation).unwrap(), 42);

    block_on(future::for_each(0..3, |_| future::yield_now())).unwrap();
}

#[test]
fn for_each_resumes_mid_item() {
    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let log = seen.clone();
    let looped = future::for_each(0..3, move |item| {
        let log = log.clone();
        future::map(move |()| log.borrow_mut().push(item), future::yield_now())
    });

    block_on(looped).unwrap();
    assert_eq!(*seen.borrow(), [0, 1, 2]);
}

#[test]
fn for_each_cancellation_is_sticky() {
    let mut looped = future::for_each(0..10, |_| future::yield_now());
    assert!(poll_once(&mut looped).unwrap().is_pending());
    looped.cancel();
    assert!(poll_once(&mut looped).unwrap_err().is_cancelled());
    assert!(poll_once(&mut looped).unwrap_err().is_cancelled());
}

#[test]
fn once_var_rendezvous() {
    let cell = OnceVar::new();
    let writer = cell.clone();
    let thread = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(5));
        writer.write(7).unwrap();
    });

    assert_eq!(block_on(cell.clone()).unwrap(), 7);
    thread.join().expect("writer thread");
    assert_eq!(cell.try_write(9), Err(9));
}

#[test]
fn cancelled_delay_raises_through_a_fuse() {
    let mut computation = cancel_fuse(future::delay(|| {
        future::merge(future::never::<i32>(), future::ready(1))
    }));
    computation.cancel();
    assert!(poll_once(&mut computation).unwrap_err().is_cancelled());
}

#[test]
fn cancellation_is_idempotent() {
    let cancels = Rc::new(Cell::new(0));
    let counter = cancels.clone();
    let mut computation = cancel_fuse(from_fn::<i32, _, _>(
        |_cx| Ok(Poll::Pending),
        move || counter.set(counter.get() + 1),
    ));

    computation.cancel();
    computation.cancel();
    computation.cancel();
    assert_eq!(cancels.get(), 1, "the fuse forwards cancel exactly once");
}

#[test]
fn merge_latches_the_first_error_and_cancels_the_sibling() {
    let cancelled = Rc::new(Cell::new(false));
    let sibling = cancel_probe::<i32>(&cancelled);
    let failing = from_fn::<i32, _, _>(|_cx| Err(Error::raised("left broke")), || {});

    let mut merged = future::merge(failing, sibling);
    let one = poll_once(&mut merged).unwrap_err();
    assert!(cancelled.get(), "the healthy side must be cancelled");
    let two = poll_once(&mut merged).unwrap_err();
    assert!(one.same_raised(&two), "every later poll re-raises the same error");
}

#[test]
fn first_latches_errors_the_same_way() {
    let cancelled = Rc::new(Cell::new(false));
    let sibling = cancel_probe::<i32>(&cancelled);
    let failing = from_fn::<i32, _, _>(|_cx| Err(Error::raised("right broke")), || {});

    let mut raced = future::first(sibling, failing);
    let one = poll_once(&mut raced).unwrap_err();
    assert!(cancelled.get());
    let two = poll_once(&mut raced).unwrap_err();
    assert!(one.same_raised(&two));
}

#[test]
fn monotone_after_ready() {
    let mut merged = future::merge(future::ready(1), pending_then(2, 2));
    loop {
        match poll_once(&mut merged).unwrap() {
            Poll::Pending => continue,
            Poll::Ready(pair) => {
                assert_eq!(pair, (1, 2));
                break;
            }
        }
    }
    for _ in 0..3 {
        assert_eq!(poll_once(&mut merged).unwrap(), Poll::Ready((1, 2)));
    }
}
