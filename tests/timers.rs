//! Timer-specific behavior: deadline replacement and backward clock-jump
//! correction.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use reactor_core::clock::SharedWallClock;
use reactor_core::event::{EventId, Interest};
use reactor_core::{DispatchFlags, Loop};

mod util;

#[test]
fn readd_with_new_timeout_replaces_deadline() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    event_loop.add(EventId(1), None, Interest::TIMEOUT, Some(Duration::from_secs(60)), 0,
        Box::new(|_id, _t, _loop_| {})).expect("add");
    let first = event_loop.pending(EventId(1)).expect("pending").remaining;

    event_loop.add(EventId(1), None, Interest::TIMEOUT, Some(Duration::from_millis(1)), 0,
        Box::new(|_id, _t, _loop_| {})).expect("re-add");
    let second = event_loop.pending(EventId(1)).expect("pending").remaining;

    assert!(second < first);
}

#[test]
fn clock_jump_back_is_corrected() {
    util::init();

    let clock = SharedWallClock::new();
    let mut event_loop = Loop::with_clock(1, Box::new(clock.clone())).expect("new loop");

    let fired = Rc::new(Cell::new(false));
    let fired2 = fired.clone();
    event_loop.add(EventId(1), None, Interest::TIMEOUT, Some(Duration::from_millis(100)), 0,
        Box::new(move |_id, _t, _loop_| {
            fired2.set(true);
        })).expect("add timer");

    // Force a dispatch iteration to record `woke_at`, without anything
    // becoming ready yet.
    event_loop.dispatch(DispatchFlags::NONBLOCK).expect("warm-up dispatch");
    assert!(!fired.get());

    // Move the wall clock back by a full second: far enough that, if the
    // loop didn't correct the heap, the 100ms timer wouldn't be due for
    // over a second. `clock` and the one the loop holds share state, so
    // this is visible to `Loop` on its next cycle.
    clock.step_back(Duration::from_secs(1));

    let since_jump = Instant::now();
    std::thread::sleep(Duration::from_millis(110));
    event_loop.dispatch(DispatchFlags::ONCE).expect("dispatch after deadline");
    let waited = since_jump.elapsed();

    assert!(fired.get(), "timer should fire ~100ms after being armed despite the clock jump");
    // `Instant` is a real, uncorrected monotonic clock: if the heap hadn't
    // been shifted back by the same ~1s the wall clock jumped, the timer
    // wouldn't be due until ~1.1s had passed here, not ~110ms.
    assert!(waited < Duration::from_millis(500),
        "timer fired after {:?}, which is consistent with the clock jump not being corrected", waited);
}
