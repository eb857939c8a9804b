//! Tests for the core dispatch cycle: one-shot timers, self-deletion,
//! re-arming and breaking mid-drain.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use reactor_core::event::{EventId, Interest};
use reactor_core::{DispatchFlags, DispatchOutcome, Loop};

mod util;

#[test]
fn pure_timer_fires_once() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    let calls = Rc::new(Cell::new(0));
    let mask = Rc::new(Cell::new(Interest::empty()));

    let calls2 = calls.clone();
    let mask2 = mask.clone();
    event_loop.add(EventId(1), None, Interest::TIMEOUT, Some(Duration::from_millis(50)), 0,
        Box::new(move |_id, triggered, _loop_| {
            calls2.set(calls2.get() + 1);
            mask2.set(triggered);
        })).expect("add timer");

    let outcome = event_loop.dispatch(DispatchFlags::ONCE).expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::Ok);
    assert_eq!(calls.get(), 1);
    assert!(mask.get().contains(Interest::TIMEOUT));
}

#[test]
fn no_events_returns_no_events() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    let outcome = event_loop.dispatch(DispatchFlags::ONCE).expect("dispatch");
    assert_eq!(outcome, DispatchOutcome::NoEvents);
}

#[test]
fn self_delete_does_not_requeue() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    event_loop.add(EventId(1), None, Interest::TIMEOUT, Some(Duration::from_millis(1)), 0,
        Box::new(|id, _triggered, loop_: &mut Loop| {
            loop_.del(id).expect("del self");
        })).expect("add timer");

    event_loop.dispatch(DispatchFlags::ONCE).expect("dispatch");
    assert!(event_loop.pending(EventId(1)).is_none());
    assert_eq!(event_loop.event_count(), 0);
}

#[test]
fn rearm_during_callback_replaces_deadline() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    let fires = Rc::new(Cell::new(0));

    let fires2 = fires.clone();
    event_loop.add(EventId(1), None, Interest::TIMEOUT | Interest::PERSIST, Some(Duration::from_millis(1)), 0,
        Box::new(move |id, _triggered, loop_: &mut Loop| {
            let n = fires2.get() + 1;
            fires2.set(n);
            let fires3 = fires2.clone();
            loop_.add(id, None, Interest::TIMEOUT | Interest::PERSIST, Some(Duration::from_millis(1)), 0,
                Box::new(move |id2, _t, loop2: &mut Loop| {
                    fires3.set(fires3.get() + 1);
                    let _ = loop2.del(id2);
                })).expect("re-add");
        })).expect("add timer");

    event_loop.dispatch(DispatchFlags::ONCE).expect("first dispatch");
    assert_eq!(fires.get(), 1);
    event_loop.dispatch(DispatchFlags::ONCE).expect("second dispatch");
    assert_eq!(fires.get(), 2);
}

#[test]
fn break_mid_drain_defers_remaining_events() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    let order = Rc::new(RefCell::new(Vec::new()));

    let order1 = order.clone();
    event_loop.add(EventId(1), None, Interest::TIMEOUT, Some(Duration::from_millis(1)), 0,
        Box::new(move |_id, _triggered, loop_: &mut Loop| {
            order1.borrow_mut().push(1);
            loop_.break_now();
        })).expect("add first");

    let order2 = order.clone();
    event_loop.add(EventId(2), None, Interest::TIMEOUT, Some(Duration::from_millis(5)), 0,
        Box::new(move |_id, _triggered, _loop_| {
            order2.borrow_mut().push(2);
        })).expect("add second");

    // Give both timers a chance to expire before the first dispatch call.
    std::thread::sleep(Duration::from_millis(10));

    let outcome = event_loop.dispatch(DispatchFlags::NONBLOCK).expect("first dispatch");
    assert_eq!(outcome, DispatchOutcome::Ok);
    assert_eq!(*order.borrow(), vec![1]);

    event_loop.dispatch(DispatchFlags::ONCE).expect("second dispatch");
    assert_eq!(*order.borrow(), vec![1, 2]);
}
