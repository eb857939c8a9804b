//! Tests for [`SignalSet`]/[`Signal`] combinators and signal delivery
//! through a [`Loop`]'s signal bridge.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use reactor_core::event::{EventId, Interest};
use reactor_core::signal::{Signal, SignalSet};
use reactor_core::{DispatchFlags, Loop};

mod util;

#[test]
fn signal_bit_or() {
    assert_eq!(Signal::Terminate | Signal::Quit | Signal::Interrupt, SignalSet::all());
    assert_eq!(Signal::Terminate | SignalSet::empty(), Signal::Terminate.into());
    assert_eq!(SignalSet::empty() | Signal::Quit, Signal::Quit.into());
    assert_eq!(Signal::Terminate | Signal::Terminate, Signal::Terminate.into());
    assert_eq!(Signal::Terminate | SignalSet::all(), SignalSet::all());
    assert_eq!(SignalSet::all() | Signal::Quit, SignalSet::all());
}

#[test]
fn signal_set_contains_and_size() {
    let tests: Vec<(SignalSet, usize, Vec<Signal>)> = vec![
        (SignalSet::empty(), 0, vec![]),
        (SignalSet::all(), 3, vec![Signal::Interrupt, Signal::Terminate, Signal::Quit]),
        (Signal::Interrupt.into(), 1, vec![Signal::Interrupt]),
        (Signal::Interrupt | Signal::Terminate, 2, vec![Signal::Interrupt, Signal::Terminate]),
    ];

    for (set, size, expected) in tests {
        assert_eq!(set.size(), size);
        for signal in &expected {
            assert!(set.contains(*signal));
        }
        let signals: Vec<Signal> = set.into_iter().collect();
        assert_eq!(signals.len(), expected.len());
        for signal in expected {
            assert!(signals.contains(&signal));
        }
    }
}

#[test]
fn subscribed_signal_activates_event() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    let got = Rc::new(Cell::new(false));
    let triggered_mask = Rc::new(Cell::new(Interest::empty()));

    let got2 = got.clone();
    let mask2 = triggered_mask.clone();
    event_loop.subscribe_signal(Signal::Terminate, EventId(1), 0,
        Box::new(move |_id, triggered, _loop_| {
            got2.set(true);
            mask2.set(triggered);
        })).expect("subscribe to SIGTERM");

    // `subscribe_signal` blocks the signal via `sigprocmask` before this
    // point, so raising it here queues a delivery on the signal bridge's
    // backend fd instead of running the default disposition.
    if unsafe { libc::raise(libc::SIGTERM) } != 0 {
        panic!("failed to raise SIGTERM: {}", std::io::Error::last_os_error());
    }

    // Give the backend a moment to observe the signalfd/kqueue readiness.
    std::thread::sleep(Duration::from_millis(20));
    event_loop.dispatch(DispatchFlags::ONCE).expect("dispatch");

    assert!(got.get(), "signal callback should have run");
    assert!(triggered_mask.get().contains(Interest::SIGNAL));
}

#[test]
fn signal_only_once_is_rejected() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    let result = event_loop.once(None, Interest::SIGNAL, None, 0, |_id, _t, _loop_| {});
    util::assert_error(result, "unsupported: signal-only one-shot events are not supported");
}

#[test]
fn subscribed_signal_counts_as_registered_and_cleans_up_on_del() {
    util::init();

    let mut event_loop = Loop::new().expect("new loop");
    assert_eq!(event_loop.event_count(), 0);

    event_loop.subscribe_signal(Signal::Interrupt, EventId(1), 0,
        Box::new(|_id, _triggered, _loop_| {})).expect("subscribe to SIGINT");
    assert_eq!(event_loop.event_count(), 1, "a signal subscription is a live, non-internal registration");
    assert!(event_loop.pending(EventId(1)).is_some());

    event_loop.del(EventId(1)).expect("del signal subscription");
    assert_eq!(event_loop.event_count(), 0);
    assert!(event_loop.pending(EventId(1)).is_none());
}
