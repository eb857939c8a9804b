//! Priority starvation: a lower-numbered priority level can starve a
//! higher-numbered one indefinitely. This is documented, tested behavior,
//! not a bug.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use reactor_core::event::{EventId, Interest};
use reactor_core::{DispatchFlags, Loop};

mod util;

#[test]
fn lower_priority_starves_higher() {
    util::init();

    let mut event_loop = Loop::with_priorities(2).expect("new loop");
    let pri0_calls = Rc::new(Cell::new(0));
    let pri1_calls = Rc::new(Cell::new(0));

    // Re-arms with a zero-length timeout: `process_timeouts` sees it as
    // already due within the very same `dispatch` call that just fired it,
    // so priority 0's level is never empty when `next_level` is checked.
    fn rearm(loop_: &mut Loop, id: EventId, calls: Rc<Cell<usize>>) {
        calls.set(calls.get() + 1);
        let next = calls.clone();
        loop_.add(id, None, Interest::TIMEOUT, Some(Duration::from_millis(0)), 0,
            Box::new(move |id, _t, loop_: &mut Loop| rearm(loop_, id, next.clone()))).expect("rearm");
    }

    let pri0 = pri0_calls.clone();
    event_loop.add(EventId(1), None, Interest::TIMEOUT, Some(Duration::from_millis(0)), 0,
        Box::new(move |id, _t, loop_: &mut Loop| rearm(loop_, id, pri0.clone()))).expect("add pri0");

    let pri1 = pri1_calls.clone();
    event_loop.add(EventId(2), None, Interest::TIMEOUT, Some(Duration::from_millis(1)), 1,
        Box::new(move |_id, _t, _loop_| {
            pri1.set(pri1.get() + 1);
        })).expect("add pri1");

    std::thread::sleep(Duration::from_millis(5));

    for _ in 0..10 {
        event_loop.dispatch(DispatchFlags::ONCE).expect("dispatch");
    }

    assert_eq!(pri0_calls.get(), 10);
    assert_eq!(pri1_calls.get(), 0);
}
