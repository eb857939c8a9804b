//! The loop's notion of "now".
//!
//! Production code always runs on [`MonotonicClock`]; [`WallClock`] exists
//! so the backward-clock-jump correction path in [`Loop`] can be exercised
//! by a test without touching the real OS clock.
//!
//! [`Loop`]: crate::Loop

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime};

/// Abstracts the time source a [`Loop`] reads from.
///
/// [`Loop`]: crate::Loop
pub trait Clock: fmt::Debug {
    /// Returns a timestamp, in the form of a `Duration` since some
    /// unspecified, fixed epoch. Only differences between two calls to
    /// `now` are meaningful.
    fn now(&self) -> Duration;

    /// Whether this clock can jump backwards between two calls to `now`.
    /// `Loop` only runs its clock-jump correction pass when this is `true`.
    fn may_jump_backwards(&self) -> bool {
        false
    }
}

/// Clock backed by [`std::time::Instant`], which is monotonic on every
/// platform this crate targets.
#[derive(Debug)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Create a new monotonic clock, anchored at the current instant.
    pub fn new() -> MonotonicClock {
        MonotonicClock { start: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> MonotonicClock {
        MonotonicClock::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Clock backed by [`std::time::SystemTime`].
///
/// Unlike [`MonotonicClock`] this can observe the wall clock being moved
/// backwards (by an administrator, NTP step, etc.), so `Loop` runs its
/// correction pass when this clock is in use. [`WallClock::step_back`] lets
/// tests simulate that without touching the real system clock.
///
/// `now` is anchored at the Unix epoch rather than at construction time:
/// an elapsed-since-start anchor would saturate at zero as soon as
/// `step_back` asked for more than the test had been running, silently
/// truncating the simulated jump to whatever time had actually elapsed.
/// Anchoring at the epoch keeps `now` a large absolute value, so a
/// multi-second `step_back` is reflected in full.
#[derive(Debug)]
pub struct WallClock {
    offset: Duration,
}

impl WallClock {
    /// Create a new wall-clock time source, anchored at the current time.
    pub fn new() -> WallClock {
        WallClock { offset: Duration::from_secs(0) }
    }

    /// Simulate the wall clock jumping backwards by `amount`.
    ///
    /// The next call to `now` will return a value `amount` smaller than it
    /// otherwise would have.
    pub fn step_back(&mut self, amount: Duration) {
        self.offset += amount;
    }
}

impl Default for WallClock {
    fn default() -> WallClock {
        WallClock::new()
    }
}

impl Clock for WallClock {
    fn now(&self) -> Duration {
        let since_epoch = SystemTime::now().duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));
        since_epoch.checked_sub(self.offset).unwrap_or_else(|| Duration::from_secs(0))
    }

    fn may_jump_backwards(&self) -> bool {
        true
    }
}

/// A [`WallClock`] with a handle a test can hold onto after the clock has
/// been moved into a [`Loop`], so it can call [`SharedWallClock::step_back`]
/// between `dispatch` calls to deterministically exercise the
/// backward-clock-jump correction path.
///
/// [`Loop`]: crate::Loop
#[derive(Debug, Clone)]
pub struct SharedWallClock(Rc<RefCell<WallClock>>);

impl SharedWallClock {
    /// Create a new shared wall-clock time source, anchored at the current
    /// time.
    pub fn new() -> SharedWallClock {
        SharedWallClock(Rc::new(RefCell::new(WallClock::new())))
    }

    /// Simulate the wall clock jumping backwards by `amount`, visible to
    /// every clone of this handle (including one already moved into a
    /// [`Loop`]).
    ///
    /// [`Loop`]: crate::Loop
    pub fn step_back(&self, amount: Duration) {
        self.0.borrow_mut().step_back(amount);
    }
}

impl Default for SharedWallClock {
    fn default() -> SharedWallClock {
        SharedWallClock::new()
    }
}

impl Clock for SharedWallClock {
    fn now(&self) -> Duration {
        self.0.borrow().now()
    }

    fn may_jump_backwards(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use std::thread::sleep;

    use super::{Clock, MonotonicClock, SharedWallClock, WallClock};

    #[test]
    fn monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let t0 = clock.now();
        sleep(Duration::from_millis(5));
        let t1 = clock.now();
        assert!(t1 > t0);
        assert!(!clock.may_jump_backwards());
    }

    #[test]
    fn wall_clock_step_back() {
        let mut clock = WallClock::new();
        sleep(Duration::from_millis(5));
        let before = clock.now();
        clock.step_back(Duration::from_secs(1));
        let after = clock.now();
        assert!(after + Duration::from_millis(900) < before);
        assert!(clock.may_jump_backwards());
    }

    #[test]
    fn shared_wall_clock_is_visible_across_clones() {
        let clock = SharedWallClock::new();
        let handle = clock.clone();
        sleep(Duration::from_millis(5));
        let before = clock.now();
        handle.step_back(Duration::from_secs(1));
        let after = clock.now();
        assert!(after + Duration::from_millis(900) < before);
    }
}
