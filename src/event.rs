//! Registered interests: the unit of work the dispatch loop tracks.

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;

use crate::loop_::Loop;

/// Identifies a registered [`Event`] within a [`Loop`].
///
/// `EventId` is chosen by the caller, not allocated by the loop (with the
/// exception of [`Loop::once`], which allocates one internally). It does
/// not have to be unique across unrelated events; it is simply the handle
/// the loop uses to look an event back up, and the value a callback
/// receives to know which interest fired.
///
/// [`Loop::once`]: crate::Loop::once
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EventId(
    /// The caller-chosen (or internally allocated) id value.
    pub usize,
);

/// The first id reserved for events allocated internally by a [`Loop`]
/// (e.g. by [`Loop::once`] or the signal bridge). Callers should avoid
/// picking ids at or above this value to prevent collisions.
///
/// [`Loop`]: crate::Loop
pub const INTERNAL_ID_START: usize = usize::max_value() / 2;

bitflags! {
    /// The set of things a registered [`Event`] is interested in.
    pub struct Interest: u8 {
        /// Interested in the associated descriptor becoming readable.
        const READ    = 0b0000_0001;
        /// Interested in the associated descriptor becoming writable.
        const WRITE   = 0b0000_0010;
        /// Interested in a subscribed process signal arriving.
        const SIGNAL  = 0b0000_0100;
        /// Interested in the event's deadline elapsing.
        const TIMEOUT = 0b0000_1000;
        /// The event remains registered after firing, instead of being
        /// removed automatically.
        const PERSIST = 0b0001_0000;
    }
}

bitflags! {
    /// Lifecycle flags tracked internally per [`Event`].
    pub(crate) struct Flags: u8 {
        /// Freshly created, not yet bound to a loop.
        const INIT      = 0b0000_0001;
        /// Registered with the OS backend (fd or signal interest).
        const INSERTED  = 0b0000_0010;
        /// Linked into a priority run-queue, awaiting its callback.
        const ACTIVE    = 0b0000_0100;
        /// Present in the timer heap.
        const TIMEOUT   = 0b0000_1000;
        /// Allocated internally by the loop (e.g. by `once` or the signal
        /// bridge); excluded from public event counts.
        const INTERNAL  = 0b0001_0000;
    }
}

/// A closure invoked when an [`Event`] fires.
pub type Callback = Box<dyn FnMut(EventId, Interest, &mut Loop)>;

/// A single registered interest: an optional descriptor/signal interest,
/// an optional deadline, a priority, and the callback to invoke when
/// either fires.
///
/// `Event` values are not constructed directly by most callers; they are
/// built up by [`Loop::add`] from the pieces passed to it. The type is
/// public so a callback can inspect the id, interest and priority of the
/// event currently firing.
pub struct Event {
    pub(crate) id: EventId,
    pub(crate) interest: Interest,
    pub(crate) token: Option<crate::multiplexer::Token>,
    pub(crate) priority: usize,
    pub(crate) flags: Flags,
    pub(crate) deadline: Option<Duration>,
    pub(crate) triggered: Interest,
    pub(crate) calls_remaining: usize,
    /// Set by [`Loop::add`]/[`Loop::del`] when they touch an event that is
    /// currently mid-callback; [`Loop::fire`] checks this between calls
    /// and stops the remaining invocations if it's set. This is the abort
    /// channel described in `DESIGN.md`.
    ///
    /// [`Loop::add`]: crate::Loop::add
    /// [`Loop::del`]: crate::Loop::del
    /// [`Loop::fire`]: crate::Loop
    pub(crate) aborted: bool,
    pub(crate) callback: Option<Callback>,
}

impl Event {
    pub(crate) fn new(id: EventId, token: Option<crate::multiplexer::Token>, priority: usize, callback: Callback) -> Event {
        Event {
            id,
            interest: Interest::empty(),
            token,
            priority,
            flags: Flags::INIT,
            deadline: None,
            triggered: Interest::empty(),
            calls_remaining: 0,
            aborted: false,
            callback: Some(callback),
        }
    }

    /// The id this event was registered under.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// The interest this event is currently registered for.
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// The priority level this event runs at.
    pub fn priority(&self) -> usize {
        self.priority
    }

    pub(crate) fn is_internal(&self) -> bool {
        self.flags.contains(Flags::INTERNAL)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("interest", &self.interest)
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Interest, EventId};

    #[test]
    fn interest_combination() {
        let interest = Interest::READ | Interest::PERSIST;
        assert!(interest.contains(Interest::READ));
        assert!(interest.contains(Interest::PERSIST));
        assert!(!interest.contains(Interest::WRITE));
    }

    #[test]
    fn event_id_ordering() {
        assert!(EventId(1) < EventId(2));
        assert_eq!(EventId(1), EventId(1));
    }
}
