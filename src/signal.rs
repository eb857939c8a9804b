//! Process signal notifications.
//!
//! A [`Loop`] observes signals through its signal bridge: [`Loop::subscribe_signal`]
//! arranges for a chosen [`EventId`] to activate (with [`Interest::SIGNAL`])
//! whenever the given [`Signal`] arrives. Delivery is kernel-level
//! (`signalfd` on Linux, kqueue's `EVFILT_SIGNAL` on BSD/macOS) rather than
//! a traditional Unix signal handler, so there is no handler-safety
//! concern inside this crate.
//!
//! [`Loop`]: crate::Loop
//! [`Loop::subscribe_signal`]: crate::Loop::subscribe_signal
//! [`Interest::SIGNAL`]: crate::event::Interest::SIGNAL

use std::collections::HashMap;
use std::io;
use std::iter::FusedIterator;
use std::ops::BitOr;

use crate::event::EventId;
use crate::multiplexer::{Multiplexer, Token};

/// Set of [`Signal`]s, used to request a particular combination of signals
/// from the OS backend.
///
/// # Examples
///
/// ```
/// use reactor_core::signal::{Signal, SignalSet};
///
/// let set: SignalSet = Signal::Interrupt | Signal::Quit;
/// assert_eq!(set.size(), 2);
/// assert!(set.contains(Signal::Interrupt));
/// assert!(!set.contains(Signal::Terminate));
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SignalSet(u8);

const INTERRUPT: u8 = 1;
const QUIT: u8 = 1 << 1;
const TERMINATE: u8 = 1 << 2;

impl SignalSet {
    /// An empty set.
    pub const fn empty() -> SignalSet {
        SignalSet(0)
    }

    /// A set containing every signal this crate recognizes.
    pub const fn all() -> SignalSet {
        SignalSet(INTERRUPT | QUIT | TERMINATE)
    }

    /// Number of signals in the set.
    pub const fn size(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether every signal in `other` is also in `self`.
    pub fn contains<S: Into<SignalSet>>(self, other: S) -> bool {
        let other = other.into();
        (self.0 & other.0) == other.0
    }
}

impl From<Signal> for SignalSet {
    fn from(signal: Signal) -> Self {
        SignalSet(match signal {
            Signal::Interrupt => INTERRUPT,
            Signal::Quit => QUIT,
            Signal::Terminate => TERMINATE,
        })
    }
}

impl BitOr for SignalSet {
    type Output = SignalSet;
    fn bitor(self, rhs: Self) -> Self {
        SignalSet(self.0 | rhs.0)
    }
}

impl BitOr<Signal> for SignalSet {
    type Output = SignalSet;
    fn bitor(self, rhs: Signal) -> Self {
        self | Into::<SignalSet>::into(rhs)
    }
}

impl IntoIterator for SignalSet {
    type Item = Signal;
    type IntoIter = SignalSetIter;
    fn into_iter(self) -> Self::IntoIter {
        SignalSetIter(self)
    }
}

/// Iterator over the signals in a [`SignalSet`]. Iteration order is
/// undefined.
#[derive(Debug)]
pub struct SignalSetIter(SignalSet);

impl Iterator for SignalSetIter {
    type Item = Signal;

    fn next(&mut self) -> Option<Self::Item> {
        let n = (self.0).0.trailing_zeros();
        match n {
            0 => Some(Signal::Interrupt),
            1 => Some(Signal::Quit),
            2 => Some(Signal::Terminate),
            _ => None,
        }.map(|signal| {
            (self.0).0 &= !(1 << n);
            signal
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let size = self.0.size();
        (size, Some(size))
    }

    fn count(self) -> usize {
        self.0.size()
    }
}

impl ExactSizeIterator for SignalSetIter {
    fn len(&self) -> usize {
        self.0.size()
    }
}

impl FusedIterator for SignalSetIter {}

/// A process signal a [`Loop`] can subscribe to.
///
/// [`Loop`]: crate::Loop
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Signal {
    /// POSIX `SIGINT`, typically sent by Ctrl+C in a controlling terminal.
    Interrupt,
    /// POSIX `SIGTERM`, a polite request to terminate.
    Terminate,
    /// POSIX `SIGQUIT`, a request to terminate and dump core.
    Quit,
}

impl Signal {
    pub(crate) fn into_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Quit => libc::SIGQUIT,
            Signal::Terminate => libc::SIGTERM,
        }
    }

    pub(crate) fn from_raw(raw_signal: libc::c_int) -> Option<Signal> {
        match raw_signal {
            libc::SIGINT => Some(Signal::Interrupt),
            libc::SIGQUIT => Some(Signal::Quit),
            libc::SIGTERM => Some(Signal::Terminate),
            _ => None,
        }
    }
}

impl BitOr for Signal {
    type Output = SignalSet;
    fn bitor(self, rhs: Self) -> SignalSet {
        Into::<SignalSet>::into(self) | rhs
    }
}

impl BitOr<SignalSet> for Signal {
    type Output = SignalSet;
    fn bitor(self, rhs: SignalSet) -> SignalSet {
        rhs | self
    }
}

/// Bridges kernel-level signal delivery into a [`Loop`]'s priority
/// run-queue: it owns the backend fd registered with the active
/// [`Multiplexer`] and the table of which [`EventId`]s are interested in
/// which [`Signal`].
///
/// [`Loop`]: crate::Loop
pub(crate) struct SignalBridge {
    backend: crate::sys::signal_backend::SignalBackend,
    token: Token,
    subscribed: SignalSet,
    subscribers: HashMap<Signal, Vec<EventId>>,
}

impl SignalBridge {
    /// Create a bridge with no signals subscribed yet. Does not touch the
    /// multiplexer; call [`Self::ensure_registered`] once at least one
    /// subscription exists.
    pub(crate) fn new() -> io::Result<SignalBridge> {
        Ok(SignalBridge {
            backend: crate::sys::signal_backend::SignalBackend::new(SignalSet::empty())?,
            token: Token(-1),
            subscribed: SignalSet::empty(),
            subscribers: HashMap::new(),
        })
    }

    /// Subscribe `id` to `signal`, (re)building the backend if `signal`
    /// wasn't already covered by the current signal mask.
    pub(crate) fn subscribe(&mut self, multiplexer: &mut dyn Multiplexer, signal: Signal, id: EventId, own_id: EventId) -> io::Result<()> {
        self.subscribers.entry(signal).or_insert_with(Vec::new).push(id);
        if self.subscribed.contains(signal) {
            return Ok(());
        }
        self.subscribed = self.subscribed | signal;
        let old_token = self.token;
        self.backend = crate::sys::signal_backend::SignalBackend::new(self.subscribed)?;
        self.token = Token(self.backend.raw_fd());
        if old_token.0 != -1 {
            multiplexer.del(old_token)?;
        }
        multiplexer.add(self.token, own_id, crate::event::Interest::READ)
    }

    /// Remove `id` from every signal's subscriber list. The signal mask
    /// registered with the backend is left as-is: a delivered signal with
    /// no remaining subscriber is simply dropped by `drain`.
    pub(crate) fn unsubscribe(&mut self, id: EventId) {
        for ids in self.subscribers.values_mut() {
            ids.retain(|&subscriber| subscriber != id);
        }
    }

    /// Drain every pending signal from the backend, returning the ids to
    /// activate for each one received.
    pub(crate) fn drain(&mut self) -> io::Result<Vec<EventId>> {
        let mut activated = Vec::new();
        while let Some(signal) = self.backend.receive()? {
            if let Some(ids) = self.subscribers.get(&signal) {
                activated.extend(ids.iter().copied());
            }
        }
        Ok(activated)
    }
}

#[cfg(test)]
mod tests {
    use super::{Signal, SignalBridge};
    use crate::event::EventId;

    // Further coverage lives in `tests/signal.rs`; these only cover the
    // conversions that aren't part of the public API.

    #[test]
    fn signal_from_raw() {
        assert_eq!(Signal::from_raw(libc::SIGINT), Some(Signal::Interrupt));
        assert_eq!(Signal::from_raw(libc::SIGQUIT), Some(Signal::Quit));
        assert_eq!(Signal::from_raw(libc::SIGTERM), Some(Signal::Terminate));
        assert_eq!(Signal::from_raw(libc::SIGSTOP), None);
    }

    #[test]
    fn signal_into_raw() {
        assert_eq!(Signal::Interrupt.into_raw(), libc::SIGINT);
        assert_eq!(Signal::Quit.into_raw(), libc::SIGQUIT);
        assert_eq!(Signal::Terminate.into_raw(), libc::SIGTERM);
    }

    #[test]
    fn unsubscribe_removes_id_from_every_signal() {
        let mut bridge = SignalBridge::new().expect("new signal bridge");
        bridge.subscribers.entry(Signal::Interrupt).or_insert_with(Vec::new).push(EventId(1));
        bridge.subscribers.entry(Signal::Terminate).or_insert_with(Vec::new).push(EventId(1));
        bridge.subscribers.entry(Signal::Terminate).or_insert_with(Vec::new).push(EventId(2));

        bridge.unsubscribe(EventId(1));

        assert!(bridge.subscribers[&Signal::Interrupt].is_empty());
        assert_eq!(bridge.subscribers[&Signal::Terminate], vec![EventId(2)]);
    }
}
