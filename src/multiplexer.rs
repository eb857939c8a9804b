//! The `Multiplexer` trait: the one thing a [`Loop`] needs from the
//! underlying OS readiness backend.
//!
//! [`Loop`]: crate::Loop

use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

use log::debug;

use crate::error::{Error, Result};
use crate::event::{EventId, Interest};

/// A raw OS handle a [`Multiplexer`] watches for readiness: a file
/// descriptor on Unix.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Token(
    /// The raw file descriptor this token watches.
    pub RawFd,
);

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({})", self.0)
    }
}

/// One readiness notification produced by a [`Multiplexer::dispatch`]
/// call: the id that was registered for `token`, and which interests
/// fired.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    /// The id that was registered for the token that became ready.
    pub id: EventId,
    /// Which interests fired (a subset of what was registered).
    pub interest: Interest,
}

/// Abstracts an OS readiness backend (epoll, kqueue, `poll(2)`, ...).
///
/// A [`Loop`] owns exactly one `Multiplexer` for its entire lifetime,
/// constructed once by [`select_backend`] and possibly replaced wholesale
/// by [`Loop::reinit_after_fork`].
///
/// [`Loop`]: crate::Loop
/// [`Loop::reinit_after_fork`]: crate::Loop::reinit_after_fork
pub trait Multiplexer: fmt::Debug {
    /// Register interest in `token` for `interest` under `id`.
    fn add(&mut self, token: Token, id: EventId, interest: Interest) -> io::Result<()>;

    /// Remove any interest previously registered for `token`.
    fn del(&mut self, token: Token) -> io::Result<()>;

    /// Block for at most `deadline` (or indefinitely if `None`, or return
    /// immediately if `Some(Duration::from_secs(0))`), appending any
    /// readiness notifications to `out`.
    fn dispatch(&mut self, out: &mut Vec<ReadyEvent>, deadline: Option<Duration>) -> io::Result<()>;

    /// Whether this backend's internal state must be torn down and
    /// recreated after `fork(2)`. Note: [`Loop::reinit_after_fork`] always
    /// reinitializes regardless of this value; see `DESIGN.md`.
    ///
    /// [`Loop::reinit_after_fork`]: crate::Loop::reinit_after_fork
    fn needs_reinit(&self) -> bool;

    /// A short name for diagnostics (used by the `EVENT_SHOW_METHOD`
    /// environment variable).
    fn name(&self) -> &'static str;
}

/// Construct the best available [`Multiplexer`] for this platform.
///
/// Selection order, first available wins: kqueue, epoll, `poll(2)`. Event
/// ports, `/dev/poll`, `select` and a Win32 equivalent are architecturally
/// supported through the `Multiplexer` trait but have no concrete
/// implementation in this crate.
///
/// If the `EVENT_SHOW_METHOD` environment variable is set, the name of the
/// selected backend is logged at `debug` level. This has no effect on
/// behavior.
pub fn select_backend() -> Result<Box<dyn Multiplexer>> {
    #[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))]
    let backend: Box<dyn Multiplexer> = Box::new(crate::sys::kqueue::KqueueMultiplexer::new()?);

    #[cfg(target_os = "linux")]
    let backend: Box<dyn Multiplexer> = Box::new(crate::sys::epoll::EpollMultiplexer::new()?);

    #[cfg(all(unix, not(any(target_os = "linux", target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))))]
    let backend: Box<dyn Multiplexer> = Box::new(crate::sys::poll::PollMultiplexer::new()?);

    #[cfg(not(unix))]
    return Err(Error::NoMechanism);

    #[cfg(unix)]
    {
        if std::env::var_os("EVENT_SHOW_METHOD").is_some() {
            debug!("using {} as event notification mechanism", backend.name());
        }
        Ok(backend)
    }
}
