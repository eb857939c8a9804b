//! The [`Error`] type returned by this crate's fallible operations.

use std::error;
use std::fmt;
use std::io;

/// Errors produced by [`Loop`] operations.
///
/// [`Loop`]: crate::Loop
#[derive(Debug)]
pub enum Error {
    /// No usable backend (epoll, kqueue, poll) is available on this
    /// platform. Returned only from [`Loop::new`].
    ///
    /// [`Loop::new`]: crate::Loop::new
    NoMechanism,
    /// Allocating heap or queue capacity failed.
    OutOfMemory,
    /// The OS backend failed to register, unregister or wait for events.
    BackendFailure(io::Error),
    /// An operation was attempted while the loop was in a state that
    /// doesn't support it, e.g. changing the number of priorities while an
    /// event is active.
    InvalidState(&'static str),
    /// The requested combination of options is not supported, e.g. a
    /// signal-only one-shot event.
    Unsupported(&'static str),
    /// A signal callback returned an error, aborting the current
    /// [`dispatch`] call.
    ///
    /// [`dispatch`]: crate::Loop::dispatch
    Interrupted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NoMechanism => write!(f, "no event notification mechanism available"),
            Error::OutOfMemory => write!(f, "out of memory"),
            Error::BackendFailure(err) => write!(f, "backend failure: {}", err),
            Error::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            Error::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            Error::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::BackendFailure(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::BackendFailure(err)
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
