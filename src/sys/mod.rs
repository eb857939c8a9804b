//! Concrete [`Multiplexer`] backends, one module per OS facility.
//!
//! [`Multiplexer`]: crate::multiplexer::Multiplexer

#[cfg(target_os = "linux")]
pub(crate) mod epoll;

#[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))]
pub(crate) mod kqueue;

#[cfg(all(unix, not(any(target_os = "linux", target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))))]
pub(crate) mod poll;

pub(crate) mod signal_backend;
