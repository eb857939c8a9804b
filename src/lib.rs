//! A portable, callback-driven event loop core: one thread, one dispatch
//! cycle, readiness and timers unified behind a single priority run-queue.
//!
//! # Goals
//!
//! * A single, low-level [`Loop`] abstraction over epoll, kqueue and
//!   `poll(2)`.
//! * Deadlines and readiness interests share one callback-firing path, so
//!   callers don't juggle a separate timer wheel.
//! * Starvation-aware priorities: lower-numbered levels always drain
//!   before higher-numbered ones, and callers can rely on that ordering.
//! * Safe self-deletion and re-arming from inside a running callback.
//!
//! # Usage
//!
//! A [`Loop`] is driven by repeatedly calling [`Loop::dispatch`]. Readiness
//! interests are registered with [`Loop::add`]; a relative timeout can be
//! attached to the same call, or used on its own with `fd: None`.
//!
//! This crate is single-threaded by design: [`Loop`] is neither [`Send`]
//! nor [`Sync`]. Fork a process before constructing a [`Loop`], or call
//! [`Loop::reinit_after_fork`] in the child if that isn't possible.
//!
//! # Examples
//!
//! A timer that fires once.
//!
//! ```
//! use std::time::Duration;
//!
//! use reactor_core::{DispatchFlags, Loop};
//!
//! # fn main() -> reactor_core::error::Result<()> {
//! let mut event_loop = Loop::new()?;
//! let fired = std::rc::Rc::new(std::cell::Cell::new(false));
//!
//! let inner = fired.clone();
//! event_loop.once(None, reactor_core::event::Interest::TIMEOUT, Some(Duration::from_millis(1)), 0, move |_id, _interest, _loop_| {
//!     inner.set(true);
//! })?;
//!
//! event_loop.dispatch(DispatchFlags::ONCE)?;
//! assert!(fired.get());
//! # Ok(())
//! # }
//! ```

#![warn(anonymous_parameters,
        bare_trait_objects,
        missing_debug_implementations,
        missing_docs,
        trivial_casts,
        trivial_numeric_casts,
        unused_extern_crates,
        unused_import_braces,
        unused_qualifications,
)]

// Disallow warnings when running tests.
#![cfg_attr(test, deny(warnings))]

pub mod clock;
pub mod error;
pub mod event;
pub mod multiplexer;
mod queue;
pub mod signal;
mod sys;
mod timer_heap;
mod loop_;

pub use crate::error::Error;
pub use crate::loop_::{DispatchFlags, DispatchOutcome, Loop, Pending};
