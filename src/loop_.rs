//! The dispatch loop: the core of this crate.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;

use bitflags::bitflags;
use log::trace;

use crate::clock::{Clock, MonotonicClock};
use crate::error::{Error, Result};
use crate::event::{Callback, Event, EventId, Flags, Interest, INTERNAL_ID_START};
use crate::multiplexer::{select_backend, Multiplexer, Token};
use crate::queue::PriorityQueue;
use crate::signal::{Signal, SignalBridge};
use crate::timer_heap::TimerHeap;

bitflags! {
    /// Flags controlling a single [`Loop::dispatch`] call.
    pub struct DispatchFlags: u8 {
        /// Return after the first productive drain of the active queue,
        /// instead of looping until termination is requested.
        const ONCE     = 0b0000_0001;
        /// Never block in the backend; poll once without waiting.
        const NONBLOCK = 0b0000_0010;
    }
}

/// What a [`Loop::dispatch`] call ended with.
#[derive(Debug, Eq, PartialEq)]
pub enum DispatchOutcome {
    /// The loop returned normally (break requested, `ONCE` satisfied, or
    /// `exit_after`'s timer fired).
    Ok,
    /// There were no registered events, timers or active callbacks left to
    /// wait on.
    NoEvents,
}

/// A snapshot of an event's current registration, returned by
/// [`Loop::pending`].
#[derive(Debug, Clone, Copy)]
pub struct Pending {
    /// The interest the event is currently registered for.
    pub interest: Interest,
    /// The union of interests that triggered its current activation, if
    /// any (`Interest::empty()` if it isn't active).
    pub triggered: Interest,
    /// Time remaining until its deadline, if it has one.
    pub remaining: Option<Duration>,
}

/// The single-threaded, callback-driven dispatch loop.
///
/// A `Loop` owns an event registry, a timer min-heap, a priority
/// run-queue, one OS readiness backend and a clock. See the crate's
/// top-level documentation for the dispatch cycle this type runs.
///
/// `Loop` is not `Send` or `Sync`: it holds raw backend file descriptors
/// and is meant to be driven from the thread that constructed it.
pub struct Loop {
    events: HashMap<EventId, Event>,
    timers: TimerHeap,
    queue: PriorityQueue,
    backend: Box<dyn Multiplexer>,
    clock: Box<dyn Clock>,
    woke_at: Duration,
    now_cache: Option<Duration>,
    got_term: bool,
    should_break: bool,
    signal_bridge: Option<SignalBridge>,
    signal_bridge_id: Option<EventId>,
    sig_callback: Option<Box<dyn FnMut() -> std::io::Result<()>>>,
    next_internal_id: usize,
    // `!Send + !Sync` by construction: raw fds inside `backend`/`clock` and
    // `Rc`-free but thread-confined callbacks make sharing across threads
    // unsound.
    _not_sync: std::marker::PhantomData<*const ()>,
}

impl Loop {
    /// Create a new loop with a single priority level, using the default
    /// monotonic clock and the best available OS backend.
    pub fn new() -> Result<Loop> {
        Loop::with_priorities(1)
    }

    /// Create a new loop with `priorities` priority levels (`priorities`
    /// is clamped to at least 1).
    pub fn with_priorities(priorities: usize) -> Result<Loop> {
        Loop::with_clock(priorities, Box::new(MonotonicClock::new()))
    }

    /// Create a new loop using an explicit [`Clock`] implementation.
    ///
    /// Production code should use [`Loop::new`]/[`Loop::with_priorities`];
    /// this constructor exists so tests can inject a [`crate::clock::WallClock`]
    /// to exercise the backward-clock-jump correction path.
    pub fn with_clock(priorities: usize, clock: Box<dyn Clock>) -> Result<Loop> {
        let backend = select_backend()?;
        Ok(Loop {
            events: HashMap::new(),
            timers: TimerHeap::new(),
            queue: PriorityQueue::new(priorities),
            backend,
            clock,
            woke_at: Duration::from_secs(0),
            now_cache: None,
            got_term: false,
            should_break: false,
            signal_bridge: None,
            signal_bridge_id: None,
            sig_callback: None,
            next_internal_id: INTERNAL_ID_START,
            _not_sync: std::marker::PhantomData,
        })
    }

    /// The name of the OS backend this loop selected (`"epoll"`,
    /// `"kqueue"` or `"poll"`).
    pub fn method_name(&self) -> &'static str {
        self.backend.name()
    }

    /// The current time as the loop sees it: the cached value from the
    /// start of the current dispatch iteration if one is in progress,
    /// otherwise a fresh read of the clock.
    pub fn now(&self) -> Duration {
        self.now_cache.unwrap_or_else(|| self.clock.now())
    }

    /// Install a callback invoked once per dispatch iteration, before the
    /// backend is polled. Returning `Err` aborts the in-progress
    /// [`Loop::dispatch`] call with [`Error::Interrupted`].
    pub fn set_signal_callback<F>(&mut self, callback: F)
        where F: FnMut() -> std::io::Result<()> + 'static,
    {
        self.sig_callback = Some(Box::new(callback));
    }

    /// Request that the loop stop after `duration`, as if [`Loop::break_now`]
    /// had been called at that point.
    pub fn exit_after(&mut self, duration: Duration) -> Result<()> {
        let id = self.alloc_internal_id();
        self.add_impl(id, None, Interest::TIMEOUT, Some(duration), 0, Box::new(|_, _, loop_| {
            loop_.got_term = true;
        }), true)
    }

    /// Ask the loop to return at the next convenient point: before the
    /// next backend call, and between callbacks inside the active-queue
    /// drain.
    pub fn break_now(&mut self) {
        self.should_break = true;
    }

    /// Resize the priority-queue array. Fails if any event is currently
    /// active. Events whose priority no longer exists are moved to the
    /// middle level.
    pub fn set_priorities(&mut self, priorities: usize) -> Result<()> {
        if self.events.values().any(|e| e.flags.contains(Flags::ACTIVE)) {
            return Err(Error::InvalidState("cannot change priority count while an event is active"));
        }
        self.queue.resize(priorities);
        let new_count = self.queue.priorities();
        for event in self.events.values_mut() {
            if event.priority >= new_count {
                event.priority = new_count / 2;
            }
        }
        Ok(())
    }

    /// Change the priority level of a registered, inactive event.
    pub fn set_priority(&mut self, id: EventId, priority: usize) -> Result<()> {
        if priority >= self.queue.priorities() {
            return Err(Error::InvalidState("priority out of range"));
        }
        let event = self.events.get_mut(&id).ok_or(Error::InvalidState("unknown event id"))?;
        if event.flags.contains(Flags::ACTIVE) {
            return Err(Error::InvalidState("cannot change priority of an active event"));
        }
        event.priority = priority;
        Ok(())
    }

    /// Inspect a registered event's current state.
    pub fn pending(&self, id: EventId) -> Option<Pending> {
        let event = self.events.get(&id)?;
        let remaining = event.deadline.map(|deadline| deadline.checked_sub(self.now()).unwrap_or_else(|| Duration::from_secs(0)));
        Some(Pending { interest: event.interest, triggered: event.triggered, remaining })
    }

    /// Number of non-internal events currently registered: those with
    /// `INSERTED` and/or `TIMEOUT` set.
    pub fn event_count(&self) -> usize {
        self.events.values()
            .filter(|event| !event.is_internal())
            .filter(|event| event.flags.intersects(Flags::INSERTED | Flags::TIMEOUT))
            .count()
    }

    /// Number of non-internal events currently active (linked into the
    /// priority run-queue, awaiting their callback).
    pub fn event_count_active(&self) -> usize {
        self.events.values()
            .filter(|event| !event.is_internal())
            .filter(|event| event.flags.contains(Flags::ACTIVE))
            .count()
    }

    /// Register (or re-register) `id` for `interest`, optionally with a
    /// relative `timeout` and readiness backed by `fd`.
    ///
    /// Re-adding an id that is already registered replaces its interest,
    /// timeout, priority and callback; any in-progress callback drain for
    /// it is aborted (see `DESIGN.md`).
    pub fn add(&mut self, id: EventId, fd: Option<RawFd>, interest: Interest, timeout: Option<Duration>, priority: usize, callback: Callback) -> Result<()> {
        self.add_impl(id, fd, interest, timeout, priority, callback, false)
    }

    fn add_impl(&mut self, id: EventId, fd: Option<RawFd>, interest: Interest, timeout: Option<Duration>, priority: usize, callback: Callback, internal: bool) -> Result<()> {
        trace!("adding event: id={:?}, interest={:?}, timeout={:?}, priority={}", id, interest, timeout, priority);
        if priority >= self.queue.priorities() {
            return Err(Error::InvalidState("priority out of range"));
        }

        // Reserve timer heap capacity up front so the rest of this call
        // can't fail part-way through for lack of memory.
        if timeout.is_some() {
            self.timers.reserve(1);
        }

        let token = fd.map(Token);
        let existing_flags = self.events.get(&id).map(|e| e.flags);
        let old_token = self.events.get(&id).and_then(|e| e.token);
        let was_inserted = existing_flags.map_or(false, |f| f.contains(Flags::INSERTED));
        let was_active = existing_flags.map_or(false, |f| f.contains(Flags::ACTIVE));
        let was_timeout = existing_flags.map_or(false, |f| f.contains(Flags::TIMEOUT));
        let wants_backend = interest.intersects(Interest::READ | Interest::WRITE) && token.is_some();
        // §3 invariant 1: `INSERTED` also covers signal events, which have
        // no fd/token of their own and are tracked by the signal bridge
        // instead of a backend `add` call.
        let wants_inserted = wants_backend || interest.contains(Interest::SIGNAL);

        if was_inserted {
            if let Some(t) = old_token {
                self.backend.del(t)?;
            }
        }
        if wants_backend {
            if let Some(t) = token {
                self.backend.add(t, id, interest)?;
            }
        }

        if was_active {
            if let Some(event) = self.events.get_mut(&id) {
                event.aborted = true;
                let priority = event.priority;
                self.queue.remove(priority, id);
            }
        }

        if was_timeout {
            self.timers.erase(id);
        }
        let deadline = match timeout {
            Some(t) => {
                let deadline = self.now() + t;
                self.timers.push(id, deadline);
                Some(deadline)
            }
            None => None,
        };

        let mut callback_slot = Some(callback);
        let event = self.events.entry(id).or_insert_with(|| {
            let cb = callback_slot.take().expect("callback available for fresh insert");
            Event::new(id, token, priority, cb)
        });
        if let Some(cb) = callback_slot.take() {
            event.callback = Some(cb);
        }
        event.token = token;
        event.priority = priority;
        event.interest = interest;
        event.deadline = deadline;
        event.flags.remove(Flags::ACTIVE);
        event.flags.set(Flags::INSERTED, wants_inserted);
        event.flags.set(Flags::TIMEOUT, deadline.is_some());
        event.flags.set(Flags::INTERNAL, internal || event.flags.contains(Flags::INTERNAL));

        Ok(())
    }

    /// Fully unregister `id`: removed from the backend, the timer heap and
    /// the run-queue. A no-op if `id` isn't currently registered.
    pub fn del(&mut self, id: EventId) -> Result<()> {
        trace!("deleting event: id={:?}", id);
        let event = match self.events.remove(&id) {
            Some(event) => event,
            None => return Ok(()),
        };
        if event.flags.contains(Flags::ACTIVE) {
            self.queue.remove(event.priority, id);
        }
        if event.flags.contains(Flags::TIMEOUT) {
            self.timers.erase(id);
        }
        if event.flags.contains(Flags::INSERTED) {
            if let Some(token) = event.token {
                self.backend.del(token)?;
            }
            if event.interest.contains(Interest::SIGNAL) {
                if let Some(bridge) = self.signal_bridge.as_mut() {
                    bridge.unsubscribe(id);
                }
            }
        }
        Ok(())
    }

    /// Register a one-shot convenience event: `callback` runs at most
    /// once, after which the event is deleted automatically. Rejects
    /// signal-only interest (a self-deleting signal subscription isn't
    /// safe to support generically; see `DESIGN.md`).
    pub fn once<F>(&mut self, fd: Option<RawFd>, interest: Interest, timeout: Option<Duration>, priority: usize, mut callback: F) -> Result<EventId>
        where F: FnMut(EventId, Interest, &mut Loop) + 'static,
    {
        if interest.contains(Interest::SIGNAL) {
            return Err(Error::Unsupported("signal-only one-shot events are not supported"));
        }
        let id = self.alloc_internal_id();
        let wrapped: Callback = Box::new(move |id, interest, loop_| {
            callback(id, interest, loop_);
            let _ = loop_.del(id);
        });
        self.add_impl(id, fd, interest, timeout, priority, wrapped, true)?;
        Ok(id)
    }

    /// Subscribe `id` to `signal`: whenever the process receives `signal`,
    /// `id` activates with [`Interest::SIGNAL`] and `callback` runs.
    pub fn subscribe_signal(&mut self, signal: Signal, id: EventId, priority: usize, callback: Callback) -> Result<()> {
        trace!("subscribing to signal: signal={:?}, id={:?}", signal, id);
        self.add_impl(id, None, Interest::SIGNAL, None, priority, callback, false)?;

        if self.signal_bridge.is_none() {
            self.signal_bridge = Some(SignalBridge::new()?);
            self.signal_bridge_id = Some(self.alloc_internal_id());
        }
        let bridge_id = self.signal_bridge_id.expect("just set above");
        let bridge = self.signal_bridge.as_mut().expect("just set above");
        bridge.subscribe(&mut *self.backend, signal, id, bridge_id)?;
        Ok(())
    }

    /// Tear down and recreate the OS backend, re-registering every
    /// currently-registered event. Call this after `fork(2)` in the child
    /// process before using the loop again.
    ///
    /// This always reinitializes, even for backends whose
    /// [`Multiplexer::needs_reinit`] reports `false` — see `DESIGN.md`.
    pub fn reinit_after_fork(&mut self) -> Result<()> {
        trace!("reinitializing after fork");
        self.backend = select_backend()?;
        self.signal_bridge = None;
        self.signal_bridge_id = None;

        let to_reregister: Vec<(EventId, Token, Interest)> = self.events.iter()
            .filter_map(|(&id, event)| event.token.map(|token| (id, token, event.interest)))
            .collect();
        for (id, token, interest) in to_reregister {
            self.backend.add(token, id, interest)?;
        }
        Ok(())
    }

    fn alloc_internal_id(&mut self) -> EventId {
        let id = EventId(self.next_internal_id);
        self.next_internal_id += 1;
        id
    }

    /// Run the dispatch cycle until termination, there is nothing left to
    /// wait on, or (with `DispatchFlags::ONCE`) one priority level has been
    /// drained.
    ///
    /// `ONCE` returns as soon as the lowest active priority level has been
    /// fully processed, even if a higher-numbered level still holds active
    /// events — callers relying on priority to starve a lower-urgency level
    /// depend on this.
    pub fn dispatch(&mut self, flags: DispatchFlags) -> Result<DispatchOutcome> {
        let result = self.dispatch_inner(flags);
        // `now_cache` is only valid "for the current iteration" (§4.3); once
        // `dispatch` hands control back to the caller the iteration is over,
        // regardless of which of `dispatch_inner`'s exit points was taken.
        self.now_cache = None;
        result
    }

    /// Body of [`Self::dispatch`], split out so the caller can invalidate
    /// `now_cache` once on the way out no matter which of the returns below
    /// is taken.
    fn dispatch_inner(&mut self, flags: DispatchFlags) -> Result<DispatchOutcome> {
        loop {
            if self.got_term || self.should_break {
                self.got_term = false;
                self.should_break = false;
                return Ok(DispatchOutcome::Ok);
            }

            if let Some(callback) = self.sig_callback.as_mut() {
                if callback().is_err() {
                    return Err(Error::Interrupted);
                }
            }

            self.correct_clock();

            if self.events.is_empty() && self.timers.is_empty() {
                return Ok(DispatchOutcome::NoEvents);
            }

            let nonblock = flags.contains(DispatchFlags::NONBLOCK);
            let has_active = !self.queue.is_empty();
            let deadline = if has_active || nonblock {
                Some(Duration::from_secs(0))
            } else {
                self.timers.peek_min().map(|d| d.checked_sub(self.now()).unwrap_or_else(|| Duration::from_secs(0)))
            };

            self.woke_at = self.clock.now();
            self.now_cache = None;

            let mut ready = Vec::new();
            self.backend.dispatch(&mut ready, deadline)?;

            self.now_cache = Some(self.clock.now());

            for readiness in ready {
                if self.signal_bridge_id == Some(readiness.id) {
                    let activated = self.signal_bridge.as_mut()
                        .expect("signal_bridge_id only set alongside signal_bridge")
                        .drain()?;
                    for id in activated {
                        self.activate(id, Interest::SIGNAL, 1);
                    }
                } else {
                    self.activate(readiness.id, readiness.interest, 1);
                }
            }

            self.process_timeouts();

            match self.queue.next_level() {
                Some(level) => {
                    self.process_active(level);
                    if flags.contains(DispatchFlags::ONCE) {
                        return Ok(DispatchOutcome::Ok);
                    }
                }
                None if nonblock => return Ok(DispatchOutcome::Ok),
                None => {}
            }
        }
    }

    /// Correct the timer heap for a backward wall-clock jump (a no-op
    /// unless the loop's clock reports `may_jump_backwards`).
    fn correct_clock(&mut self) {
        if !self.clock.may_jump_backwards() {
            return;
        }
        let now = self.clock.now();
        if now < self.woke_at {
            let off = self.woke_at - now;
            self.timers.shift_all_back(off);
        }
    }

    fn activate(&mut self, id: EventId, mask: Interest, calls: usize) {
        let activation = match self.events.get_mut(&id) {
            Some(event) => {
                let already_active = event.flags.contains(Flags::ACTIVE);
                event.triggered |= mask;
                if !already_active {
                    event.flags.insert(Flags::ACTIVE);
                    event.calls_remaining = calls;
                    event.aborted = false;
                }
                Some((event.priority, already_active))
            }
            None => None,
        };
        if let Some((priority, already_active)) = activation {
            if !already_active {
                self.queue.push_back(priority, id);
            }
        }
    }

    fn process_timeouts(&mut self) {
        let now = self.now();
        while let Some(deadline) = self.timers.peek_min() {
            if deadline > now {
                break;
            }
            if let Some((id, _)) = self.timers.pop_min() {
                if let Some(event) = self.events.get_mut(&id) {
                    event.flags.remove(Flags::TIMEOUT);
                    event.deadline = None;
                }
                self.activate(id, Interest::TIMEOUT, 1);
            }
        }
    }

    fn process_active(&mut self, priority: usize) {
        loop {
            if self.should_break {
                return;
            }
            let id = match self.queue.pop_front(priority) {
                Some(id) => id,
                None => return,
            };
            self.fire(id);
            if self.should_break {
                return;
            }
        }
    }

    /// Run the callback for `id`, honoring persist/non-persist teardown
    /// order and the abort channel.
    fn fire(&mut self, id: EventId) {
        let persist = match self.events.get(&id) {
            Some(event) => event.interest.contains(Interest::PERSIST),
            None => return,
        };

        if !persist {
            let mut event = match self.events.remove(&id) {
                Some(event) => event,
                None => return,
            };
            if event.flags.contains(Flags::TIMEOUT) {
                self.timers.erase(id);
            }
            if event.flags.contains(Flags::INSERTED) {
                if let Some(token) = event.token {
                    let _ = self.backend.del(token);
                }
            }
            let triggered = event.triggered;
            let mut calls = event.calls_remaining;
            if let Some(mut callback) = event.callback.take() {
                while calls > 0 {
                    calls -= 1;
                    callback(id, triggered, self);
                    if self.should_break {
                        break;
                    }
                }
            }
        } else {
            let (triggered, mut calls, mut callback) = match self.events.get_mut(&id) {
                Some(event) => {
                    event.flags.remove(Flags::ACTIVE);
                    event.aborted = false;
                    (event.triggered, event.calls_remaining, event.callback.take())
                }
                None => return,
            };
            if let Some(ref mut callback) = callback {
                while calls > 0 {
                    let should_stop = self.events.get(&id).map_or(true, |event| event.aborted);
                    if should_stop {
                        break;
                    }
                    calls -= 1;
                    callback(id, triggered, self);
                    if self.should_break {
                        break;
                    }
                }
            }
            if let Some(event) = self.events.get_mut(&id) {
                if event.callback.is_none() {
                    event.callback = callback;
                }
            }
        }
    }
}

impl std::fmt::Debug for Loop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loop")
            .field("backend", &self.backend.name())
            .field("events", &self.events.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}
