//! Portable fallback backend, built on `poll(2)`.
//!
//! Used on any recognized Unix target that doesn't have a faster,
//! OS-specific backend. `gaea` never shipped a `poll(2)` backend at all;
//! this one follows the vec-of-`pollfd`-plus-linear-scan shape common to
//! the `poll(2)`-based backends in the wider example pack (portable
//! polling layers written against `libc::poll` directly, the same way the
//! kqueue/epoll backends above are written against their own syscalls).

use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{cmp, io};

use crate::event::{EventId, Interest};
use crate::multiplexer::{Multiplexer, ReadyEvent, Token};

/// Multiplexer backed by the portable `poll(2)` syscall.
#[derive(Debug)]
pub(crate) struct PollMultiplexer {
    fds: Vec<libc::pollfd>,
    ids: Vec<EventId>,
}

impl PollMultiplexer {
    pub(crate) fn new() -> io::Result<PollMultiplexer> {
        Ok(PollMultiplexer { fds: Vec::new(), ids: Vec::new() })
    }

    fn index_of(&self, fd: RawFd) -> Option<usize> {
        self.fds.iter().position(|pfd| pfd.fd == fd)
    }
}

impl Multiplexer for PollMultiplexer {
    fn add(&mut self, token: Token, id: EventId, interest: Interest) -> io::Result<()> {
        let events = to_poll_events(interest);
        match self.index_of(token.0) {
            Some(index) => {
                self.fds[index].events = events;
                self.ids[index] = id;
            }
            None => {
                self.fds.push(libc::pollfd { fd: token.0, events, revents: 0 });
                self.ids.push(id);
            }
        }
        Ok(())
    }

    fn del(&mut self, token: Token) -> io::Result<()> {
        if let Some(index) = self.index_of(token.0) {
            self.fds.swap_remove(index);
            self.ids.swap_remove(index);
        }
        Ok(())
    }

    fn dispatch(&mut self, out: &mut Vec<ReadyEvent>, deadline: Option<Duration>) -> io::Result<()> {
        let timeout_ms = deadline.map(duration_to_millis).unwrap_or(-1);

        let n_events = unsafe {
            libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms)
        };
        match n_events {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    Ok(())
                } else {
                    Err(err)
                }
            }
            0 => Ok(()),
            _ => {
                for (pfd, id) in self.fds.iter_mut().zip(self.ids.iter()) {
                    if pfd.revents == 0 {
                        continue;
                    }
                    let mut interest = Interest::empty();
                    if pfd.revents & (libc::POLLIN | libc::POLLPRI) != 0 {
                        interest |= Interest::READ;
                    }
                    if pfd.revents & libc::POLLOUT != 0 {
                        interest |= Interest::WRITE;
                    }
                    if !interest.is_empty() {
                        out.push(ReadyEvent { id: *id, interest });
                    }
                    pfd.revents = 0;
                }
                Ok(())
            }
        }
    }

    fn needs_reinit(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}

fn to_poll_events(interest: Interest) -> libc::c_short {
    let mut events = 0;
    if interest.contains(Interest::READ) {
        events |= libc::POLLIN;
    }
    if interest.contains(Interest::WRITE) {
        events |= libc::POLLOUT;
    }
    events
}

const MILLIS_PER_SEC: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

fn duration_to_millis(duration: Duration) -> libc::c_int {
    let millis = duration.as_secs().saturating_mul(MILLIS_PER_SEC)
        .saturating_add((u64::from(duration.subsec_nanos()) / NANOS_PER_MILLI) + 1);
    cmp::min(millis, libc::c_int::max_value() as u64) as libc::c_int
}
