//! Linux backend, built on `epoll(7)`.

use std::cmp::min;
use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{io, mem, ptr};

use log::error;

use crate::event::{EventId, Interest};
use crate::multiplexer::{Multiplexer, ReadyEvent, Token};

const EVENTS_CAP: usize = 1024;

/// Multiplexer backed by Linux `epoll`.
#[derive(Debug)]
pub(crate) struct EpollMultiplexer {
    epfd: RawFd,
}

impl EpollMultiplexer {
    pub(crate) fn new() -> io::Result<EpollMultiplexer> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(EpollMultiplexer { epfd })
        }
    }
}

impl Multiplexer for EpollMultiplexer {
    fn add(&mut self, token: Token, id: EventId, interest: Interest) -> io::Result<()> {
        let mut event = new_epoll_event(interest, id);
        epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, token.0, &mut event)
    }

    fn del(&mut self, token: Token) -> io::Result<()> {
        epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, token.0, ptr::null_mut())
    }

    fn dispatch(&mut self, out: &mut Vec<ReadyEvent>, deadline: Option<Duration>) -> io::Result<()> {
        let mut ep_events: [libc::epoll_event; EVENTS_CAP] = unsafe { mem::zeroed() };
        let timeout_ms = deadline.map(duration_to_millis).unwrap_or(-1);

        let n_events = unsafe {
            libc::epoll_wait(self.epfd, ep_events.as_mut_ptr(), EVENTS_CAP as libc::c_int, timeout_ms)
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
            n => {
                out.extend(ep_events[..n as usize].iter().map(ep_event_to_ready));
                Ok(())
            }
        }
    }

    fn needs_reinit(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "epoll"
    }
}

const MILLIS_PER_SEC: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;

fn duration_to_millis(duration: Duration) -> libc::c_int {
    let millis = duration.as_secs().saturating_mul(MILLIS_PER_SEC)
        .saturating_add((u64::from(duration.subsec_nanos()) / NANOS_PER_MILLI) + 1);
    min(millis, libc::c_int::max_value() as u64) as libc::c_int
}

fn ep_event_to_ready(ep_event: &libc::epoll_event) -> ReadyEvent {
    let id = EventId(ep_event.u64 as usize);
    let epoll = ep_event.events;
    let mut interest = Interest::empty();

    if contains_flag(epoll, libc::EPOLLIN | libc::EPOLLPRI) {
        interest |= Interest::READ;
    }
    if contains_flag(epoll, libc::EPOLLOUT) {
        interest |= Interest::WRITE;
    }

    ReadyEvent { id, interest }
}

fn contains_flag(flags: u32, flag: libc::c_int) -> bool {
    (flags & flag as u32) != 0
}

fn new_epoll_event(interest: Interest, id: EventId) -> libc::epoll_event {
    libc::epoll_event {
        events: to_epoll_events(interest),
        u64: id.0 as u64,
    }
}

fn to_epoll_events(interest: Interest) -> u32 {
    let mut events = libc::EPOLLPRI | libc::EPOLLRDHUP;
    if interest.contains(Interest::READ) {
        events |= libc::EPOLLIN;
    }
    if interest.contains(Interest::WRITE) {
        events |= libc::EPOLLOUT;
    }
    events as u32
}

fn epoll_ctl(epfd: RawFd, op: libc::c_int, fd: RawFd, event: *mut libc::epoll_event) -> io::Result<()> {
    if unsafe { libc::epoll_ctl(epfd, op, fd, event) } == -1 {
        // Possible errors:
        // EBADF, EEXIST, ENOENT, EPERM: user error.
        // EINVAL, ELOOP: shouldn't happen.
        // ENOMEM, ENOSPC: can't handle.
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

impl Drop for EpollMultiplexer {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epfd) } == -1 {
            // Possible errors:
            // - EBADF, EIO: can't recover.
            // - EINTR: could try again but we can't be sure if the file
            //          descriptor was closed or not, so to be safe we don't
            //          close it again.
            let err = io::Error::last_os_error();
            error!("error closing epoll: {}", err);
        }
    }
}
