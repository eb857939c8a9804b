//! BSD/macOS backend, built on `kqueue(2)`.

use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{io, mem, ptr};

use log::error;

use crate::event::{EventId, Interest};
use crate::multiplexer::{Multiplexer, ReadyEvent, Token};

const EVENTS_CAP: usize = 1024;

/// Multiplexer backed by `kqueue`.
#[derive(Debug)]
pub(crate) struct KqueueMultiplexer {
    kq: RawFd,
}

impl KqueueMultiplexer {
    pub(crate) fn new() -> io::Result<KqueueMultiplexer> {
        let kq = unsafe { libc::kqueue() };
        if kq == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(KqueueMultiplexer { kq })
        }
    }
}

impl Multiplexer for KqueueMultiplexer {
    fn add(&mut self, token: Token, id: EventId, interest: Interest) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        if interest.contains(Interest::READ) {
            changes.push(new_kevent(token.0, libc::EVFILT_READ, libc::EV_ADD | libc::EV_CLEAR, id));
        }
        if interest.contains(Interest::WRITE) {
            changes.push(new_kevent(token.0, libc::EVFILT_WRITE, libc::EV_ADD | libc::EV_CLEAR, id));
        }
        kevent_register(self.kq, &changes)
    }

    fn del(&mut self, token: Token) -> io::Result<()> {
        let changes = [
            new_kevent(token.0, libc::EVFILT_READ, libc::EV_DELETE, EventId(0)),
            new_kevent(token.0, libc::EVFILT_WRITE, libc::EV_DELETE, EventId(0)),
        ];
        // Deleting a filter that was never added returns ENOENT; that's
        // fine since callers may only have registered one of read/write.
        for change in &changes {
            let mut single = [*change];
            let _ = kevent_register(self.kq, &mut single);
        }
        Ok(())
    }

    fn dispatch(&mut self, out: &mut Vec<ReadyEvent>, deadline: Option<Duration>) -> io::Result<()> {
        let mut events: [libc::kevent; EVENTS_CAP] = unsafe { mem::zeroed() };
        let timeout = deadline.map(timespec_from_duration);
        let timeout_ptr = timeout.as_ref().map(|t| t as *const _).unwrap_or(ptr::null());

        let n_events = unsafe {
            libc::kevent(self.kq, ptr::null(), 0, events.as_mut_ptr(), EVENTS_CAP as libc::c_int, timeout_ptr)
        };
        match n_events {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    // Per the FreeBSD kqueue(2) man page EINTR here means no
                    // events were returned, not that the call failed.
                    Ok(())
                } else {
                    Err(err)
                }
            }
            0 => Ok(()),
            n => {
                out.extend(events[..n as usize].iter().filter_map(kevent_to_ready));
                Ok(())
            }
        }
    }

    fn needs_reinit(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "kqueue"
    }
}

fn timespec_from_duration(duration: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: duration.as_secs() as libc::time_t,
        tv_nsec: libc::c_long::from(duration.subsec_nanos()),
    }
}

fn kevent_to_ready(event: &libc::kevent) -> Option<ReadyEvent> {
    if contains_flag(event.flags, libc::EV_ERROR) {
        return None;
    }
    let id = EventId(event.udata as usize);
    let interest = match event.filter {
        libc::EVFILT_READ => Interest::READ,
        libc::EVFILT_WRITE => Interest::WRITE,
        _ => return None,
    };
    Some(ReadyEvent { id, interest })
}

fn contains_flag(flags: u16, flag: libc::c_int) -> bool {
    (libc::c_int::from(flags) & flag) != 0
}

fn new_kevent(fd: RawFd, filter: libc::c_short, flags: libc::c_ushort, id: EventId) -> libc::kevent {
    libc::kevent {
        ident: fd as libc::uintptr_t,
        filter,
        flags,
        fflags: 0,
        data: 0,
        udata: id.0 as *mut libc::c_void,
    }
}

fn kevent_register(kq: RawFd, changes: &mut [libc::kevent]) -> io::Result<()> {
    let n = unsafe {
        libc::kevent(kq, changes.as_ptr(), changes.len() as libc::c_int, ptr::null_mut(), 0, ptr::null())
    };
    if n == -1 {
        let err = io::Error::last_os_error();
        // See the note in `dispatch`: EINTR during a changelist-only call
        // (no output events requested) means the changes were applied.
        if err.kind() == io::ErrorKind::Interrupted {
            Ok(())
        } else {
            Err(err)
        }
    } else {
        Ok(())
    }
}

impl Drop for KqueueMultiplexer {
    fn drop(&mut self) {
        if unsafe { libc::close(self.kq) } == -1 {
            let err = io::Error::last_os_error();
            error!("error closing kqueue: {}", err);
        }
    }
}
