//! Platform plumbing behind [`crate::signal::SignalBridge`].

use std::{io, mem, ptr};

use crate::signal::SignalSet;

#[cfg(target_os = "linux")]
mod signalfd {
    use std::fs::File;
    use std::io::{self, Read};
    use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
    use std::{mem, slice};

    use super::{block_signals, create_sigset};
    use crate::signal::{Signal, SignalSet};

    #[derive(Debug)]
    pub(crate) struct SignalBackend {
        fd: File,
    }

    impl SignalBackend {
        pub(crate) fn new(signals: SignalSet) -> io::Result<SignalBackend> {
            let set = create_sigset(signals)?;
            let fd = unsafe { libc::signalfd(-1, &set, libc::SFD_CLOEXEC | libc::SFD_NONBLOCK) };
            if fd == -1 {
                return Err(io::Error::last_os_error());
            }
            block_signals(&set)?;
            Ok(SignalBackend { fd: unsafe { File::from_raw_fd(fd) } })
        }

        pub(crate) fn raw_fd(&self) -> RawFd {
            self.fd.as_raw_fd()
        }

        pub(crate) fn receive(&mut self) -> io::Result<Option<Signal>> {
            let mut info: libc::signalfd_siginfo = unsafe { mem::zeroed() };
            #[allow(trivial_casts)]
            let info_ref: &mut [u8] = unsafe {
                slice::from_raw_parts_mut(&mut info as *mut _ as *mut u8, mem::size_of::<libc::signalfd_siginfo>())
            };
            let n = loop {
                match self.fd.read(info_ref) {
                    Ok(n) => break n,
                    Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                    Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err),
                }
            };
            if n == 0 {
                return Ok(None);
            }
            Ok(Signal::from_raw(info.ssi_signo as libc::c_int))
        }
    }
}

#[cfg(target_os = "linux")]
pub(crate) use self::signalfd::SignalBackend;

#[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))]
mod kqueue {
    use std::os::unix::io::RawFd;
    use std::{io, mem, ptr};

    use super::{block_signals, create_sigset};
    use crate::signal::{Signal, SignalSet};

    #[derive(Debug)]
    pub(crate) struct SignalBackend {
        kq: RawFd,
    }

    impl SignalBackend {
        pub(crate) fn new(signals: SignalSet) -> io::Result<SignalBackend> {
            let set = create_sigset(signals)?;
            let kq = unsafe { libc::kqueue() };
            if kq == -1 {
                return Err(io::Error::last_os_error());
            }

            let mut changes: Vec<libc::kevent> = signals.into_iter().map(|signal| libc::kevent {
                ident: signal.into_raw() as libc::uintptr_t,
                filter: libc::EVFILT_SIGNAL,
                flags: libc::EV_ADD,
                fflags: 0,
                data: 0,
                udata: ptr::null_mut(),
            }).collect();
            let n = unsafe {
                libc::kevent(kq, changes.as_ptr(), changes.len() as libc::c_int, ptr::null_mut(), 0, ptr::null())
            };
            if n == -1 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(kq) };
                return Err(err);
            }
            let _ = &mut changes;

            block_signals(&set)?;
            Ok(SignalBackend { kq })
        }

        pub(crate) fn raw_fd(&self) -> RawFd {
            self.kq
        }

        pub(crate) fn receive(&mut self) -> io::Result<Option<Signal>> {
            let mut event: libc::kevent = unsafe { mem::zeroed() };
            let timeout = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            let n_events = unsafe {
                libc::kevent(self.kq, ptr::null(), 0, &mut event, 1, &timeout)
            };
            match n_events {
                -1 => Err(io::Error::last_os_error()),
                0 => Ok(None),
                _ => Ok(Signal::from_raw(event.ident as libc::c_int)),
            }
        }
    }

    impl Drop for SignalBackend {
        fn drop(&mut self) {
            unsafe { libc::close(self.kq) };
        }
    }
}

#[cfg(any(target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))]
pub(crate) use self::kqueue::SignalBackend;

#[cfg(all(unix, not(any(target_os = "linux", target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))))]
mod noop {
    use std::io;
    use std::os::unix::io::RawFd;

    use crate::signal::{Signal, SignalSet};

    /// Portable targets with no signalfd/kqueue equivalent get a backend
    /// that never reports a signal. A real deployment on such a target
    /// would need a self-pipe plus a traditional signal handler, which is
    /// outside this crate's OS-plumbing scope.
    #[derive(Debug)]
    pub(crate) struct SignalBackend;

    impl SignalBackend {
        pub(crate) fn new(_signals: SignalSet) -> io::Result<SignalBackend> {
            Ok(SignalBackend)
        }

        pub(crate) fn raw_fd(&self) -> RawFd {
            -1
        }

        pub(crate) fn receive(&mut self) -> io::Result<Option<Signal>> {
            Ok(None)
        }
    }
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "freebsd", target_os = "macos", target_os = "netbsd", target_os = "openbsd"))))]
pub(crate) use self::noop::SignalBackend;

/// Build a `libc::sigset_t` containing every signal in `signals`.
fn create_sigset(signals: SignalSet) -> io::Result<libc::sigset_t> {
    let mut set: libc::sigset_t = unsafe { mem::zeroed() };
    if unsafe { libc::sigemptyset(&mut set) } == -1 {
        return Err(io::Error::last_os_error());
    }
    for signal in signals {
        if unsafe { libc::sigaddset(&mut set, signal.into_raw()) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(set)
}

/// Block every signal in `set` for the current process so delivery only
/// happens through the registered backend fd.
fn block_signals(set: &libc::sigset_t) -> io::Result<()> {
    if unsafe { libc::sigprocmask(libc::SIG_BLOCK, set, ptr::null_mut()) } == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
