//! The single shared readiness poller: raw epoll on Linux, raw kqueue
//! on macOS, both registered one-shot. There is exactly one `Poller`
//! per process, driven by one dedicated netio worker thread.

use std::io;
use std::os::unix::io::RawFd;

use crate::error::RuntimeError;

/// Which backend a [`Poller`] was built for. Chosen automatically per
/// platform; exposed on [`crate::config::RuntimeConfig`] mostly so tests
/// and diagnostics can report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetBackend {
    Epoll,
    Kqueue,
}

impl NetBackend {
    pub fn default_for_platform() -> NetBackend {
        #[cfg(target_os = "linux")]
        {
            NetBackend::Epoll
        }
        #[cfg(target_os = "macos")]
        {
            NetBackend::Kqueue
        }
        #[cfg(not(any(target_os = "linux", target_os = "macos")))]
        {
            compile_error!("picasso-rt net I/O only supports Linux and macOS");
        }
    }
}

/// Readiness interest a caller registers for. Oneshot is implicit in
/// every registration this poller makes: a caller must rearm after
/// every `EAGAIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READ: Interest = Interest { readable: true, writable: false };
    pub const WRITE: Interest = Interest { readable: false, writable: true };
}

/// One readiness event, carrying back whatever opaque user-data pointer
/// was registered with the fd (the associated task's raw pointer, cast
/// to `usize`).
#[derive(Debug, Clone, Copy)]
pub struct PollEvent {
    pub ud: usize,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hup: bool,
}

const MAX_EVENTS: usize = 128;

#[cfg(target_os = "linux")]
mod backend {
    use super::*;

    pub struct Inner {
        epfd: RawFd,
    }

    impl Inner {
        pub fn create() -> Result<Inner, RuntimeError> {
            let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
            if epfd < 0 {
                return Err(RuntimeError::PollerInit(io::Error::last_os_error()));
            }
            Ok(Inner { epfd })
        }

        fn events_bits(interest: Interest) -> u32 {
            let mut e = libc::EPOLLONESHOT as u32;
            if interest.readable {
                e |= libc::EPOLLIN as u32;
            }
            if interest.writable {
                e |= libc::EPOLLOUT as u32;
            }
            e
        }

        pub fn add(&self, fd: RawFd, interest: Interest, ud: usize) -> io::Result<()> {
            self.ctl(libc::EPOLL_CTL_ADD, fd, interest, ud)
        }

        /// Re-arm after a one-shot event fires; epoll's rearm is just
        /// another `EPOLL_CTL_MOD`.
        pub fn rearm(&self, fd: RawFd, interest: Interest, ud: usize) -> io::Result<()> {
            self.ctl(libc::EPOLL_CTL_MOD, fd, interest, ud)
        }

        fn ctl(&self, op: i32, fd: RawFd, interest: Interest, ud: usize) -> io::Result<()> {
            let mut ev = libc::epoll_event { events: Self::events_bits(interest), u64: ud as u64 };
            let rc = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn remove(&self, fd: RawFd) -> io::Result<()> {
            let rc = unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        pub fn wait(&self, timeout_ms: i32) -> Vec<PollEvent> {
            let mut raw: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
            let n = unsafe { libc::epoll_wait(self.epfd, raw.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms) };
            if n <= 0 {
                return Vec::new();
            }
            raw[..n as usize]
                .iter()
                .map(|ev| PollEvent {
                    ud: ev.u64 as usize,
                    readable: ev.events & (libc::EPOLLIN as u32) != 0,
                    writable: ev.events & (libc::EPOLLOUT as u32) != 0,
                    error: ev.events & (libc::EPOLLERR as u32) != 0,
                    hup: ev.events & (libc::EPOLLHUP as u32) != 0,
                })
                .collect()
        }
    }

    impl Drop for Inner {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.epfd);
            }
        }
    }
}

#[cfg(target_os = "macos")]
mod backend {
    use super::*;

    pub struct Inner {
        kq: RawFd,
    }

    impl Inner {
        pub fn create() -> Result<Inner, RuntimeError> {
            let kq = unsafe { libc::kqueue() };
            if kq < 0 {
                return Err(RuntimeError::PollerInit(io::Error::last_os_error()));
            }
            Ok(Inner { kq })
        }

        fn submit(&self, changes: &[libc::kevent]) -> io::Result<()> {
            let rc = unsafe {
                libc::kevent(self.kq, changes.as_ptr(), changes.len() as i32, std::ptr::null_mut(), 0, std::ptr::null())
            };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn event(fd: RawFd, filter: i16, flags: u16, ud: usize) -> libc::kevent {
            libc::kevent {
                ident: fd as usize,
                filter,
                flags,
                fflags: 0,
                data: 0,
                udata: ud as *mut libc::c_void,
            }
        }

        pub fn add(&self, fd: RawFd, interest: Interest, ud: usize) -> io::Result<()> {
            let flags = (libc::EV_ADD | libc::EV_ENABLE | libc::EV_ONESHOT) as u16;
            let mut changes = Vec::with_capacity(2);
            if interest.readable {
                changes.push(Self::event(fd, libc::EVFILT_READ, flags, ud));
            }
            if interest.writable {
                changes.push(Self::event(fd, libc::EVFILT_WRITE, flags, ud));
            }
            self.submit(&changes)
        }

        /// kqueue has no real MOD: delete then add, matching the
        /// original's `netpoll_mod`.
        pub fn rearm(&self, fd: RawFd, interest: Interest, ud: usize) -> io::Result<()> {
            let _ = self.remove(fd);
            self.add(fd, interest, ud)
        }

        pub fn remove(&self, fd: RawFd) -> io::Result<()> {
            let changes = [
                Self::event(fd, libc::EVFILT_READ, libc::EV_DELETE as u16, 0),
                Self::event(fd, libc::EVFILT_WRITE, libc::EV_DELETE as u16, 0),
            ];
            // Deleting a filter that was never added returns ENOENT; the
            // original ignores kevent's return value here for the same
            // reason.
            let _ = self.submit(&changes);
            Ok(())
        }

        pub fn wait(&self, timeout_ms: i32) -> Vec<PollEvent> {
            let mut raw: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };
            let ts = libc::timespec { tv_sec: (timeout_ms / 1000) as i64, tv_nsec: ((timeout_ms % 1000) * 1_000_000) as i64 };
            let tsp: *const libc::timespec = if timeout_ms >= 0 { &ts } else { std::ptr::null() };
            let n = unsafe { libc::kevent(self.kq, std::ptr::null(), 0, raw.as_mut_ptr(), MAX_EVENTS as i32, tsp) };
            if n <= 0 {
                return Vec::new();
            }
            raw[..n as usize]
                .iter()
                .map(|ev| PollEvent {
                    ud: ev.udata as usize,
                    readable: ev.filter == libc::EVFILT_READ,
                    writable: ev.filter == libc::EVFILT_WRITE,
                    error: ev.flags & (libc::EV_ERROR as u16) != 0,
                    hup: ev.flags & (libc::EV_EOF as u16) != 0,
                })
                .collect()
        }
    }

    impl Drop for Inner {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.kq);
            }
        }
    }
}

/// A shared readiness poller. One instance drives the whole process's
/// net I/O; `add`/`rearm` register interest one-shot, `wait` blocks the
/// netio worker until at least one fd is ready or the timeout elapses.
pub struct Poller {
    inner: backend::Inner,
}

impl Poller {
    pub fn create() -> Result<Poller, RuntimeError> {
        Ok(Poller { inner: backend::Inner::create()? })
    }

    pub fn add(&self, fd: RawFd, interest: Interest, ud: usize) -> io::Result<()> {
        self.inner.add(fd, interest, ud)
    }

    pub fn rearm(&self, fd: RawFd, interest: Interest, ud: usize) -> io::Result<()> {
        self.inner.rearm(fd, interest, ud)
    }

    pub fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.inner.remove(fd)
    }

    /// Block for up to `timeout_ms` (negative = forever) and return
    /// whatever readiness events fired, capped at 128 per call to match
    /// the original's fixed-size stack buffer.
    pub fn wait(&self, timeout_ms: i32) -> Vec<PollEvent> {
        self.inner.wait(timeout_ms)
    }
}

unsafe impl Send for Poller {}
unsafe impl Sync for Poller {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poller_create_succeeds() {
        let p = Poller::create();
        assert!(p.is_ok());
    }

    #[test]
    fn test_add_wait_remove_on_a_pipe() {
        let mut fds = [0i32; 2];
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0);
        let (read_fd, write_fd) = (fds[0], fds[1]);

        let poller = Poller::create().unwrap();
        poller.add(read_fd, Interest::READ, 0xdead_beef).unwrap();

        let n = unsafe { libc::write(write_fd, b"x".as_ptr() as *const libc::c_void, 1) };
        assert_eq!(n, 1);

        let events = poller.wait(1000);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ud, 0xdead_beef);
        assert!(events[0].readable);

        poller.remove(read_fd).unwrap();
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }

    #[test]
    fn test_default_backend_matches_platform() {
        #[cfg(target_os = "linux")]
        assert_eq!(NetBackend::default_for_platform(), NetBackend::Epoll);
        #[cfg(target_os = "macos")]
        assert_eq!(NetBackend::default_for_platform(), NetBackend::Kqueue);
    }
}
