//! The listener option set `net_listen` accepts: backlog,
//! `SO_REUSEADDR`, `SO_REUSEPORT`, `TCP_NODELAY`, `TCP_DEFER_ACCEPT`,
//! `TCP_FASTOPEN`, `SO_KEEPALIVE`, `SO_RCVBUF`, `SO_SNDBUF`,
//! `IPV6_V6ONLY`.

use std::io;
use std::os::unix::io::RawFd;

use crate::error::RuntimeError;

#[derive(Debug, Clone)]
pub struct ListenOptions {
    pub backlog: i32,
    pub reuseaddr: bool,
    pub reuseport: bool,
    pub nodelay: bool,
    /// `TCP_DEFER_ACCEPT` timeout in seconds, Linux-only; ignored
    /// elsewhere (`setsockopt` is just skipped).
    pub defer_accept_secs: Option<i32>,
    pub fastopen_queue: Option<i32>,
    pub keepalive: bool,
    pub rcvbuf: Option<i32>,
    pub sndbuf: Option<i32>,
    pub v6only: Option<bool>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        ListenOptions {
            backlog: 1024,
            reuseaddr: true,
            reuseport: false,
            nodelay: true,
            defer_accept_secs: None,
            fastopen_queue: None,
            keepalive: false,
            rcvbuf: None,
            sndbuf: None,
            v6only: None,
        }
    }
}

fn setsockopt_i32(fd: RawFd, level: i32, name: i32, value: i32) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const i32 as *const libc::c_void,
            std::mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Apply every option in `opts` that is set, to a listening socket `fd`
/// that has already been bound but not yet had `listen(2)` called.
/// Options with no portable `libc` constant on the current platform are
/// silently skipped rather than erroring, matching the original's
/// `#ifdef`-guarded option application.
pub fn apply(fd: RawFd, opts: &ListenOptions) -> Result<(), RuntimeError> {
    let apply_one = |name: &'static str, r: io::Result<()>| -> Result<(), RuntimeError> {
        r.map_err(|source| RuntimeError::Syscall { name, source })
    };

    if opts.reuseaddr {
        apply_one("SO_REUSEADDR", setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1))?;
    }
    if opts.reuseport {
        #[cfg(target_os = "linux")]
        apply_one("SO_REUSEPORT", setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1))?;
        #[cfg(target_os = "macos")]
        apply_one("SO_REUSEPORT", setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1))?;
    }
    if opts.nodelay {
        apply_one("TCP_NODELAY", setsockopt_i32(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY, 1))?;
    }
    if opts.keepalive {
        apply_one("SO_KEEPALIVE", setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1))?;
    }
    if let Some(secs) = opts.defer_accept_secs {
        #[cfg(target_os = "linux")]
        apply_one("TCP_DEFER_ACCEPT", setsockopt_i32(fd, libc::IPPROTO_TCP, libc::TCP_DEFER_ACCEPT, secs))?;
        #[cfg(not(target_os = "linux"))]
        let _ = secs;
    }
    if let Some(queue) = opts.fastopen_queue {
        #[cfg(target_os = "linux")]
        apply_one("TCP_FASTOPEN", setsockopt_i32(fd, libc::IPPROTO_TCP, libc::TCP_FASTOPEN, queue))?;
        #[cfg(not(target_os = "linux"))]
        let _ = queue;
    }
    if let Some(size) = opts.rcvbuf {
        apply_one("SO_RCVBUF", setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size))?;
    }
    if let Some(size) = opts.sndbuf {
        apply_one("SO_SNDBUF", setsockopt_i32(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, size))?;
    }
    if let Some(v6only) = opts.v6only {
        apply_one("IPV6_V6ONLY", setsockopt_i32(fd, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, v6only as i32))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_default_options_on_tcp_socket() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        let opts = ListenOptions::default();
        let result = apply(fd, &opts);
        assert!(result.is_ok());
        unsafe { libc::close(fd) };
    }

    #[test]
    fn test_apply_rcvbuf_and_sndbuf() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        let mut opts = ListenOptions::default();
        opts.rcvbuf = Some(65536);
        opts.sndbuf = Some(65536);
        assert!(apply(fd, &opts).is_ok());
        unsafe { libc::close(fd) };
    }
}
