//! Network I/O entry points: `net_listen`, `net_dial`, `net_accept`,
//! `net_read`, `net_write`. Connection setup is synchronous (a listening
//! socket is ready the moment `listen(2)` returns); everything that can
//! block — accept, connect completion, read, write — suspends the
//! current task on the shared poller.

use std::net::IpAddr;
use std::sync::atomic::Ordering;

use crate::io_net::ops::{self, NetIo};
use crate::io_net::ListenOptions;
use crate::task::{IoOp, Task};
use crate::{runtime, task::context};

/// Listener options as a C-shaped struct: `Option<T>` fields become a
/// sentinel (-1 for absent) alongside the flag, matching how compiled
/// code would actually build this on the stack before calling
/// `picasso_net_listen`.
#[repr(C)]
pub struct NetListenOpts {
    pub backlog: i32,
    pub reuseaddr: bool,
    pub reuseport: bool,
    pub nodelay: bool,
    pub defer_accept_secs: i32, // -1 = unset
    pub fastopen_queue: i32,    // -1 = unset
    pub keepalive: bool,
    pub rcvbuf: i32, // -1 = unset
    pub sndbuf: i32, // -1 = unset
    pub v6only: i32, // -1 = unset, 0 = false, 1 = true
}

impl From<&NetListenOpts> for ListenOptions {
    fn from(o: &NetListenOpts) -> ListenOptions {
        ListenOptions {
            backlog: o.backlog,
            reuseaddr: o.reuseaddr,
            reuseport: o.reuseport,
            nodelay: o.nodelay,
            defer_accept_secs: if o.defer_accept_secs < 0 { None } else { Some(o.defer_accept_secs) },
            fastopen_queue: if o.fastopen_queue < 0 { None } else { Some(o.fastopen_queue) },
            keepalive: o.keepalive,
            rcvbuf: if o.rcvbuf < 0 { None } else { Some(o.rcvbuf) },
            sndbuf: if o.sndbuf < 0 { None } else { Some(o.sndbuf) },
            v6only: if o.v6only < 0 { None } else { Some(o.v6only != 0) },
        }
    }
}

fn current_task() -> &'static mut Task {
    let ptr = context::current_task();
    assert!(!ptr.is_null(), "net I/O entry point called outside of a task context");
    unsafe { &mut *ptr }
}

fn parse_addr(addr: *const u8, addr_len: i64) -> Option<IpAddr> {
    let bytes = unsafe { std::slice::from_raw_parts(addr, addr_len.max(0) as usize) };
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Register the current task's op with the shared poller and suspend it
/// until the netio thread drives it to a terminal outcome.
fn register_and_wait(task: &mut Task, fd: i32, buf: *mut u8, req_n: usize, op: IoOp) -> (i64, i32) {
    task.io.reset(fd, buf, req_n, 0, op);
    let net_io: &NetIo = &runtime::global().net_io;
    if net_io.register(task).is_err() {
        return (-1, libc::EIO);
    }
    context::yield_now();
    (task.io.done_n.load(Ordering::SeqCst), task.io.io_err.load(Ordering::SeqCst) as i32)
}

/// Create, bind and listen on `addr:port`. Returns the listening fd, or
/// -1 if the address is malformed or the setup syscalls fail.
///
/// # Safety
/// `addr` must point to `addr_len` readable bytes and `opts` to a live
/// [`NetListenOpts`].
#[no_mangle]
pub unsafe extern "C" fn picasso_net_listen(addr: *const u8, addr_len: i64, port: u16, opts: *const NetListenOpts) -> i32 {
    let Some(ip) = parse_addr(addr, addr_len) else {
        return -1;
    };
    let listen_opts: ListenOptions = (&*opts).into();
    match ops::create_listener(ip, port, &listen_opts) {
        Ok(fd) => fd,
        Err(e) => {
            log::warn!("picasso-rt: net_listen failed: {e}");
            -1
        }
    }
}

/// Start an async connect to `addr:port`, suspending the current task
/// until it succeeds or fails. Returns the connected fd, or -1.
///
/// # Safety
/// `addr` must point to `addr_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_net_dial(addr: *const u8, addr_len: i64, port: u16) -> i32 {
    let Some(ip) = parse_addr(addr, addr_len) else {
        return -1;
    };
    let fd = match ops::begin_dial(ip, port) {
        Ok(fd) => fd,
        Err(e) => {
            log::warn!("picasso-rt: net_dial failed: {e}");
            return -1;
        }
    };

    let task = current_task();
    let (done_n, errno) = register_and_wait(task, fd, std::ptr::null_mut(), 0, IoOp::Connect);
    if errno != 0 || done_n < 0 {
        libc::close(fd);
        return -1;
    }
    fd
}

/// Accept one connection on listening fd `fd`, suspending the current
/// task until one is ready. Returns the accepted fd, or -1.
#[no_mangle]
pub extern "C" fn picasso_net_accept(fd: i32) -> i32 {
    let task = current_task();
    let (done_n, errno) = register_and_wait(task, fd, std::ptr::null_mut(), 0, IoOp::Accept);
    if errno != 0 || done_n < 0 {
        -1
    } else {
        done_n as i32
    }
}

/// Read up to `len` bytes from connected fd `fd` into `buf`, suspending
/// the current task until the read completes (full buffer or EOF).
///
/// # Safety
/// `buf` must point to `len` writable bytes for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn picasso_net_read(fd: i32, buf: *mut u8, len: i64) -> i64 {
    let task = current_task();
    let (done_n, errno) = register_and_wait(task, fd, buf, len.max(0) as usize, IoOp::Read);
    if errno != 0 { -1 } else { done_n }
}

/// Write `len` bytes from `buf` to connected fd `fd`, suspending the
/// current task until the whole buffer has been sent.
///
/// # Safety
/// `buf` must point to `len` readable bytes for the duration of the call.
#[no_mangle]
pub unsafe extern "C" fn picasso_net_write(fd: i32, buf: *mut u8, len: i64) -> i64 {
    let task = current_task();
    let (done_n, errno) = register_and_wait(task, fd, buf, len.max(0) as usize, IoOp::Write);
    if errno != 0 { -1 } else { done_n }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_parse_addr_accepts_loopback() {
        let s = "127.0.0.1";
        let parsed = parse_addr(s.as_ptr(), s.len() as i64);
        assert_eq!(parsed, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    }

    #[test]
    fn test_parse_addr_rejects_garbage() {
        let s = "not-an-address";
        assert!(parse_addr(s.as_ptr(), s.len() as i64).is_none());
    }

    #[test]
    fn test_net_listen_opts_converts_sentinels_to_none() {
        let raw = NetListenOpts {
            backlog: 128,
            reuseaddr: true,
            reuseport: false,
            nodelay: true,
            defer_accept_secs: -1,
            fastopen_queue: -1,
            keepalive: false,
            rcvbuf: 4096,
            sndbuf: -1,
            v6only: -1,
        };
        let opts: ListenOptions = (&raw).into();
        assert_eq!(opts.defer_accept_secs, None);
        assert_eq!(opts.rcvbuf, Some(4096));
        assert_eq!(opts.sndbuf, None);
        assert_eq!(opts.v6only, None);
    }
}
