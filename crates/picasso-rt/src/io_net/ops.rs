//! The net I/O per-op state machine and the netio worker thread that
//! drives it, over a `CONNECT`/`ACCEPT`/`READ`/`WRITE` case table.
//!
//! A task never touches the poller directly: `abi::net` fills the
//! task's `IoRecord`, registers interest here, and calls
//! `task::context::yield_now()`. The netio worker thread (one per
//! process) blocks in `Poller::wait`, and for every readiness event
//! advances that task's op until it reaches a terminal outcome, at
//! which point the fd is deregistered and the task is handed back to
//! its owning worker's ready queue.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::scheduler::Scheduler;
use crate::task::{IoOp, Task};

use super::listen_opts::{self, ListenOptions};
use super::poller::{Interest, Poller};

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fdflags = libc::fcntl(fd, libc::F_GETFD, 0);
        if fdflags < 0 || libc::fcntl(fd, libc::F_SETFD, fdflags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn sockaddr_in(addr: IpAddr, port: u16) -> (libc::sockaddr_storage, libc::socklen_t) {
    let std_addr = SocketAddr::new(addr, port);
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match std_addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.ip().octets()) },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t
        }
    };
    (storage, len)
}

/// Create, bind and listen on `addr:port`, applying `opts`, returning a
/// non-blocking, close-on-exec listening fd. Matches `net_listen`'s
/// setup half; the async accept loop lives in [`NetIo`].
pub fn create_listener(addr: IpAddr, port: u16, opts: &ListenOptions) -> Result<RawFd, RuntimeError> {
    let family = if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(RuntimeError::Syscall { name: "socket", source: io::Error::last_os_error() });
    }
    listen_opts::apply(fd, opts)?;
    set_nonblocking_cloexec(fd)
        .map_err(|source| RuntimeError::Syscall { name: "fcntl", source })?;

    let (storage, len) = sockaddr_in(addr, port);
    let rc = unsafe { libc::bind(fd, &storage as *const _ as *const libc::sockaddr, len) };
    if rc < 0 {
        let source = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(RuntimeError::ListenFailed { addr: format!("{addr}:{port}"), source });
    }
    let rc = unsafe { libc::listen(fd, opts.backlog) };
    if rc < 0 {
        let source = io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(RuntimeError::ListenFailed { addr: format!("{addr}:{port}"), source });
    }
    Ok(fd)
}

/// Create a non-blocking socket and start an async `connect(2)`.
/// Returns the fd immediately; completion (success or failure) is
/// detected later via `SO_ERROR` once the poller reports writability.
pub fn begin_dial(addr: IpAddr, port: u16) -> Result<RawFd, RuntimeError> {
    let family = if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
    let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
    if fd < 0 {
        return Err(RuntimeError::Syscall { name: "socket", source: io::Error::last_os_error() });
    }
    set_nonblocking_cloexec(fd).map_err(|source| RuntimeError::Syscall { name: "fcntl", source })?;

    let (storage, len) = sockaddr_in(addr, port);
    let rc = unsafe { libc::connect(fd, &storage as *const _ as *const libc::sockaddr, len) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            unsafe { libc::close(fd) };
            return Err(RuntimeError::Syscall { name: "connect", source: err });
        }
    }
    Ok(fd)
}

/// Accept one connection off `listen_fd`, returning a non-blocking,
/// close-on-exec client fd (or a negative errno-bearing result on
/// failure/EAGAIN). Linux accepts and sets both flags atomically via
/// `accept4`; macOS has no such call, so it accepts plain and applies
/// the flags after.
fn accept_one(listen_fd: RawFd) -> RawFd {
    #[cfg(target_os = "linux")]
    unsafe {
        let mut storage: libc::sockaddr_storage = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        libc::accept4(
            listen_fd,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
        )
    }
    #[cfg(not(target_os = "linux"))]
    unsafe {
        let mut storage: libc::sockaddr_storage = std::mem::zeroed();
        let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let client = libc::accept(listen_fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len);
        if client >= 0 && set_nonblocking_cloexec(client).is_err() {
            libc::close(client);
            return -1;
        }
        client
    }
}

/// Drives the shared [`Poller`] and the per-task state machine. Exactly
/// one instance runs for the whole process, on its own `picasso-netio`
/// thread.
pub struct NetIo {
    poller: Arc<Poller>,
}

impl NetIo {
    pub fn new(poller: Arc<Poller>) -> NetIo {
        NetIo { poller }
    }

    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    /// Register the task's currently pending op with the poller, with
    /// the task's own address (it is parked on its worker's wait queue,
    /// so this pointer stays valid and stable) as opaque user-data.
    pub fn register(&self, task: &Task) -> io::Result<()> {
        let ud = task as *const Task as usize;
        let interest = match task.io.op {
            IoOp::Connect | IoOp::Write => Interest::WRITE,
            IoOp::Accept | IoOp::Read => Interest::READ,
            IoOp::None => return Ok(()),
        };
        self.poller.add(task.io.fd, interest, ud)
    }

    fn rearm(&self, task: &Task) -> io::Result<()> {
        let ud = task as *const Task as usize;
        let interest = match task.io.op {
            IoOp::Connect | IoOp::Write => Interest::WRITE,
            IoOp::Accept | IoOp::Read => Interest::READ,
            IoOp::None => return Ok(()),
        };
        self.poller.rearm(task.io.fd, interest, ud)
    }

    /// Block for up to `timeout_ms` (negative = forever), advance every
    /// ready task's op, and hand terminal tasks back to their owning
    /// worker. Called in a loop by the netio worker thread.
    pub fn run_once(&self, scheduler: &Arc<Scheduler>, timeout_ms: i32) {
        for event in self.poller.wait(timeout_ms) {
            // Safety: `ud` was the address of a `Task` parked (and thus
            // exclusively, stably owned) on some worker's wait queue at
            // registration time; it has not moved since.
            let task_ptr = event.ud as *const Task;
            let (owning_worker, task_id) = unsafe { ((*task_ptr).owning_worker, (*task_ptr).id) };

            let sched = Arc::clone(scheduler);
            let terminal = unsafe { self.advance(&*task_ptr.cast_mut(), event.error, event.hup) };

            if terminal {
                if let Some(mut task) = wait_for_task_parked(&sched, owning_worker, task_id) {
                    let _ = self.poller.remove(task.io.fd);
                    task.io.io_done.store(true, std::sync::atomic::Ordering::SeqCst);
                    sched.wake(task);
                }
            } else {
                // Still in flight (partial read/write): re-arm in place,
                // task stays parked.
                let task_ref = unsafe { &*task_ptr };
                let _ = self.rearm(task_ref);
            }
        }
    }

    /// Advance one task's op by exactly one readiness event. Returns
    /// `true` if the op reached a terminal outcome (done_n/io_err set,
    /// ready to resume), `false` if it needs to stay registered
    /// (partial read/write).
    ///
    /// # Safety
    /// `task` must be the same live `Task` the event's user-data pointed
    /// at; the caller upholds this via the wait-queue membership
    /// invariant.
    unsafe fn advance(&self, task: &mut Task, poll_err: bool, poll_hup: bool) -> bool {
        use std::sync::atomic::Ordering;

        if poll_err {
            task.io.io_err.store(libc::EIO as i64, Ordering::SeqCst);
            task.io.done_n.store(-1, Ordering::SeqCst);
            return true;
        }

        match task.io.op {
            IoOp::Connect => {
                let mut err: libc::c_int = 0;
                let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
                let rc = libc::getsockopt(
                    task.io.fd,
                    libc::SOL_SOCKET,
                    libc::SO_ERROR,
                    &mut err as *mut _ as *mut libc::c_void,
                    &mut len,
                );
                if rc < 0 || err != 0 {
                    task.io.io_err.store(if err != 0 { err as i64 } else { libc::EIO as i64 }, Ordering::SeqCst);
                    task.io.done_n.store(-1, Ordering::SeqCst);
                } else {
                    task.io.done_n.store(task.io.fd as i64, Ordering::SeqCst);
                }
                true
            }
            IoOp::Accept => {
                let client = accept_one(task.io.fd);
                if client < 0 {
                    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
                    if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                        return false; // spurious wake, rearm and keep waiting
                    }
                    task.io.io_err.store(errno as i64, Ordering::SeqCst);
                    task.io.done_n.store(-1, Ordering::SeqCst);
                } else {
                    task.io.done_n.store(client as i64, Ordering::SeqCst);
                }
                true
            }
            IoOp::Read => {
                let _ = poll_hup;
                let buf_off = task.io.buf.add(task.io.done_n.load(Ordering::SeqCst).max(0) as usize);
                let remaining = task.io.req_n - task.io.done_n.load(Ordering::SeqCst).max(0) as usize;
                let n = libc::recv(task.io.fd, buf_off as *mut libc::c_void, remaining, 0);
                if n < 0 {
                    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
                    if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                        return false;
                    }
                    task.io.io_err.store(errno as i64, Ordering::SeqCst);
                    task.io.done_n.store(-1, Ordering::SeqCst);
                    return true;
                }
                let already = task.io.done_n.load(Ordering::SeqCst).max(0) as usize;
                let total = already + n as usize;
                task.io.done_n.store(total as i64, Ordering::SeqCst);
                // n == 0 is EOF: finalize with whatever was read so far.
                total >= task.io.req_n || n == 0
            }
            IoOp::Write => {
                let already = task.io.done_n.load(Ordering::SeqCst).max(0) as usize;
                let buf_off = task.io.buf.add(already);
                let remaining = task.io.req_n - already;
                let n = libc::send(task.io.fd, buf_off as *const libc::c_void, remaining, libc::MSG_NOSIGNAL);
                if n < 0 {
                    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
                    if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                        return false;
                    }
                    task.io.io_err.store(errno as i64, Ordering::SeqCst);
                    task.io.done_n.store(-1, Ordering::SeqCst);
                    return true;
                }
                let total = already + n as usize;
                task.io.done_n.store(total as i64, Ordering::SeqCst);
                total >= task.io.req_n
            }
            IoOp::None => true,
        }
    }
}

/// See the identical note on the disk-ring side: a readiness event can
/// in principle arrive before the worker loop finishes parking the task
/// that registered it. Spin briefly instead of dropping the event.
fn wait_for_task_parked(scheduler: &Scheduler, owning_worker: usize, task_id: crate::task::TaskId) -> Option<Box<Task>> {
    for attempt in 0..10_000 {
        if let Some(task) = scheduler.workers[owning_worker].wait.remove(task_id) {
            return Some(task);
        }
        if attempt > 100 {
            std::thread::yield_now();
        }
    }
    log::warn!("picasso-rt: net completion for {task_id} never observed on wait queue");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_create_listener_binds_ephemeral_port() {
        let opts = ListenOptions::default();
        let fd = create_listener(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, &opts);
        assert!(fd.is_ok());
        unsafe { libc::close(fd.unwrap()) };
    }

    #[test]
    fn test_begin_dial_to_closed_port_does_not_panic() {
        // Port 1 is reserved and normally refused instantly or queued
        // async; either way this must not panic and must return a fd.
        let fd = begin_dial(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        assert!(fd.is_ok());
        unsafe { libc::close(fd.unwrap()) };
    }
}
