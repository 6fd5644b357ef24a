//! Shared helpers behind the `s`-prefixed (synchronous) and `a`-prefixed
//! (asynchronous) disk I/O entry points. The actual ABI functions live
//! in `abi::sync_io`/`abi::async_io`; this module holds the blocking
//! retry loop and the task-record setup both paths share.
//!
//! Grounded on `async_file_read`/`async_file_write` and their blocking
//! counterparts in `original_source/runtime/headers/io.h`: "retries on
//! EINTR and short reads/writes as appropriate" for the synchronous
//! path, no retry loop for the async ring path.

use std::io;
use std::os::unix::io::RawFd;

use crate::task::{IoOp, Task};

/// Fill a task's inline I/O record ahead of either a ring submission or
/// a blocking syscall, clearing any previous completion state.
pub fn prepare(task: &mut Task, fd: RawFd, buf: *mut u8, req_n: usize, offset: i64, op: IoOp) {
    task.io.reset(fd, buf, req_n, offset, op);
}

/// Blocking `pread` loop: retries on `EINTR`, stops early on a short
/// read (the caller got a real EOF or a partial result, not a soft
/// interruption) or once `len` bytes have been read.
pub fn sync_read_retry(fd: RawFd, buf: *mut u8, len: usize, offset: i64) -> (i64, i32) {
    let mut total = 0usize;
    loop {
        let rc = unsafe { libc::pread(fd, buf.add(total) as *mut libc::c_void, len - total, offset + total as i64) };
        if rc < 0 {
            let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
            if errno == libc::EINTR {
                continue;
            }
            return (-1, errno);
        }
        if rc == 0 {
            break; // EOF
        }
        total += rc as usize;
        if total >= len {
            break;
        }
    }
    (total as i64, 0)
}

/// Blocking `pwrite` loop: retries on `EINTR` and on every short write
/// until the full buffer has been written.
pub fn sync_write_retry(fd: RawFd, buf: *const u8, len: usize, offset: i64) -> (i64, i32) {
    let mut total = 0usize;
    while total < len {
        let rc = unsafe { libc::pwrite(fd, buf.add(total) as *const libc::c_void, len - total, offset + total as i64) };
        if rc < 0 {
            let errno = io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
            if errno == libc::EINTR {
                continue;
            }
            return (-1, errno);
        }
        total += rc as usize;
    }
    (total as i64, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_sync_write_then_read_roundtrip() {
        let mut file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let data = b"hello disk io";
        let (written, errno) = sync_write_retry(fd, data.as_ptr(), data.len(), 0);
        assert_eq!(errno, 0);
        assert_eq!(written as usize, data.len());
        file.flush().unwrap();

        let mut buf = vec![0u8; data.len()];
        let (read_n, errno) = sync_read_retry(fd, buf.as_mut_ptr(), buf.len(), 0);
        assert_eq!(errno, 0);
        assert_eq!(read_n as usize, data.len());
        assert_eq!(&buf[..], &data[..]);
    }

    #[test]
    fn test_sync_read_past_eof_returns_short_count() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let mut buf = vec![0u8; 16];
        let (n, errno) = sync_read_retry(fd, buf.as_mut_ptr(), buf.len(), 0);
        assert_eq!(errno, 0);
        assert_eq!(n, 0);
    }
}
