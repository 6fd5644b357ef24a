//! The `a`-prefixed disk I/O entry points: `ascan`, `aprintf`, `afread`,
//! `afwrite`. Each fills the current task's inline I/O record, submits
//! it to the calling worker's disk ring, and yields — the completion
//! worker thread resumes the task once the ring reports a result.

use std::sync::atomic::Ordering;

use crate::abi::mem::ArrayAbi;
use crate::io_disk::ops;
use crate::task::{IoOp, Task};
use crate::{runtime, task::context};

const STDIN_FD: i32 = 0;
const STDOUT_FD: i32 = 1;

/// # Panics
/// Panics if called outside of a running task — there is no current
/// task whose I/O record could carry the request.
fn current_task() -> &'static mut Task {
    let ptr = context::current_task();
    assert!(!ptr.is_null(), "async I/O entry point called outside of a task context");
    unsafe { &mut *ptr }
}

fn submit_and_wait(task: &mut Task, fd: i32, buf: *mut u8, req_n: usize, offset: i64, op: IoOp) -> (i64, i32) {
    ops::prepare(task, fd, buf, req_n, offset, op);
    let ring = runtime::disk_ring_for_current_worker();
    if ring.submit(task).is_err() {
        return (-1, libc::EIO);
    }
    context::yield_now();
    (task.io.done_n.load(Ordering::SeqCst), task.io.io_err.load(Ordering::SeqCst) as i32)
}

/// Async read of up to `n` bytes from stdin into a freshly allocated
/// array, suspending the current task until the disk ring completes it.
#[no_mangle]
pub extern "C" fn picasso_ascan(n: i64) -> *mut ArrayAbi {
    let task = current_task();
    let arena = runtime::current_worker_arena();
    let buf = arena.allocate(n.max(0) as usize);

    let (done_n, errno) = submit_and_wait(task, STDIN_FD, buf, n.max(0) as usize, 0, IoOp::Read);
    if errno != 0 || done_n < 0 {
        return std::ptr::null_mut();
    }

    let shape = arena.allocate(std::mem::size_of::<i64>()) as *mut i64;
    if !shape.is_null() {
        unsafe { std::ptr::write(shape, done_n) };
    }
    let header = arena.allocate(std::mem::size_of::<ArrayAbi>()) as *mut ArrayAbi;
    if header.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { std::ptr::write(header, ArrayAbi { data: buf as *mut i8, shape, length: done_n, rank: 1 }) };
    header
}

/// Async write of an already-formatted buffer to stdout. Returns the
/// byte count written, or -1 on error.
///
/// # Safety
/// `buf` must point to `len` readable bytes for the duration of the
/// call (it is not copied: the disk ring reads directly from it while
/// the task is suspended).
#[no_mangle]
pub unsafe extern "C" fn picasso_aprintf(buf: *mut u8, len: i64) -> i64 {
    let task = current_task();
    let (done_n, errno) = submit_and_wait(task, STDOUT_FD, buf, len.max(0) as usize, 0, IoOp::Write);
    if errno != 0 { -1 } else { done_n }
}

/// Async read of `n` bytes from file handle `fh` at offset `off` into
/// `array`'s data buffer.
///
/// # Safety
/// `array` must be a live [`ArrayAbi`] whose `data` buffer holds at
/// least `n` bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_afread(fh: i32, array: *mut ArrayAbi, n: i64, off: i64) -> i64 {
    let task = current_task();
    let data = (*array).data as *mut u8;
    let (done_n, errno) = submit_and_wait(task, fh, data, n.max(0) as usize, off, IoOp::Read);
    if errno != 0 { -1 } else { done_n }
}

/// Async write of `n` bytes from `array`'s data buffer to file handle
/// `fh` at offset `off`.
///
/// # Safety
/// `array` must be a live [`ArrayAbi`] whose `data` buffer holds at
/// least `n` bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_afwrite(fh: i32, array: *mut ArrayAbi, n: i64, off: i64) -> i64 {
    let task = current_task();
    let data = (*array).data as *mut u8;
    let (done_n, errno) = submit_and_wait(task, fh, data, n.max(0) as usize, off, IoOp::Write);
    if errno != 0 { -1 } else { done_n }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "outside of a task context")]
    fn test_ascan_outside_task_context_panics() {
        context::clear_current_task();
        picasso_ascan(16);
    }

    #[test]
    #[should_panic(expected = "outside of a task context")]
    fn test_aprintf_outside_task_context_panics() {
        context::clear_current_task();
        let mut buf = [0u8; 4];
        unsafe { picasso_aprintf(buf.as_mut_ptr(), buf.len() as i64) };
    }
}
