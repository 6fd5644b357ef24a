//! The `s`-prefixed blocking disk I/O entry points: `sscan`, `sprintf`,
//! `sfread`, `sfwrite`. Formatting itself is out of scope — compiled
//! code hands these an already-formatted byte buffer; the runtime only
//! moves bytes, retrying on `EINTR` and short reads/writes.

use crate::abi::mem::ArrayAbi;
use crate::io_disk::ops::{sync_read_retry, sync_write_retry};
use crate::runtime;

const STDIN_FD: i32 = 0;
const STDOUT_FD: i32 = 1;

/// Blocking read of up to `n` bytes from stdin into a freshly allocated
/// array.
#[no_mangle]
pub extern "C" fn picasso_sscan(n: i64) -> *mut ArrayAbi {
    let arena = runtime::current_worker_arena();
    let buf = arena.allocate(n.max(0) as usize);
    let (read_n, errno) = sync_read_retry(STDIN_FD, buf, n.max(0) as usize, 0);
    if errno != 0 {
        return std::ptr::null_mut();
    }
    build_array(&arena, buf, read_n.max(0))
}

/// Blocking write of an already-formatted buffer to stdout. Returns the
/// byte count written, or -1 on error.
///
/// # Safety
/// `buf` must point to `len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_sprintf(buf: *const u8, len: i64) -> i64 {
    let (written, errno) = sync_write_retry(STDOUT_FD, buf, len.max(0) as usize, 0);
    if errno != 0 {
        return -1;
    }
    written
}

/// Blocking read of `n` bytes from file handle `fh` at offset `off`
/// into `array`'s data buffer, which must already be at least `n` bytes.
///
/// # Safety
/// `array` must be a live [`ArrayAbi`] whose `data` buffer holds at
/// least `n` bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_sfread(fh: i32, array: *mut ArrayAbi, n: i64, off: i64) -> i64 {
    let data = (*array).data as *mut u8;
    let (read_n, errno) = sync_read_retry(fh, data, n.max(0) as usize, off);
    if errno != 0 {
        -1
    } else {
        read_n
    }
}

/// Blocking write of `n` bytes from `array`'s data buffer to file handle
/// `fh` at offset `off`.
///
/// # Safety
/// `array` must be a live [`ArrayAbi`] whose `data` buffer holds at
/// least `n` bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_sfwrite(fh: i32, array: *const ArrayAbi, n: i64, off: i64) -> i64 {
    let data = (*array).data as *const u8;
    let (written, errno) = sync_write_retry(fh, data, n.max(0) as usize, off);
    if errno != 0 {
        -1
    } else {
        written
    }
}

fn build_array(arena: &crate::alloc::Arena, data: *mut u8, length: i64) -> *mut ArrayAbi {
    let shape = arena.allocate(std::mem::size_of::<i64>()) as *mut i64;
    if !shape.is_null() {
        unsafe { std::ptr::write(shape, length) };
    }
    let header = arena.allocate(std::mem::size_of::<ArrayAbi>()) as *mut ArrayAbi;
    if header.is_null() {
        return std::ptr::null_mut();
    }
    unsafe { std::ptr::write(header, ArrayAbi { data: data as *mut i8, shape, length, rank: 1 }) };
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_build_array_carries_length_and_rank_one() {
        let arena = crate::alloc::Arena::create();
        let data = arena.allocate(4);
        let header = build_array(&arena, data, 4);
        assert!(!header.is_null());
        let hdr = unsafe { &*header };
        assert_eq!(hdr.length, 4);
        assert_eq!(hdr.rank, 1);
    }

    #[test]
    fn test_sfwrite_then_sfread_roundtrip() {
        let mut file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        let arena = crate::alloc::Arena::create();

        let data = b"roundtrip";
        let src = arena.allocate(data.len());
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), src, data.len()) };
        let src_array = ArrayAbi { data: src as *mut i8, shape: std::ptr::null_mut(), length: data.len() as i64, rank: 1 };

        let written = unsafe { picasso_sfwrite(fd, &src_array as *const ArrayAbi, data.len() as i64, 0) };
        assert_eq!(written as usize, data.len());
        file.flush().unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let dst = arena.allocate(data.len());
        let mut dst_array = ArrayAbi { data: dst as *mut i8, shape: std::ptr::null_mut(), length: data.len() as i64, rank: 1 };
        let read_n = unsafe { picasso_sfread(fd, &mut dst_array as *mut ArrayAbi, data.len() as i64, 0) };
        assert_eq!(read_n as usize, data.len());
        let read_back = unsafe { std::slice::from_raw_parts(dst as *const u8, data.len()) };
        assert_eq!(read_back, data);
    }
}
