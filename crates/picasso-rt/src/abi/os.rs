//! Raw OS syscall thunks and the platform constants compiled code needs
//! to drive them, re-exported with an `OS_` prefix. These are thin —
//! each function is a direct `libc` call with no retry loop and no
//! translation of the return value; errors come back as `-1` with the
//! calling thread's `errno` left exactly as the kernel set it. Compiled
//! code that wants EINTR-retrying or short-read-safe I/O uses
//! [`super::sync_io`]/[`super::async_io`] instead.
//!
//! Grouped by concern: process/signal, environment, users/groups, file
//! descriptors, filesystem paths, and memory mapping. Not every syscall
//! a hosting program might want has a thunk here — only the subset this
//! runtime's own subsystems (and a reasonably complete hosting program)
//! need; see DESIGN.md for what was left out and why.

#[cfg(test)]
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_long, c_void};

// --- errno / common constants -------------------------------------------

pub const OS_EAGAIN: c_int = libc::EAGAIN;
pub const OS_EINTR: c_int = libc::EINTR;
pub const OS_EINVAL: c_int = libc::EINVAL;
pub const OS_EPERM: c_int = libc::EPERM;
pub const OS_ENOENT: c_int = libc::ENOENT;
pub const OS_ENOMEM: c_int = libc::ENOMEM;
pub const OS_EBADF: c_int = libc::EBADF;
pub const OS_EPIPE: c_int = libc::EPIPE;
pub const OS_EIO: c_int = libc::EIO;
pub const OS_ENOSPC: c_int = libc::ENOSPC;
pub const OS_EFAULT: c_int = libc::EFAULT;
pub const OS_EACCES: c_int = libc::EACCES;

pub const OS_SIGINT: c_int = libc::SIGINT;
pub const OS_SIGTERM: c_int = libc::SIGTERM;
pub const OS_SIGKILL: c_int = libc::SIGKILL;
pub const OS_SIGSEGV: c_int = libc::SIGSEGV;
pub const OS_SIGABRT: c_int = libc::SIGABRT;
pub const OS_SIGCHLD: c_int = libc::SIGCHLD;
pub const OS_SIGPIPE: c_int = libc::SIGPIPE;
pub const OS_SIGALRM: c_int = libc::SIGALRM;
pub const OS_SIGUSR1: c_int = libc::SIGUSR1;
pub const OS_SIGUSR2: c_int = libc::SIGUSR2;

pub const OS_STDIN_FD: c_int = 0;
pub const OS_STDOUT_FD: c_int = 1;
pub const OS_STDERR_FD: c_int = 2;

// --- open() / seek / fcntl ----------------------------------------------

pub const OS_O_RDONLY: c_int = libc::O_RDONLY;
pub const OS_O_WRONLY: c_int = libc::O_WRONLY;
pub const OS_O_RDWR: c_int = libc::O_RDWR;
pub const OS_O_APPEND: c_int = libc::O_APPEND;
pub const OS_O_CREAT: c_int = libc::O_CREAT;
pub const OS_O_EXCL: c_int = libc::O_EXCL;
pub const OS_O_TRUNC: c_int = libc::O_TRUNC;
pub const OS_O_CLOEXEC: c_int = libc::O_CLOEXEC;
pub const OS_O_NONBLOCK: c_int = libc::O_NONBLOCK;

pub const OS_SEEK_SET: c_int = libc::SEEK_SET;
pub const OS_SEEK_CUR: c_int = libc::SEEK_CUR;
pub const OS_SEEK_END: c_int = libc::SEEK_END;

pub const OS_F_DUPFD: c_int = libc::F_DUPFD;
pub const OS_F_GETFD: c_int = libc::F_GETFD;
pub const OS_F_SETFD: c_int = libc::F_SETFD;
pub const OS_F_GETFL: c_int = libc::F_GETFL;
pub const OS_F_SETFL: c_int = libc::F_SETFL;
pub const OS_FD_CLOEXEC: c_int = libc::FD_CLOEXEC;

pub const OS_F_OK: c_int = libc::F_OK;
pub const OS_R_OK: c_int = libc::R_OK;
pub const OS_W_OK: c_int = libc::W_OK;
pub const OS_X_OK: c_int = libc::X_OK;

// --- mmap / mprotect / madvise -------------------------------------------

pub const OS_PROT_NONE: c_int = libc::PROT_NONE;
pub const OS_PROT_READ: c_int = libc::PROT_READ;
pub const OS_PROT_WRITE: c_int = libc::PROT_WRITE;
pub const OS_PROT_EXEC: c_int = libc::PROT_EXEC;

pub const OS_MAP_SHARED: c_int = libc::MAP_SHARED;
pub const OS_MAP_PRIVATE: c_int = libc::MAP_PRIVATE;
pub const OS_MAP_FIXED: c_int = libc::MAP_FIXED;
pub const OS_MAP_ANONYMOUS: c_int = libc::MAP_ANONYMOUS;

pub const OS_MADV_NORMAL: c_int = libc::MADV_NORMAL;
pub const OS_MADV_RANDOM: c_int = libc::MADV_RANDOM;
pub const OS_MADV_SEQUENTIAL: c_int = libc::MADV_SEQUENTIAL;
pub const OS_MADV_WILLNEED: c_int = libc::MADV_WILLNEED;
pub const OS_MADV_DONTNEED: c_int = libc::MADV_DONTNEED;

/// Reads the calling thread's current `errno`, for callers that want to
/// inspect it after a `-1` return from one of these thunks.
#[no_mangle]
pub extern "C" fn picasso_os_errno() -> c_int {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn picasso_os_getpid() -> c_int {
    unsafe { libc::getpid() }
}

#[no_mangle]
pub extern "C" fn picasso_os_getppid() -> c_int {
    unsafe { libc::getppid() }
}

#[no_mangle]
pub extern "C" fn picasso_os_gettid() -> c_long {
    #[cfg(target_os = "linux")]
    unsafe {
        libc::syscall(libc::SYS_gettid) as c_long
    }
    #[cfg(not(target_os = "linux"))]
    unsafe {
        libc::pthread_self() as c_long
    }
}

/// Terminates the process immediately (`_exit`, bypassing atexit
/// handlers and stdio flush, matching the original's thunk over the
/// raw `exit` syscall rather than libc's `exit()`).
#[no_mangle]
pub extern "C" fn picasso_os_exit(code: c_int) -> ! {
    unsafe { libc::_exit(code) }
}

#[no_mangle]
pub extern "C" fn picasso_os_fork() -> c_int {
    unsafe { libc::fork() }
}

#[no_mangle]
pub extern "C" fn picasso_os_waitpid(pid: c_int, status: *mut c_int, options: c_int) -> c_int {
    unsafe { libc::waitpid(pid, status, options) }
}

#[no_mangle]
pub extern "C" fn picasso_os_kill(pid: c_int, sig: c_int) -> c_int {
    unsafe { libc::kill(pid, sig) }
}

// --- environment ---------------------------------------------------------

/// # Safety
/// `key` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_getenv(key: *const c_char) -> *const c_char {
    if key.is_null() {
        return std::ptr::null();
    }
    libc::getenv(key)
}

/// # Safety
/// `key` and `value` must be valid NUL-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_setenv(key: *const c_char, value: *const c_char, overwrite: c_int) -> c_int {
    if key.is_null() || value.is_null() {
        return -1;
    }
    libc::setenv(key, value, overwrite)
}

/// # Safety
/// `key` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_unsetenv(key: *const c_char) -> c_int {
    if key.is_null() {
        return -1;
    }
    libc::unsetenv(key)
}

#[no_mangle]
pub extern "C" fn picasso_os_getcwd(buf: *mut c_char, size: usize) -> c_int {
    let p = unsafe { libc::getcwd(buf, size) };
    if p.is_null() {
        -1
    } else {
        0
    }
}

/// # Safety
/// `path` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_chdir(path: *const c_char) -> c_int {
    if path.is_null() {
        return -1;
    }
    libc::chdir(path)
}

// --- users / groups --------------------------------------------------------

#[no_mangle]
pub extern "C" fn picasso_os_getuid() -> u32 {
    unsafe { libc::getuid() }
}
#[no_mangle]
pub extern "C" fn picasso_os_geteuid() -> u32 {
    unsafe { libc::geteuid() }
}
#[no_mangle]
pub extern "C" fn picasso_os_getgid() -> u32 {
    unsafe { libc::getgid() }
}
#[no_mangle]
pub extern "C" fn picasso_os_getegid() -> u32 {
    unsafe { libc::getegid() }
}

// --- file descriptors --------------------------------------------------------

/// # Safety
/// `path` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_open(path: *const c_char, flags: c_int, mode: c_int) -> c_int {
    if path.is_null() {
        return -1;
    }
    libc::open(path, flags, mode as libc::mode_t)
}

#[no_mangle]
pub extern "C" fn picasso_os_close(fd: c_int) -> c_int {
    unsafe { libc::close(fd) }
}

/// # Safety
/// `buf` must point to at least `n` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_read(fd: c_int, buf: *mut c_void, n: usize) -> isize {
    libc::read(fd, buf, n)
}

/// # Safety
/// `buf` must point to at least `n` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_write(fd: c_int, buf: *const c_void, n: usize) -> isize {
    libc::write(fd, buf, n)
}

#[no_mangle]
pub extern "C" fn picasso_os_lseek(fd: c_int, offset: i64, whence: c_int) -> i64 {
    unsafe { libc::lseek(fd, offset, whence) }
}

#[no_mangle]
pub extern "C" fn picasso_os_dup(fd: c_int) -> c_int {
    unsafe { libc::dup(fd) }
}

#[no_mangle]
pub extern "C" fn picasso_os_dup2(oldfd: c_int, newfd: c_int) -> c_int {
    unsafe { libc::dup2(oldfd, newfd) }
}

#[no_mangle]
pub extern "C" fn picasso_os_fcntl(fd: c_int, cmd: c_int, arg: c_long) -> c_int {
    unsafe { libc::fcntl(fd, cmd, arg) }
}

// --- filesystem paths --------------------------------------------------------

/// # Safety
/// `path` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_mkdir(path: *const c_char, mode: c_int) -> c_int {
    if path.is_null() {
        return -1;
    }
    libc::mkdir(path, mode as libc::mode_t)
}

/// # Safety
/// `path` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_rmdir(path: *const c_char) -> c_int {
    if path.is_null() {
        return -1;
    }
    libc::rmdir(path)
}

/// # Safety
/// `path` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_unlink(path: *const c_char) -> c_int {
    if path.is_null() {
        return -1;
    }
    libc::unlink(path)
}

/// # Safety
/// `oldpath` and `newpath` must be valid NUL-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_rename(oldpath: *const c_char, newpath: *const c_char) -> c_int {
    if oldpath.is_null() || newpath.is_null() {
        return -1;
    }
    libc::rename(oldpath, newpath)
}

/// # Safety
/// `path` must be a valid NUL-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_access(path: *const c_char, mode: c_int) -> c_int {
    if path.is_null() {
        return -1;
    }
    libc::access(path, mode)
}

// --- memory mapping --------------------------------------------------------

/// # Safety
/// Same contract as the raw `mmap(2)` syscall.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_mmap(
    addr: *mut c_void,
    len: usize,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    off: i64,
) -> *mut c_void {
    libc::mmap(addr, len, prot, flags, fd, off)
}

/// # Safety
/// `addr` must be a region previously returned by [`picasso_os_mmap`],
/// still mapped, covering `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_munmap(addr: *mut c_void, len: usize) -> c_int {
    libc::munmap(addr, len)
}

/// # Safety
/// `addr`/`len` must describe an already-mapped region.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_mprotect(addr: *mut c_void, len: usize, prot: c_int) -> c_int {
    libc::mprotect(addr, len, prot)
}

/// # Safety
/// `addr`/`len` must describe an already-mapped region.
#[no_mangle]
pub unsafe extern "C" fn picasso_os_madvise(addr: *mut c_void, len: usize, advice: c_int) -> c_int {
    libc::madvise(addr, len, advice)
}

/// Helper for tests/other Rust callers wanting a safe `CString` round
/// trip instead of raw pointers; not part of the C ABI.
#[cfg(test)]
fn cstring(s: &str) -> CString {
    CString::new(s).unwrap()
}

#[cfg(test)]
fn cstr_to_string(p: *const c_char) -> String {
    unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getpid_matches_std() {
        assert_eq!(picasso_os_getpid() as u32, std::process::id());
    }

    #[test]
    fn test_setenv_getenv_roundtrip() {
        let key = cstring("PICASSO_OS_TEST_VAR");
        let val = cstring("hello");
        unsafe {
            assert_eq!(picasso_os_setenv(key.as_ptr(), val.as_ptr(), 1), 0);
            let got = picasso_os_getenv(key.as_ptr());
            assert!(!got.is_null());
            assert_eq!(cstr_to_string(got), "hello");
            assert_eq!(picasso_os_unsetenv(key.as_ptr()), 0);
            assert!(picasso_os_getenv(key.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_open_write_read_close_roundtrip() {
        let path = std::env::temp_dir().join(format!("picasso-os-test-{}", std::process::id()));
        let path_c = cstring(path.to_str().unwrap());
        let fd = unsafe { picasso_os_open(path_c.as_ptr(), OS_O_CREAT | OS_O_RDWR | OS_O_TRUNC, 0o600) };
        assert!(fd >= 0);

        let data = b"picasso";
        let written = unsafe { picasso_os_write(fd, data.as_ptr() as *const c_void, data.len()) };
        assert_eq!(written, data.len() as isize);

        assert_eq!(picasso_os_lseek(fd, 0, OS_SEEK_SET), 0);
        let mut buf = [0u8; 7];
        let n = unsafe { picasso_os_read(fd, buf.as_mut_ptr() as *mut c_void, buf.len()) };
        assert_eq!(n, 7);
        assert_eq!(&buf, data);

        assert_eq!(picasso_os_close(fd), 0);
        unsafe { picasso_os_unlink(path_c.as_ptr()) };
    }

    #[test]
    fn test_mmap_munmap_roundtrip() {
        let len = 4096;
        let addr = unsafe {
            picasso_os_mmap(
                std::ptr::null_mut(),
                len,
                OS_PROT_READ | OS_PROT_WRITE,
                OS_MAP_PRIVATE | OS_MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(addr, libc::MAP_FAILED);
        unsafe {
            std::ptr::write_bytes(addr as *mut u8, 0x42, len);
            assert_eq!(*(addr as *const u8), 0x42);
        }
        assert_eq!(unsafe { picasso_os_munmap(addr, len) }, 0);
    }

    #[test]
    fn test_errno_reflects_failed_call() {
        let bad_fd = -1;
        assert_eq!(picasso_os_close(bad_fd), -1);
        assert_eq!(picasso_os_errno(), OS_EBADF);
    }
}
