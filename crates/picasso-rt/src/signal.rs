//! Stack-overflow detection: a `SIGSEGV` handler on an alternate signal
//! stack catches a fault on a task's guard page and treats it as a
//! fatal stack overflow rather than an opaque segfault.
//!
//! Every worker thread installs its own alternate stack (required since
//! `sigaltstack` is per-thread and a fault on an overflowed task stack
//! cannot safely run a handler on that same stack); the handler itself
//! is installed once, process-wide, since `sigaction` is not per-thread.

use std::cell::Cell;

thread_local! {
    /// The bounds of the guard page directly beneath the task stack
    /// currently executing on this worker thread, if any — checked by
    /// the `SIGSEGV` handler to decide whether a fault is a guard-page
    /// hit (fatal, with a clear message) or something else (also fatal,
    /// but without pretending to know why).
    static GUARD_PAGE: Cell<(usize, usize)> = const { Cell::new((0, 0)) };
}

/// Record the guard-page range belonging to the task about to run on
/// this worker thread. Cleared once the task yields back to the
/// scheduler, mirroring `Worker::current_stack`.
pub fn set_current_guard_page(stack_low: usize) {
    let page = crate::alloc::page_size();
    GUARD_PAGE.with(|c| c.set((stack_low.saturating_sub(page), stack_low)));
}

pub fn clear_current_guard_page() {
    GUARD_PAGE.with(|c| c.set((0, 0)));
}

extern "C" fn handle_sigsegv(_sig: i32, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    let fault_addr = unsafe { (*info).si_addr() } as usize;
    let (lo, hi) = GUARD_PAGE.with(|c| c.get());
    if lo != 0 && fault_addr >= lo && fault_addr < hi {
        crate::error::runtime_error_from_signal("stack overflow (guard page hit)");
    }
    crate::error::runtime_error_from_signal("segmentation fault");
}

/// Install the alternate signal stack for the calling thread. Must be
/// called once per worker thread before it starts resuming tasks — a
/// fault on an overflowed task stack has no room left to run a handler
/// on that same stack.
pub fn install_altstack() {
    const ALTSTACK_SIZE: usize = 64 * 1024;
    unsafe {
        let mut buf = vec![0u8; ALTSTACK_SIZE].into_boxed_slice();
        let stack = libc::stack_t { ss_sp: buf.as_mut_ptr() as *mut libc::c_void, ss_flags: 0, ss_size: ALTSTACK_SIZE };
        std::mem::forget(buf); // leaked for the thread's lifetime, matching a dedicated worker's fixed-lifetime altstack
        if libc::sigaltstack(&stack, std::ptr::null_mut()) != 0 {
            log::warn!("picasso-rt: sigaltstack failed: {}", std::io::Error::last_os_error());
        }
    }
}

/// Install the process-wide `SIGSEGV` handler. Idempotent to call more
/// than once (each worker thread shares the same `sigaction`
/// installation; only the altstack is per-thread).
pub fn install_handler() {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sigsegv as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_ONSTACK;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut()) != 0 {
            log::warn!("picasso-rt: sigaction(SIGSEGV) failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_page_bounds_computed_below_stack_low() {
        clear_current_guard_page();
        let page = crate::alloc::page_size();
        set_current_guard_page(0x10_0000);
        let (lo, hi) = GUARD_PAGE.with(|c| c.get());
        assert_eq!(hi, 0x10_0000);
        assert_eq!(lo, 0x10_0000 - page);
        clear_current_guard_page();
    }

    #[test]
    fn test_clear_resets_to_zero() {
        set_current_guard_page(0x20_0000);
        clear_current_guard_page();
        assert_eq!(GUARD_PAGE.with(|c| c.get()), (0, 0));
    }
}
