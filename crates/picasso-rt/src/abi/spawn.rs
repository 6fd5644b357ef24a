//! The `spawn` entry point. Instead of building a `libffi` variadic
//! call descriptor, compiled code's entry function pointer and its
//! argument buffer are packed into a boxed [`TaskPayload`] that the
//! scheduler's generic `entry(arg: *const u8)` contract unpacks.

use crate::runtime;

/// What a spawned task's trampoline needs to invoke compiled code: the
/// function pointer it should call, and an owned copy of its argument
/// bytes (copied at spawn time so the caller's buffer can be reused or
/// freed immediately after `picasso_spawn` returns).
struct TaskPayload {
    entry: extern "C" fn(*const u8),
    args: Vec<u8>,
}

extern "C" fn trampoline(payload: *const u8) {
    let payload = unsafe { Box::from_raw(payload as *mut TaskPayload) };
    (payload.entry)(payload.args.as_ptr());
}

/// Spawn a new task that will call `fn_ptr(args)` on some worker,
/// chosen at random at spawn time.
///
/// # Safety
/// `args` must point to `args_len` readable bytes for the duration of
/// this call; they are copied before the task is placed on a queue.
#[no_mangle]
pub unsafe extern "C" fn picasso_spawn(fn_ptr: extern "C" fn(*const u8), args: *const u8, args_len: usize) {
    let owned_args = if args_len == 0 { Vec::new() } else { std::slice::from_raw_parts(args, args_len).to_vec() };
    let payload = Box::new(TaskPayload { entry: fn_ptr, args: owned_args });
    let raw = Box::into_raw(payload) as *const u8;

    let rt = runtime::global();
    rt.scheduler.spawn(rt.config.task_stack_size, trampoline, raw);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    static OBSERVED: AtomicI64 = AtomicI64::new(-1);

    extern "C" fn record_first_byte(args: *const u8) {
        let byte = unsafe { *args };
        OBSERVED.store(byte as i64, Ordering::SeqCst);
    }

    #[test]
    fn test_trampoline_unpacks_payload_and_calls_entry() {
        OBSERVED.store(-1, Ordering::SeqCst);
        let payload = Box::new(TaskPayload { entry: record_first_byte, args: vec![42] });
        let raw = Box::into_raw(payload) as *const u8;
        trampoline(raw);
        assert_eq!(OBSERVED.load(Ordering::SeqCst), 42);
    }
}
