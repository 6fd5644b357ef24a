//! Stackful coroutine context switch via `corosensei`.
//!
//! Each task runs on its own `DefaultStack` (which already carries a
//! guard page directly beneath the usable stack) and yields
//! cooperatively through a `Yielder` installed in a thread-local for
//! the duration of each resume. This is the `unsafe` boundary the rest
//! of the runtime treats as ordinary code.

use std::cell::Cell;
use std::ptr;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

thread_local! {
    /// Type-erased pointer to the active coroutine's `Yielder`. Valid only
    /// while that coroutine is running on this thread.
    static CURRENT_YIELDER: Cell<Option<*const ()>> = const { Cell::new(None) };

    /// The two stack-bound anchors captured for the coroutine currently
    /// running on this thread: (captured-at-entry, none-yet). Used by the
    /// GC's conservative stack scan; see `TaskContext::stack_bounds`.
    static ENTRY_ANCHOR: Cell<*const u8> = const { Cell::new(ptr::null()) };

    /// Raw pointer to whichever task is currently resumed on this
    /// worker thread, mirroring the original runtime's
    /// `extern __thread task_t* current_task;`. Set by the scheduler
    /// immediately before `TaskContext::resume` and cleared immediately
    /// after, so ABI entry points running inside the coroutine body can
    /// find their own task (and its I/O record) without threading it
    /// through every call.
    static CURRENT_TASK: Cell<*mut crate::task::task::Task> = const { Cell::new(ptr::null_mut()) };
}

/// Install the task about to be resumed on this thread. Must be paired
/// with [`clear_current_task`] once `resume` returns.
pub fn set_current_task(task: *mut crate::task::task::Task) {
    CURRENT_TASK.with(|c| c.set(task));
}

/// Clear the current-task slot after a resume completes or yields.
pub fn clear_current_task() {
    CURRENT_TASK.with(|c| c.set(ptr::null_mut()));
}

/// The task currently running on this thread, or null if called outside
/// of a task context (e.g. from the main thread before the scheduler
/// starts).
pub fn current_task() -> *mut crate::task::task::Task {
    CURRENT_TASK.with(|c| c.get())
}

/// The `IoRecord` of the task currently running on this thread, or null
/// if there is none.
pub fn current_io() -> *mut crate::task::task::IoRecord {
    let task = current_task();
    if task.is_null() {
        return ptr::null_mut();
    }
    unsafe { &mut (*task).io as *mut crate::task::task::IoRecord }
}

/// Yield the coroutine currently running on this thread.
///
/// # Panics
/// Panics if called outside of a running coroutine (i.e. no yielder is
/// installed on this thread).
pub fn yield_now() {
    CURRENT_YIELDER.with(|c| {
        let ptr = c.get().expect("yield_now called outside of a task context");
        let yielder: &Yielder<(), ()> = unsafe { &*(ptr as *const Yielder<(), ()>) };
        yielder.suspend(());
        c.set(Some(ptr));
    });
}

/// Entry-time stack anchor for the coroutine running on this thread, or
/// null if none is running. Captured once, at the very start of the
/// coroutine body.
pub fn entry_anchor() -> *const u8 {
    ENTRY_ANCHOR.with(|c| c.get())
}

/// A task's execution context: a dedicated stack plus the coroutine
/// driving it. `!Send` in spirit (corosensei coroutines cannot migrate
/// threads mid-flight) — the scheduler never moves a `TaskContext` once
/// it has started running.
pub struct TaskContext {
    coro: Coroutine<(), (), ()>,
    /// (low, high) address bounds of the task's stack, captured from the
    /// `Stack` before it is consumed by `Coroutine::with_stack`. Used by
    /// the GC's conservative scan; a suspended coroutine's live roots are
    /// spilled somewhere in this range regardless of the exact
    /// suspension point, since corosensei saves all callee-saved
    /// registers to the stack before yielding control back to the
    /// resumer.
    stack_bounds: (usize, usize),
}

impl TaskContext {
    /// Build a new context that will call `entry(arg)` when first resumed.
    ///
    /// `stack_size` excludes the guard page; `corosensei::stack::DefaultStack`
    /// adds its own guard page beneath the usable region.
    pub fn new(stack_size: usize, entry: impl FnOnce(*const u8) + 'static, arg: *const u8) -> Self {
        use corosensei::stack::Stack;

        let stack = DefaultStack::new(stack_size).expect("failed to mmap task stack");
        let stack_bounds = (stack.limit().as_ptr() as usize, stack.base().get() as usize);
        let arg_addr = arg as usize;

        let coro = Coroutine::with_stack(stack, move |yielder: &Yielder<(), ()>, _: ()| {
            let anchor: u64 = 0;
            let _ = std::hint::black_box(&anchor);
            ENTRY_ANCHOR.with(|c| c.set(&anchor as *const u64 as *const u8));

            CURRENT_YIELDER.with(|c| {
                c.set(Some(yielder as *const Yielder<(), ()> as *const ()));
            });

            entry(arg_addr as *const u8);
        });

        TaskContext { coro, stack_bounds }
    }

    /// The task's stack address range, for conservative root scanning.
    pub fn stack_bounds(&self) -> (usize, usize) {
        self.stack_bounds
    }

    /// Resume the task. Returns `true` if it yielded (still has work to
    /// do), `false` if it ran to completion.
    pub fn resume(&mut self) -> bool {
        match self.coro.resume(()) {
            CoroutineResult::Yield(()) => true,
            CoroutineResult::Return(()) => false,
        }
    }

    pub fn done(&self) -> bool {
        self.coro.done()
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext").field("done", &self.done()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_context_runs_to_completion() {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.store(0, Ordering::SeqCst);

        let mut ctx = TaskContext::new(
            64 * 1024,
            |_arg| {
                COUNTER.fetch_add(1, Ordering::SeqCst);
            },
            ptr::null(),
        );
        let yielded = ctx.resume();
        assert!(!yielded);
        assert!(ctx.done());
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_context_yield_and_resume() {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.store(0, Ordering::SeqCst);

        let mut ctx = TaskContext::new(
            64 * 1024,
            |_arg| {
                COUNTER.fetch_add(1, Ordering::SeqCst);
                yield_now();
                COUNTER.fetch_add(1, Ordering::SeqCst);
            },
            ptr::null(),
        );

        assert!(ctx.resume());
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
        assert!(!ctx.resume());
        assert_eq!(COUNTER.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_entry_anchor_set_during_run() {
        let mut ctx = TaskContext::new(
            64 * 1024,
            |_arg| {
                assert!(!entry_anchor().is_null());
            },
            ptr::null(),
        );
        ctx.resume();
    }
}
