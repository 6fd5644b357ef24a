//! The `Task` control block: the scheduler's unit of work.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use super::context::TaskContext;

/// Default task stack size: 1 MiB, per the original runtime's
/// `STACK_SIZE` constant. Configurable via `RuntimeConfig`.
pub const STACK_SIZE: usize = 1024 * 1024;

/// Reduction budget between cooperative yields, matching the scheduler's
/// reduction-counting preemption hint.
pub const DEFAULT_REDUCTIONS: u32 = 4000;

/// A task's unique id. Monotonically increasing; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    pub fn next() -> TaskId {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task<{}>", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Yielded,
    Finished,
}

/// The op-kind of an in-flight I/O request, shared by the disk and net
/// I/O subsystems' per-task inline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    None,
    Read,
    Write,
    Connect,
    Accept,
}

/// Inline I/O request record embedded in every task: fd, buffer
/// pointer, requested length, completed length, offset, op-kind,
/// errno, done flag, and an optional sockaddr. Reused by both disk I/O
/// and net I/O call sites.
pub struct IoRecord {
    pub fd: i32,
    pub buf: *mut u8,
    pub req_n: usize,
    pub done_n: AtomicI64,
    pub offset: i64,
    pub op: IoOp,
    pub io_err: AtomicI64,
    pub io_done: AtomicBool,
    pub sockaddr: Option<std::net::SocketAddr>,
}

unsafe impl Send for IoRecord {}

impl Default for IoRecord {
    fn default() -> Self {
        IoRecord {
            fd: -1,
            buf: std::ptr::null_mut(),
            req_n: 0,
            done_n: AtomicI64::new(0),
            offset: 0,
            op: IoOp::None,
            io_err: AtomicI64::new(0),
            io_done: AtomicBool::new(false),
            sockaddr: None,
        }
    }
}

impl IoRecord {
    pub fn reset(&mut self, fd: i32, buf: *mut u8, req_n: usize, offset: i64, op: IoOp) {
        self.fd = fd;
        self.buf = buf;
        self.req_n = req_n;
        self.offset = offset;
        self.op = op;
        self.done_n.store(0, Ordering::SeqCst);
        self.io_err.store(0, Ordering::SeqCst);
        self.io_done.store(false, Ordering::SeqCst);
    }
}

/// The task control block. Owns its stack/context exclusively; the
/// owning worker's ready queue may transitively own the task between
/// operations.
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub ctx: TaskContext,
    pub owning_worker: usize,
    pub reductions: u32,
    pub io: IoRecord,
    /// Captured at coroutine entry by `TaskContext`; read by the GC for
    /// conservative stack scanning. Null until the task has run at least
    /// once.
    pub stack_anchor: std::sync::atomic::AtomicPtr<u8>,
    /// Back-pointer slot into the task's current wait-queue node, if
    /// parked. Nullable; see `sync::wait_queue`.
    pub wait_node: std::sync::atomic::AtomicUsize,
}

unsafe impl Send for Task {}

impl Task {
    pub fn new(
        stack_size: usize,
        owning_worker: usize,
        entry: impl FnOnce(*const u8) + 'static,
        arg: *const u8,
    ) -> Self {
        Task {
            id: TaskId::next(),
            state: TaskState::Yielded,
            ctx: TaskContext::new(stack_size, entry, arg),
            owning_worker,
            reductions: DEFAULT_REDUCTIONS,
            io: IoRecord::default(),
            stack_anchor: std::sync::atomic::AtomicPtr::new(std::ptr::null_mut()),
            wait_node: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == TaskState::Finished
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("owning_worker", &self.owning_worker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_unique_and_increasing() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b.0 > a.0);
    }

    #[test]
    fn test_io_record_reset_clears_completion_state() {
        let mut rec = IoRecord::default();
        rec.done_n.store(42, Ordering::SeqCst);
        rec.io_done.store(true, Ordering::SeqCst);
        rec.reset(3, std::ptr::null_mut(), 16, 0, IoOp::Read);
        assert_eq!(rec.done_n.load(Ordering::SeqCst), 0);
        assert!(!rec.io_done.load(Ordering::SeqCst));
        assert_eq!(rec.fd, 3);
    }

    #[test]
    fn test_task_new_starts_not_finished() {
        let t = Task::new(64 * 1024, 0, |_| {}, std::ptr::null());
        assert!(!t.is_finished());
    }
}
