//! The intrusive wait queue a worker parks its I/O-blocked tasks on.
//!
//! The original runtime carries two variants of this list — a safe,
//! mutex+cv-guarded one (`safe_gcqueue_t`, used for GC root
//! registration) and an unsafe, owner-only one (`unsafe_queue_t`, used
//! for the per-worker wait list) whose non-synchronized removal races
//! against completion workers pushing back onto the ready queue. This
//! crate resolves that open question by making the wait queue
//! thread-safe unconditionally: completion workers (disk or net) both
//! remove from here and push to the ready queue under this same lock's
//! discipline, closing the race.

use parking_lot::Mutex;

use crate::task::{Task, TaskId};

pub struct WaitQueue {
    parked: Mutex<Vec<Box<Task>>>,
}

impl WaitQueue {
    pub fn new() -> Self {
        WaitQueue { parked: Mutex::new(Vec::new()) }
    }

    /// Park a task that has suspended itself pending I/O completion.
    pub fn park(&self, task: Box<Task>) {
        self.parked.lock().push(task);
    }

    /// Remove and return the parked task with the given id, if present.
    /// A no-op returning `None` if the task is not a member — this is
    /// what makes `task_resume`'s unconditional "remove if member" call
    /// safe to make on every dequeue.
    pub fn remove(&self, id: TaskId) -> Option<Box<Task>> {
        let mut g = self.parked.lock();
        let pos = g.iter().position(|t| t.id == id)?;
        Some(g.swap_remove(pos))
    }

    pub fn len(&self) -> usize {
        self.parked.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every currently-parked task's stack anchor, for the
    /// GC's conservative root scan (a parked task's stack is still live).
    pub fn with_parked<R>(&self, f: impl FnOnce(&[Box<Task>]) -> R) -> R {
        let g = self.parked.lock();
        f(&g)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;

    fn make_task() -> Box<Task> {
        Box::new(Task::new(64 * 1024, 0, |_| {}, std::ptr::null()))
    }

    #[test]
    fn test_park_and_remove() {
        let wq = WaitQueue::new();
        let t = make_task();
        let id = t.id;
        wq.park(t);
        assert_eq!(wq.len(), 1);
        let removed = wq.remove(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(wq.is_empty());
    }

    #[test]
    fn test_remove_non_member_is_noop() {
        let wq = WaitQueue::new();
        let t = make_task();
        let bogus_id = crate::task::TaskId::next();
        wq.park(t);
        assert!(wq.remove(bogus_id).is_none());
        assert_eq!(wq.len(), 1);
    }
}
