//! The M:N scheduler: a fixed pool of worker OS threads, each driving
//! its own ready queue of cooperatively-scheduled tasks.
//!
//! No work-stealing here, deliberately: a task is placed on a random
//! worker at spawn time and never migrates again — it lives and dies
//! on the worker it started on.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use rand::Rng;

use crate::gc::GcState;
use crate::sync::{ReadyQueue, WaitQueue};
use crate::task::{Task, TaskId};

/// Per-worker state: one ready queue, one wait queue (I/O-blocked
/// tasks), and a preemption flag the GC/timer can raise.
pub struct Worker {
    pub id: usize,
    pub ready: ReadyQueue,
    pub wait: WaitQueue,
    preempt: AtomicBool,
    /// Stack bounds of the task currently executing on this worker, if
    /// any — set for the duration of `ctx.resume()` so the GC's
    /// conservative scan can cover it even though the task isn't sitting
    /// in either queue while it runs.
    current_stack: Mutex<Option<(usize, usize)>>,
}

impl Worker {
    fn new(id: usize) -> Self {
        Worker {
            id,
            ready: ReadyQueue::new(),
            wait: WaitQueue::new(),
            preempt: AtomicBool::new(false),
            current_stack: Mutex::new(None),
        }
    }

    pub fn request_preempt(&self) {
        self.preempt.store(true, Ordering::SeqCst);
    }

    pub fn current_stack(&self) -> Option<(usize, usize)> {
        *self.current_stack.lock()
    }
}

/// The scheduler: owns every worker and the process-wide live task
/// count that drives the poison-broadcast shutdown.
pub struct Scheduler {
    pub workers: Vec<Arc<Worker>>,
    pub gc: Arc<GcState>,
    task_count: AtomicUsize,
}

thread_local! {
    /// The worker this OS thread is driving, set for the lifetime of
    /// `Scheduler::worker_loop`. Used by `spawn` called from inside a
    /// running task (to favor the local worker) and by `self_yield`.
    static CURRENT_WORKER: std::cell::Cell<usize> = const { std::cell::Cell::new(usize::MAX) };
}

impl Scheduler {
    pub fn new(worker_count: usize, gc: Arc<GcState>) -> Arc<Self> {
        assert!(worker_count > 0, "scheduler needs at least one worker");
        let workers = (0..worker_count).map(Worker::new).map(Arc::new).collect();
        Arc::new(Scheduler { workers, gc, task_count: AtomicUsize::new(0) })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Spawn worker OS threads and block the caller forever driving
    /// them — used by tests and the runtime's own thread-pool bring-up
    /// in `runtime::init`. Returns the join handles so the caller can
    /// keep them (they only return once every task has finished).
    pub fn spawn_worker_threads(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.worker_count())
            .map(|id| {
                let sched = Arc::clone(self);
                std::thread::Builder::new()
                    .name(format!("picasso-worker-{id}"))
                    .stack_size(64 * 1024)
                    .spawn(move || sched.worker_loop(id))
                    .expect("failed to spawn worker thread")
            })
            .collect()
    }

    /// Place a new task on a randomly chosen worker's ready queue. No
    /// rebalancing, no stealing: this is the only placement decision a
    /// task's lifetime ever gets.
    ///
    /// # Safety obligation
    /// `arg` must remain valid until `entry` observes it; the ABI layer
    /// upholds this by boxing the payload alongside the raw pointer.
    pub fn spawn(self: &Arc<Self>, stack_size: usize, entry: impl FnOnce(*const u8) + Send + 'static, arg: *const u8) {
        let worker_id = rand::rng().random_range(0..self.worker_count());
        let task = Box::new(Task::new(stack_size, worker_id, entry, arg));
        self.task_count.fetch_add(1, Ordering::SeqCst);
        self.workers[worker_id].ready.push(task);
    }

    pub fn live_task_count(&self) -> usize {
        self.task_count.load(Ordering::SeqCst)
    }

    /// Resume a previously-parked task (I/O completion, mutex handoff)
    /// by pushing it back onto its owning worker's ready queue.
    pub fn wake(&self, task: Box<Task>) {
        let worker = task.owning_worker;
        self.workers[worker].ready.push(task);
    }

    /// Cooperative preemption check, called between tasks and at safe
    /// points inside long-running tasks. Mirrors `self_yield`: either
    /// honors a pending preempt flag, or — if the world is stopped for
    /// GC — blocks this worker thread at the GC rendezvous until
    /// resumed.
    pub fn self_yield(&self, worker_id: usize) {
        if !self.gc.world_stopped() {
            if self.workers[worker_id].preempt.swap(false, Ordering::SeqCst) {
                crate::task::context::yield_now();
            }
            return;
        }
        self.gc.park_mutator();
    }

    /// The worker thread's main loop: pop, run, reap, repeat, until a
    /// poison value (pushed once the global task count hits zero) ends
    /// it.
    fn worker_loop(self: Arc<Self>, id: usize) {
        CURRENT_WORKER.with(|c| c.set(id));
        crate::signal::install_altstack();
        let worker = Arc::clone(&self.workers[id]);
        loop {
            let mut task = match worker.ready.pop_wait() {
                Some(t) => t,
                None => return,
            };

            self.gc.enroll_mutator();
            worker.wait.park_transient_noop();

            task.state = crate::task::TaskState::Running;
            let (stack_lo, stack_hi) = task.ctx.stack_bounds();
            *worker.current_stack.lock() = Some((stack_lo, stack_hi));
            crate::signal::set_current_guard_page(stack_lo);
            crate::task::context::set_current_task(task.as_mut() as *mut crate::task::Task);
            let still_alive = task.ctx.resume();
            crate::task::context::clear_current_task();
            crate::signal::clear_current_guard_page();
            *worker.current_stack.lock() = None;
            self.gc.retire_mutator();

            if still_alive {
                task.state = crate::task::TaskState::Yielded;
                if task.io.op != crate::task::IoOp::None && !task.io.io_done.load(Ordering::SeqCst) {
                    worker.wait.park(task);
                } else {
                    worker.ready.push(task);
                }
            } else {
                task.state = crate::task::TaskState::Finished;
                drop(task);
                if self.task_count.fetch_sub(1, Ordering::SeqCst) == 1 {
                    for w in &self.workers {
                        w.ready.push_poison();
                    }
                    return;
                }
            }
        }
    }

    /// The task id currently running on this OS thread's worker, if any
    /// — a convenience for diagnostics and the ABI's self-lookup.
    pub fn current_worker_id() -> Option<usize> {
        CURRENT_WORKER.with(|c| {
            let v = c.get();
            if v == usize::MAX {
                None
            } else {
                Some(v)
            }
        })
    }
}

impl WaitQueue {
    /// No-op hook kept for call-site symmetry with the original's
    /// `unsafe_ioq_remove` (which removed the task from its own wait
    /// queue on resume, racing completion workers). This crate's
    /// `WaitQueue::remove` already makes that race-free, and a task only
    /// ever enters `wait` via `park`, never pre-emptively — so there is
    /// nothing to remove here at pop time.
    fn park_transient_noop(&self) {}
}

#[allow(dead_code)]
fn _assert_task_id_type(_: TaskId) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::GcState;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_spawn_runs_task_to_completion() {
        static RAN: AtomicU64 = AtomicU64::new(0);
        RAN.store(0, Ordering::SeqCst);

        let gc = GcState::new(1);
        let sched = Scheduler::new(2, gc);
        sched.spawn(64 * 1024, |_| { RAN.fetch_add(1, Ordering::SeqCst); }, std::ptr::null());

        let handles = sched.spawn_worker_threads();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_many_tasks_across_workers_all_complete() {
        static RAN: AtomicU64 = AtomicU64::new(0);
        RAN.store(0, Ordering::SeqCst);

        let gc = GcState::new(4);
        let sched = Scheduler::new(4, gc);
        for _ in 0..200 {
            sched.spawn(64 * 1024, |_| { RAN.fetch_add(1, Ordering::SeqCst); }, std::ptr::null());
        }
        let handles = sched.spawn_worker_threads();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(RAN.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_yielding_task_is_rescheduled_until_done() {
        static STEPS: AtomicU64 = AtomicU64::new(0);
        STEPS.store(0, Ordering::SeqCst);

        let gc = GcState::new(1);
        let sched = Scheduler::new(1, gc);
        sched.spawn(
            64 * 1024,
            |_| {
                for _ in 0..5 {
                    STEPS.fetch_add(1, Ordering::SeqCst);
                    crate::task::context::yield_now();
                }
            },
            std::ptr::null(),
        );
        let handles = sched.spawn_worker_threads();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(STEPS.load(Ordering::SeqCst), 5);
    }
}
