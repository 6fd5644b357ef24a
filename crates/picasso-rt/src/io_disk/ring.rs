//! The per-worker disk ring: `io_uring` on Linux, a blocking thread
//! pool presenting the same submit/complete shape on macOS. Grounded on
//! `io_worker`/`io_ring_map` in `original_source/runtime/headers/io.h`
//! and `original_source/runtime/src/io.c`'s submit/complete split.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::error::RuntimeError;
use crate::scheduler::Scheduler;
use crate::task::{IoOp, Task};

/// One completed disk op, as handed from whichever backend drives the
/// ring back to the worker loop: the task pointer that was submitted,
/// the byte count (or -1 on error), and the errno if any.
pub struct DiskCompletion {
    pub task_ptr: usize,
    pub result: i64,
    pub errno: i32,
}

#[cfg(target_os = "linux")]
mod backend {
    use super::*;
    use io_uring::{opcode, types, IoUring};
    use std::io;

    pub struct Inner {
        ring: parking_lot::Mutex<IoUring>,
    }

    impl Inner {
        pub fn create(depth: usize) -> Result<Inner, RuntimeError> {
            let ring = IoUring::new(depth as u32).map_err(RuntimeError::RingInit)?;
            Ok(Inner { ring: parking_lot::Mutex::new(ring) })
        }

        pub fn submit(&self, task: &Task) -> io::Result<()> {
            let ud = task as *const Task as u64;
            let buf = task.io.buf;
            let len = task.io.req_n as u32;
            let offset = task.io.offset;

            let entry = match task.io.op {
                IoOp::Read => opcode::Read::new(types::Fd(task.io.fd), buf, len)
                    .offset(offset as u64)
                    .build()
                    .user_data(ud),
                IoOp::Write => opcode::Write::new(types::Fd(task.io.fd), buf, len)
                    .offset(offset as u64)
                    .build()
                    .user_data(ud),
                IoOp::None | IoOp::Connect | IoOp::Accept => return Ok(()),
            };

            let mut ring = self.ring.lock();
            unsafe {
                ring.submission()
                    .push(&entry)
                    .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "submission queue full"))?;
            }
            ring.submit()?;
            Ok(())
        }

        /// Block until at least one completion is available and drain
        /// everything currently queued.
        pub fn wait_completions(&self) -> Vec<DiskCompletion> {
            let mut ring = self.ring.lock();
            if ring.submit_and_wait(1).is_err() {
                return Vec::new();
            }
            ring.completion()
                .map(|cqe| DiskCompletion {
                    task_ptr: cqe.user_data() as usize,
                    result: if cqe.result() < 0 { -1 } else { cqe.result() as i64 },
                    errno: if cqe.result() < 0 { -cqe.result() } else { 0 },
                })
                .collect()
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod backend {
    use super::*;
    use std::io;

    const FALLBACK_THREADS: usize = 4;

    struct Job {
        task_ptr: usize,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        offset: i64,
        op: IoOp,
    }

    unsafe impl Send for Job {}

    /// Blocking-I/O thread pool standing in for `io_uring` where it
    /// doesn't exist. Presents the same submit-then-drain-completions
    /// shape so `ops.rs` is backend-independent.
    pub struct Inner {
        jobs: crossbeam_channel::Sender<Job>,
        completions: crossbeam_channel::Receiver<DiskCompletion>,
        _workers: Vec<std::thread::JoinHandle<()>>,
    }

    impl Inner {
        pub fn create(_depth: usize) -> Result<Inner, RuntimeError> {
            let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
            let (comp_tx, comp_rx) = crossbeam_channel::unbounded::<DiskCompletion>();

            let workers = (0..FALLBACK_THREADS)
                .map(|i| {
                    let job_rx = job_rx.clone();
                    let comp_tx = comp_tx.clone();
                    std::thread::Builder::new()
                        .name(format!("picasso-diskio-fallback-{i}"))
                        .spawn(move || {
                            while let Ok(job) = job_rx.recv() {
                                let (result, errno) = run_blocking(&job);
                                let _ = comp_tx.send(DiskCompletion { task_ptr: job.task_ptr, result, errno });
                            }
                        })
                        .expect("failed to spawn disk fallback worker")
                })
                .collect();

            Ok(Inner { jobs: job_tx, completions: comp_rx, _workers: workers })
        }

        pub fn submit(&self, task: &Task) -> io::Result<()> {
            let job = Job {
                task_ptr: task as *const Task as usize,
                fd: task.io.fd,
                buf: task.io.buf,
                len: task.io.req_n,
                offset: task.io.offset,
                op: task.io.op,
            };
            self.jobs.send(job).map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "disk fallback pool shut down"))
        }

        pub fn wait_completions(&self) -> Vec<DiskCompletion> {
            match self.completions.recv() {
                Ok(first) => {
                    let mut out = vec![first];
                    while let Ok(more) = self.completions.try_recv() {
                        out.push(more);
                    }
                    out
                }
                Err(_) => Vec::new(),
            }
        }
    }

    fn run_blocking(job: &Job) -> (i64, i32) {
        let rc = match job.op {
            IoOp::Read => unsafe { libc::pread(job.fd, job.buf as *mut libc::c_void, job.len, job.offset) },
            IoOp::Write => unsafe { libc::pwrite(job.fd, job.buf as *const libc::c_void, job.len, job.offset) },
            IoOp::None | IoOp::Connect | IoOp::Accept => 0,
        };
        if rc < 0 {
            (-1, io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
        } else {
            (rc as i64, 0)
        }
    }
}

/// A worker's disk ring: submit an op from the task's `IoRecord`, and
/// later drain whatever completed. One instance per worker.
pub struct DiskRing {
    inner: backend::Inner,
}

impl DiskRing {
    pub fn create(depth: usize) -> Result<DiskRing, RuntimeError> {
        Ok(DiskRing { inner: backend::Inner::create(depth)? })
    }

    pub fn submit(&self, task: &Task) -> std::io::Result<()> {
        self.inner.submit(task)
    }

    pub fn wait_completions(&self) -> Vec<DiskCompletion> {
        self.inner.wait_completions()
    }

    /// Drain completions forever, applying each to its task's
    /// `IoRecord` and handing the task back to `scheduler`. Meant to run
    /// on a dedicated `picasso-diskio-{id}` completion thread.
    pub fn run_completion_loop(self: Arc<Self>, scheduler: Arc<Scheduler>, owning_worker: usize) {
        loop {
            let completions = self.wait_completions();
            if completions.is_empty() {
                continue;
            }
            for c in completions {
                let task_ptr = c.task_ptr as *mut Task;
                let task_id = unsafe { (*task_ptr).id };
                if let Some(mut task) = wait_for_task_parked(&scheduler, owning_worker, task_id) {
                    use std::sync::atomic::Ordering;
                    if c.result < 0 {
                        task.io.io_err.store(c.errno as i64, Ordering::SeqCst);
                        task.io.done_n.store(-1, Ordering::SeqCst);
                    } else {
                        task.io.done_n.store(c.result, Ordering::SeqCst);
                    }
                    task.io.io_done.store(true, Ordering::SeqCst);
                    scheduler.wake(task);
                }
            }
        }
    }
}

unsafe impl Send for DiskRing {}
unsafe impl Sync for DiskRing {}

/// A completion can in principle arrive before the worker loop has
/// finished parking the task that issued it (the op is submitted while
/// the task is still running, and only parked once it yields back to
/// the scheduler). The window is a handful of instructions; spin
/// briefly rather than dropping the completion.
fn wait_for_task_parked(scheduler: &Scheduler, owning_worker: usize, task_id: crate::task::TaskId) -> Option<Box<Task>> {
    for attempt in 0..10_000 {
        if let Some(task) = scheduler.workers[owning_worker].wait.remove(task_id) {
            return Some(task);
        }
        if attempt > 100 {
            std::thread::yield_now();
        }
    }
    log::warn!("picasso-rt: disk completion for {task_id} never observed on wait queue");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_ring_succeeds() {
        let ring = DiskRing::create(32);
        assert!(ring.is_ok());
    }
}
