//! The stop-the-world handshake state, grounded on `gc_state_t` and
//! `gc_init`/`gc_stop_the_world`/`gc_resume_world`/`self_yield` in
//! `original_source/gc/src/gc.c` and `runtime/src/scheduler.c`.
//!
//! Every worker thread enrolls as a mutator before resuming a task and
//! retires after. When the collector wants to stop the world it takes
//! `add_lock` (blocking any new enrollment) and waits for
//! `stopped_count` to catch up to `total_threads`; parked mutators wait
//! on `cv_world_resumed` until the collector resumes them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

pub struct GcState {
    world_stopped: AtomicBool,
    stopped_count: AtomicUsize,
    total_threads: AtomicUsize,
    lock: Mutex<()>,
    cv_mutators_stopped: Condvar,
    cv_world_resumed: Condvar,
    add_lock: Mutex<()>,
}

impl GcState {
    pub fn new(_worker_count_hint: usize) -> std::sync::Arc<Self> {
        std::sync::Arc::new(GcState {
            world_stopped: AtomicBool::new(false),
            stopped_count: AtomicUsize::new(0),
            total_threads: AtomicUsize::new(0),
            lock: Mutex::new(()),
            cv_mutators_stopped: Condvar::new(),
            cv_world_resumed: Condvar::new(),
            add_lock: Mutex::new(()),
        })
    }

    pub fn world_stopped(&self) -> bool {
        self.world_stopped.load(Ordering::Acquire)
    }

    /// Register this worker thread as an active mutator before it
    /// resumes a task. Blocks if the collector currently holds
    /// `add_lock` (i.e. is mid stop-the-world).
    pub fn enroll_mutator(&self) {
        let _g = self.add_lock.lock();
        self.total_threads.fetch_add(1, Ordering::SeqCst);
    }

    pub fn retire_mutator(&self) {
        self.total_threads.fetch_sub(1, Ordering::SeqCst);
    }

    /// Called from a worker's `self_yield` safe point when it observes
    /// `world_stopped`: reports itself stopped and blocks until resumed.
    pub fn park_mutator(&self) {
        let mut g = self.lock.lock();
        if self.stopped_count.fetch_add(1, Ordering::SeqCst) + 1 == self.total_threads.load(Ordering::SeqCst) {
            self.cv_mutators_stopped.notify_one();
        }
        while self.world_stopped.load(Ordering::Acquire) {
            self.cv_world_resumed.wait(&mut g);
        }
    }

    /// Begin a collection cycle: raise `world_stopped`, wait for every
    /// enrolled mutator to park, then take `add_lock` to keep new
    /// mutators from enrolling mid-collection. The returned guard must
    /// be handed back to `resume_world`.
    pub fn stop_the_world(&self) -> MutexGuard<'_, ()> {
        {
            let mut g = self.lock.lock();
            self.world_stopped.store(true, Ordering::SeqCst);
            while self.stopped_count.load(Ordering::SeqCst) < self.total_threads.load(Ordering::SeqCst) {
                self.cv_mutators_stopped.wait(&mut g);
            }
        }
        self.add_lock.lock()
    }

    pub fn resume_world(&self, add_guard: MutexGuard<'_, ()>) {
        let _g = self.lock.lock();
        self.world_stopped.store(false, Ordering::SeqCst);
        self.stopped_count.store(0, Ordering::SeqCst);
        self.cv_world_resumed.notify_all();
        drop(add_guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_stop_the_world_waits_for_all_mutators() {
        let gc = GcState::new(2);
        gc.enroll_mutator();
        gc.enroll_mutator();

        let gc2 = Arc::clone(&gc);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            gc2.park_mutator();
        });

        // The other mutator never parks; stop_the_world would hang
        // forever waiting for it, so park it too before stopping.
        let gc3 = Arc::clone(&gc);
        let handle2 = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            gc3.park_mutator();
        });

        let guard = gc.stop_the_world();
        assert!(gc.world_stopped());
        gc.resume_world(guard);
        assert!(!gc.world_stopped());

        handle.join().unwrap();
        handle2.join().unwrap();
    }
}
