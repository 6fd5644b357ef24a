//! Task-aware mutex/rwmutex primitives exposed through the ABI.
//!
//! "Task-aware" means a task that cannot immediately acquire the lock
//! cooperatively yields back to its worker's scheduler loop instead of
//! blocking the OS thread outright, so other tasks on the same worker
//! keep making progress. Exclusion itself is provided by
//! `parking_lot::RwLock`; the yield loop around it is what makes it
//! task-aware rather than thread-aware.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::task::context;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRwMutexKind {
    Mutex,
    RwMutex,
}

/// A mutex or rwmutex, created and manipulated by the ABI's sync
/// primitive entry points. A plain mutex is modelled as a rwmutex used
/// exclusively in writer mode.
pub struct TaskRwMutex {
    lock: RwLock<()>,
    kind: TaskRwMutexKind,
    /// Diagnostics for property tests (P6): counts of readers/writers
    /// currently inside their critical section.
    readers_active: AtomicU64,
    writers_active: AtomicI64,
}

pub struct ReadGuard<'a> {
    _inner: parking_lot::RwLockReadGuard<'a, ()>,
    owner: &'a TaskRwMutex,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.owner.readers_active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct WriteGuard<'a> {
    _inner: parking_lot::RwLockWriteGuard<'a, ()>,
    owner: &'a TaskRwMutex,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.owner.writers_active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskRwMutex {
    pub fn new(kind: TaskRwMutexKind) -> Self {
        TaskRwMutex {
            lock: RwLock::new(()),
            kind,
            readers_active: AtomicU64::new(0),
            writers_active: AtomicI64::new(0),
        }
    }

    pub fn kind(&self) -> TaskRwMutexKind {
        self.kind
    }

    /// Acquire for reading. Spins, cooperatively yielding the current
    /// task between attempts, until the lock is free of writers.
    ///
    /// Outside of a task context (no yielder installed), falls back to
    /// `RwLock::read`, which blocks the OS thread — correct for calls
    /// made from the main thread before any task is running.
    pub fn lock_read(&self) -> ReadGuard<'_> {
        loop {
            if let Some(g) = self.lock.try_read() {
                self.readers_active.fetch_add(1, Ordering::SeqCst);
                return ReadGuard { _inner: g, owner: self };
            }
            if context::entry_anchor().is_null() {
                let g = self.lock.read();
                self.readers_active.fetch_add(1, Ordering::SeqCst);
                return ReadGuard { _inner: g, owner: self };
            }
            context::yield_now();
        }
    }

    pub fn lock_write(&self) -> WriteGuard<'_> {
        loop {
            if let Some(g) = self.lock.try_write() {
                self.writers_active.fetch_add(1, Ordering::SeqCst);
                return WriteGuard { _inner: g, owner: self };
            }
            if context::entry_anchor().is_null() {
                let g = self.lock.write();
                self.writers_active.fetch_add(1, Ordering::SeqCst);
                return WriteGuard { _inner: g, owner: self };
            }
            context::yield_now();
        }
    }

    pub fn readers_active(&self) -> u64 {
        self.readers_active.load(Ordering::SeqCst)
    }

    pub fn writers_active(&self) -> i64 {
        self.writers_active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mutex_excludes_writers() {
        let m = Arc::new(TaskRwMutex::new(TaskRwMutexKind::Mutex));
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&m);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let _g = m.lock_write();
                    let prev = counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(m.writers_active(), 1, "two writers overlapped");
                    let _ = prev;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8000);
    }

    #[test]
    fn test_rwmutex_readers_coexist_writers_exclude() {
        let m = Arc::new(TaskRwMutex::new(TaskRwMutexKind::RwMutex));
        let mut handles = Vec::new();
        for i in 0..10 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    if i % 2 == 0 {
                        let g = m.lock_read();
                        assert_eq!(m.writers_active(), 0);
                        drop(g);
                    } else {
                        let g = m.lock_write();
                        assert_eq!(m.readers_active(), 0);
                        assert_eq!(m.writers_active(), 1);
                        drop(g);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
