//! Registry the collector consults each cycle: every arena (one
//! global, plus one per worker per the original's `gc_create_arena`
//! pattern of per-thread arenas) and every scheduler worker (whose
//! ready/wait queues and currently-running task hold conservative
//! roots).

use std::sync::Arc;

use parking_lot::Mutex;

use crate::alloc::Arena;
use crate::scheduler::Worker;

#[derive(Default)]
pub struct Roots {
    arenas: Mutex<Vec<Arc<Arena>>>,
    workers: Mutex<Vec<Arc<Worker>>>,
}

impl Roots {
    pub fn new() -> Self {
        Roots::default()
    }

    pub fn register_arena(&self, arena: Arc<Arena>) {
        self.arenas.lock().push(arena);
    }

    pub fn register_worker(&self, worker: Arc<Worker>) {
        self.workers.lock().push(worker);
    }

    pub fn with_arenas<R>(&self, f: impl FnOnce(&[Arc<Arena>]) -> R) -> R {
        f(&self.arenas.lock())
    }

    pub fn with_workers<R>(&self, f: impl FnOnce(&[Arc<Worker>]) -> R) -> R {
        f(&self.workers.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_count_arenas() {
        let roots = Roots::new();
        roots.register_arena(Arc::new(Arena::create()));
        roots.register_arena(Arc::new(Arena::create()));
        roots.with_arenas(|a| assert_eq!(a.len(), 2));
    }
}
