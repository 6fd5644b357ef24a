//! The collector thread: wakes every `GC_TIMEPERIOD` (default 10s),
//! runs stop/mark/sweep/resume, sleeps. Grounded on `gc_run`/`gc_collect`
//! in `original_source/gc/src/gc.c`.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::mark;
use super::roots::Roots;
use super::state::GcState;
use super::sweep;

pub struct Collector;

impl Collector {
    /// Spawn the background collector thread. The returned handle is
    /// never joined in normal operation — the process exits once the
    /// scheduler drains, taking the collector thread with it.
    pub fn spawn(gc: Arc<GcState>, roots: Arc<Roots>, period: Duration) -> JoinHandle<()> {
        std::thread::Builder::new()
            .name("picasso-gc".into())
            .spawn(move || loop {
                std::thread::sleep(period);
                Collector::collect_once(&gc, &roots);
            })
            .expect("failed to spawn GC thread")
    }

    /// Run exactly one stop-the-world mark/sweep cycle. Exposed
    /// separately from `spawn` so tests can trigger a deterministic
    /// collection without waiting out the sleep period.
    pub fn collect_once(gc: &GcState, roots: &Roots) {
        let add_guard = gc.stop_the_world();
        mark::mark_all(roots);
        sweep::sweep_all(roots);
        gc.resume_world(add_guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Arena;

    #[test]
    fn test_collect_once_frees_unreachable_allocation() {
        let gc = GcState::new(0);
        let roots = Arc::new(Roots::new());
        let arena = Arc::new(Arena::create());
        roots.register_arena(Arc::clone(&arena));

        let p = arena.allocate(48);
        assert!(!p.is_null());

        Collector::collect_once(&gc, &roots);

        let p2 = arena.allocate(48);
        assert_eq!(p, p2, "unreachable allocation should have been collected");
    }
}
