//! Conservative mark phase, grounded on `gc_mark`/`try_mark_pointer`/
//! `mark_chunk_recursive` in `original_source/gc/src/gc.c`.
//!
//! Every non-finished task reachable from a worker's ready queue, wait
//! queue, or current-task slot is scanned — not just the running task,
//! since a parked task's stack can still hold the only live reference
//! to an object. Each word-aligned value in a task's stack range is
//! tested as a candidate heap pointer; a hit marks the owning chunk and
//! recurses into its payload so transitively reachable objects survive
//! too.
//!
//! This recurses unconditionally into newly-marked chunks — the
//! original C sets the mark bit and then calls into a helper that
//! immediately bails out because the bit is already set, so it never
//! actually scans a marked chunk's payload. Testable property 8 ("any
//! object reachable by pointer from some live task's stack... survives")
//! requires transitive reachability, so this implementation checks the
//! mark bit *before* setting it (to break cycles) rather than after.

use std::sync::Arc;

use crate::alloc::chunk::ChunkHeader;
use crate::alloc::Arena;

use super::roots::Roots;

pub fn mark_all(roots: &Roots) {
    roots.with_arenas(|arenas| {
        roots.with_workers(|workers| {
            for worker in workers {
                worker.ready.with_queued(|queued| {
                    for slot in queued.iter() {
                        if let Some(task) = slot.as_task() {
                            mark_task(task, arenas);
                        }
                    }
                });
                worker.wait.with_parked(|parked| {
                    for task in parked {
                        mark_task(task, arenas);
                    }
                });
                if let Some((lo, hi)) = worker.current_stack() {
                    mark_region(lo, hi, arenas);
                }
            }
        });
    });
}

fn mark_task(task: &crate::task::Task, arenas: &[Arc<Arena>]) {
    if task.is_finished() {
        return;
    }
    let (lo, hi) = task.ctx.stack_bounds();
    mark_region(lo, hi, arenas);
}

/// Scan `[lo, hi)` word-by-word, treating every non-zero, word-aligned
/// value as a candidate pointer. Matches `gc_mark_mem_region`'s
/// unaligned-safe read via `memcpy` (here, `read_unaligned`).
fn mark_region(lo: usize, hi: usize, arenas: &[Arc<Arena>]) {
    let word = std::mem::size_of::<usize>();
    let mut p = lo;
    while p.checked_add(word).map(|end| end <= hi).unwrap_or(false) {
        let val = unsafe { std::ptr::read_unaligned(p as *const usize) };
        if val != 0 {
            try_mark_pointer(val, arenas);
        }
        p += word;
    }
}

/// `GC_ALIGN_MASK` equivalent: only pointer-width-aligned values are
/// considered (the original applies the same filter before searching
/// any heap region).
fn is_candidate_aligned(val: usize) -> bool {
    val % std::mem::align_of::<usize>() == 0
}

fn try_mark_pointer(val: usize, arenas: &[Arc<Arena>]) {
    if !is_candidate_aligned(val) {
        return;
    }
    let p = val as *mut u8;
    for arena in arenas {
        let in_range = arena.with_heap_regions(|regions| {
            regions.iter().any(|r| (p as usize) >= r.start as usize && (p as usize) < r.end as usize)
        });
        if !in_range {
            continue;
        }
        let chunk = arena.find_chunk_containing(p);
        if chunk.is_null() {
            return;
        }
        unsafe {
            if arena.is_chunk_marked(chunk) {
                return; // already marked: cycle, stop recursing
            }
            arena.mark_chunk(chunk);
            let data = ChunkHeader::data_ptr(chunk);
            let payload_size = (*chunk).size();
            mark_region(data as usize, data as usize + payload_size, arenas);
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::roots::Roots;

    #[test]
    fn test_mark_region_marks_pointed_to_chunk() {
        let arena = Arc::new(Arena::create());
        let payload = arena.allocate(64);
        assert!(!payload.is_null());

        // A fake "stack" word holding the only reference to `payload`.
        let stack_word: usize = payload as usize;
        let stack = [stack_word, 0usize, 0usize];
        let lo = stack.as_ptr() as usize;
        let hi = lo + stack.len() * std::mem::size_of::<usize>();

        let arenas = vec![Arc::clone(&arena)];
        mark_region(lo, hi, &arenas);

        let chunk = arena.find_chunk_containing(payload);
        assert!(!chunk.is_null());
        unsafe {
            assert!(arena.is_chunk_marked(chunk));
            arena.clear_chunk_mark(chunk);
        }
        unsafe { arena.release(payload) };
    }

    #[test]
    fn test_mark_region_ignores_unrelated_values() {
        let arena = Arc::new(Arena::create());
        let stack = [0xdead_beefusize, 1usize, 0usize];
        let lo = stack.as_ptr() as usize;
        let hi = lo + stack.len() * std::mem::size_of::<usize>();
        let arenas = vec![Arc::clone(&arena)];
        // Must not panic or mark anything bogus.
        mark_region(lo, hi, &arenas);
    }

    #[test]
    fn test_roots_mark_all_runs_without_panicking() {
        let roots = Roots::new();
        roots.register_arena(Arc::new(Arena::create()));
        mark_all(&roots);
    }
}
