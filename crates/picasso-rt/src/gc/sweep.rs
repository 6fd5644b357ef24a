//! Sweep phase: release every unmarked in-use chunk across every
//! registered arena, clearing marks on survivors. Grounded on
//! `gc_sweep` in `original_source/gc/src/gc.c`; the actual walk lives on
//! `Arena::sweep` (alloc/arena.rs) since it needs the arena's internal
//! lock discipline — this module just drives it over every root arena.

use super::roots::Roots;

pub fn sweep_all(roots: &Roots) {
    roots.with_arenas(|arenas| {
        for arena in arenas {
            arena.sweep();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::Arena;
    use std::sync::Arc;

    #[test]
    fn test_sweep_frees_unmarked_chunks() {
        let roots = Roots::new();
        let arena = Arc::new(Arena::create());
        let p = arena.allocate(64);
        assert!(!p.is_null());
        roots.register_arena(Arc::clone(&arena));

        // Nothing marked `p`, so it should be swept.
        sweep_all(&roots);

        let p2 = arena.allocate(64);
        assert_eq!(p, p2, "swept chunk should be reusable at the same address");
    }

    #[test]
    fn test_sweep_preserves_marked_chunks() {
        let roots = Roots::new();
        let arena = Arc::new(Arena::create());
        let p = arena.allocate(64);
        roots.register_arena(Arc::clone(&arena));

        let chunk = arena.find_chunk_containing(p);
        unsafe { arena.mark_chunk(chunk) };

        sweep_all(&roots);

        // Mark bit should be cleared after surviving a sweep, and the
        // chunk should still be reachable as the same live allocation.
        unsafe { assert!(!arena.is_chunk_marked(chunk)) };
        let p2 = arena.allocate(32);
        assert_ne!(p, p2, "marked chunk must not have been reused");
        unsafe {
            arena.release(p);
            arena.release(p2);
        }
    }
}
