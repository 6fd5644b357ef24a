//! Size-classed free-list heap allocator modelled on glibc's ptmalloc
//! (fastbins, smallbins, largebins, unsortedbin, top chunk, mmap overflow).
//!
//! See [`arena::Arena`] for the public contract and [`chunk`] for the
//! on-disk chunk layout and size-class index math.

pub mod arena;
pub mod chunk;

pub use arena::{page_size, Arena, HeapRegion};
pub use chunk::ChunkHeader;
