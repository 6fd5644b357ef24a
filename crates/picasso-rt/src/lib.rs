//! Core runtime for a general-purpose compiled language: a size-classed
//! arena allocator, a conservative stop-the-world mark-and-sweep
//! collector, an M:N scheduler multiplexing cooperative tasks over a
//! fixed worker pool, and batched disk/net I/O built on top of it.
//!
//! Compiled code never depends on this crate's Rust types directly — it
//! calls the `#[no_mangle] extern "C"` entry points in [`abi`], built
//! against the layouts documented there. Everything else (`alloc`, `gc`,
//! `scheduler`, `task`, `sync`, `io_disk`, `io_net`) is the ordinary Rust
//! implementation behind that boundary.
//!
//! A hosting process brings the runtime up once via [`runtime::init`],
//! spawns its `start` task through [`abi::spawn::picasso_spawn`] (or
//! directly via [`scheduler::Scheduler::spawn`]), and blocks in
//! [`runtime::run_to_completion`] until every task has finished.

pub mod abi;
pub mod alloc;
pub mod config;
pub mod error;
pub mod gc;
pub mod io_disk;
pub mod io_net;
pub mod runtime;
pub mod scheduler;
pub mod signal;
pub mod sync;
pub mod task;

pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use runtime::Runtime;
