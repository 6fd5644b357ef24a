//! Disk I/O: one batched submission/completion ring per worker. Linux
//! drives the ring with `io_uring`; macOS has no equivalent, so a pool
//! of blocking threads stands in behind the same interface.

pub mod ops;
pub mod ring;

pub use ring::DiskRing;
