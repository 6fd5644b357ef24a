//! Network I/O: a single shared readiness poller driving one-shot
//! epoll (Linux) or kqueue (macOS) registrations, plus the per-op state
//! machine that turns a readiness event into a task resume.
//!
//! Grounded on `original_source/runtime/headers/netio.h`,
//! `platform/netpoll.h`, and the Linux/Darwin backends under
//! `platform/{linux,darwin}`.

pub mod listen_opts;
pub mod ops;
pub mod poller;

pub use listen_opts::ListenOptions;
pub use ops::NetIo;
pub use poller::{NetBackend, Poller};
