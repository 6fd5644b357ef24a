//! Thread-safe queues used by the scheduler and I/O subsystems: a FIFO
//! ready queue and an intrusive-style wait queue, plus task-aware
//! mutex/rwmutex primitives exposed through the ABI.

pub mod mutex;
pub mod ready_queue;
pub mod wait_queue;

pub use mutex::{ReadGuard, TaskRwMutex, TaskRwMutexKind, WriteGuard};
pub use ready_queue::ReadyQueue;
pub use wait_queue::WaitQueue;
