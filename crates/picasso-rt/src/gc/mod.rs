//! Stop-the-world, conservative mark-and-sweep garbage collector layered
//! on top of the arena allocator. Roots are the stacks and register
//! spills of all live tasks, reached transitively through
//! [`roots::Roots`].

pub mod collector;
pub mod mark;
pub mod roots;
pub mod state;
pub mod sweep;

pub use collector::Collector;
pub use roots::Roots;
pub use state::GcState;
