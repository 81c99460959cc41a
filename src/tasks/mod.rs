//! Task source loading and sequencing.

pub mod parser;
pub mod queue;

pub use parser::{ClockColumns, TaskDefaults, TaskSheet};
pub use queue::TaskQueue;
