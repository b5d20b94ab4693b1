// Application Layer - lifecycle algorithms shared by every Cmd implementation

pub mod reaper;
pub mod streams;

pub use reaper::{reap, CancelProgress, ChildProcess, Reaped};
pub use streams::{copy_from_child, copy_into_child, sink_writer, Copiers};
