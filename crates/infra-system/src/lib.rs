// execport Infrastructure - OS process adapters
// Implements: Executor, Cmd on top of tokio::process

pub mod path_lookup;
mod platform;
pub mod subprocess_cmd;
pub mod subprocess_executor;
mod wait;

pub use path_lookup::{look_path, look_path_in};
pub use subprocess_cmd::SubprocessCmd;
pub use subprocess_executor::SubprocessExecutor;
