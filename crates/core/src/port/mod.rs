// Port Layer - Interfaces for process execution

pub mod cmd;
pub mod executor;

// Re-exports
pub use cmd::Cmd;
pub use executor::mocks::{Expectation, FakeExecutor, RecordedCall, ScriptError};
pub use executor::Executor;
