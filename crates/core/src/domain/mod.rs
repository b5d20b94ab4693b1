// Domain Layer - process values, command configuration and lifecycle

pub mod capture;
pub mod command;
pub mod environ;
pub mod error;
pub mod exit_error;
pub mod process_state;

// Re-exports
pub use capture::CaptureBuffer;
pub use command::{
    BoxedReader, BoxedWriter, CancelFn, CmdState, CommandSpec, InputSource, OutputSink,
    PipeReader, PipeWriter, StreamKind, Streams, SysProcAttr,
};
pub use error::UsageError;
pub use exit_error::ExitError;
pub use process_state::{ProcessState, ResourceUsage, Termination};
