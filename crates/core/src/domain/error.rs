// Usage Errors - operations attempted in the wrong handle state

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("command already started")]
    AlreadyStarted,

    #[error("command not started")]
    NotStarted,

    #[error("wait already called")]
    AlreadyWaited,

    #[error("stdin already set")]
    StdinAlreadySet,

    #[error("stdout already set")]
    StdoutAlreadySet,

    #[error("stderr already set")]
    StderrAlreadySet,

    #[error("cancel callback set on a command not created with a cancellation token")]
    CancelWithoutContext,
}
