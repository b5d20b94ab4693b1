// Central Error Type for process execution

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{ExitError, UsageError};

/// Every failure a command handle or executor can report
///
/// Cloneable so a handle can keep a terminal error and still hand it back
/// from `start`; I/O sources are shared behind `Arc`.
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    #[error("executable file not found in search path: {name}")]
    NotFound { name: String },

    #[error("failed to launch {path}: {source}")]
    Launch {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("invalid command state: {0}")]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Exit(#[from] ExitError),

    #[error("IO error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    #[error("command canceled before start")]
    Canceled,

    #[error("I/O not closed within wait delay of {0:?} after process exit")]
    WaitDelayExpired(Duration),
}

impl ExecError {
    pub fn launch(path: impl Into<String>, source: std::io::Error) -> Self {
        ExecError::Launch {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        ExecError::NotFound { name: name.into() }
    }

    /// The exit error, if the process ran and failed
    pub fn exit_error(&self) -> Option<&ExitError> {
        match self {
            ExecError::Exit(e) => Some(e),
            _ => None,
        }
    }

    /// True for both "canceled before start" and "stopped by cancellation"
    pub fn is_canceled(&self) -> bool {
        match self {
            ExecError::Canceled => true,
            ExecError::Exit(e) => e.canceled(),
            _ => false,
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(Arc::new(err))
    }
}

/// Result type alias using ExecError
pub type Result<T> = std::result::Result<T, ExecError>;
