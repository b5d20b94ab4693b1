// Exit Error - a process that ran but did not succeed

use std::fmt;
use std::time::Duration;

use super::process_state::ProcessState;

/// Structured failure for a process that started and then exited with a
/// non-zero status or was terminated by a signal.
///
/// Immutable once built; `with_stderr` and `canceled` consume the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitError {
    state: ProcessState,
    stderr: Vec<u8>,
    canceled: bool,
}

impl ExitError {
    pub fn new(state: ProcessState) -> Self {
        Self {
            state,
            stderr: Vec::new(),
            canceled: false,
        }
    }

    /// Attach captured standard error
    pub fn with_stderr(mut self, stderr: Vec<u8>) -> Self {
        self.stderr = stderr;
        self
    }

    /// Mark the exit as the result of a cancellation
    pub fn with_canceled(mut self, canceled: bool) -> Self {
        self.canceled = canceled;
        self
    }

    pub fn process_state(&self) -> &ProcessState {
        &self.state
    }

    /// Captured standard error (empty unless capture was requested)
    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// True if the process was stopped because its cancellation token fired
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }

    pub fn exited(&self) -> bool {
        self.state.exited_normally()
    }

    pub fn pid(&self) -> u32 {
        self.state.pid()
    }

    pub fn success(&self) -> bool {
        self.state.success()
    }

    pub fn signal(&self) -> Option<i32> {
        self.state.signal()
    }

    pub fn user_time(&self) -> Duration {
        self.state.user_time()
    }

    pub fn system_time(&self) -> Duration {
        self.state.system_time()
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.canceled {
            write!(f, "{} (canceled)", self.state)
        } else {
            write!(f, "{}", self.state)
        }
    }
}

impl std::error::Error for ExitError {}
