// Process State - what the OS reported once a child was reaped

use std::fmt;
use std::time::Duration;

/// CPU time consumed by a reaped child
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
}

/// How the process terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited normally with this status code
    Exited(i32),
    /// Terminated by this signal number
    Signaled(i32),
}

/// Snapshot of a finished process
///
/// Only ever produced after the process has been waited on, so holding one
/// means the child is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessState {
    pid: u32,
    termination: Termination,
    usage: ResourceUsage,
}

impl ProcessState {
    pub fn new(pid: u32, termination: Termination, usage: ResourceUsage) -> Self {
        Self {
            pid,
            termination,
            usage,
        }
    }

    /// Process that exited with `code`
    pub fn exited(pid: u32, code: i32) -> Self {
        Self::new(pid, Termination::Exited(code), ResourceUsage::default())
    }

    /// Process that was killed by `signal`
    pub fn signaled(pid: u32, signal: i32) -> Self {
        Self::new(pid, Termination::Signaled(signal), ResourceUsage::default())
    }

    /// Build from the platform exit status
    pub fn from_exit_status(
        pid: u32,
        status: std::process::ExitStatus,
        usage: ResourceUsage,
    ) -> Self {
        let termination = match status.code() {
            Some(code) => Termination::Exited(code),
            None => Termination::Signaled(signal_of(&status).unwrap_or(-1)),
        };
        Self::new(pid, termination, usage)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Exit code, or -1 if the process was terminated by a signal
    pub fn exit_code(&self) -> i32 {
        match self.termination {
            Termination::Exited(code) => code,
            Termination::Signaled(_) => -1,
        }
    }

    /// True if the process exited on its own rather than by a signal
    pub fn exited_normally(&self) -> bool {
        matches!(self.termination, Termination::Exited(_))
    }

    /// Terminating signal, if any
    pub fn signal(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(_) => None,
            Termination::Signaled(sig) => Some(sig),
        }
    }

    /// True iff the process exited normally with status 0
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }

    pub fn usage(&self) -> ResourceUsage {
        self.usage
    }

    pub fn user_time(&self) -> Duration {
        self.usage.user_time
    }

    pub fn system_time(&self) -> Duration {
        self.usage.system_time
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.termination {
            Termination::Exited(code) => write!(f, "exit status {}", code),
            Termination::Signaled(sig) => write!(f, "signal: {}", sig),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exited_state() {
        let state = ProcessState::exited(42, 3);

        assert_eq!(state.pid(), 42);
        assert_eq!(state.exit_code(), 3);
        assert!(state.exited_normally());
        assert!(!state.success());
        assert_eq!(state.signal(), None);
        assert_eq!(state.to_string(), "exit status 3");
    }

    #[test]
    fn test_signaled_state_reports_minus_one() {
        let state = ProcessState::signaled(7, 9);

        assert_eq!(state.exit_code(), -1);
        assert!(!state.exited_normally());
        assert!(!state.success());
        assert_eq!(state.signal(), Some(9));
        assert_eq!(state.to_string(), "signal: 9");
    }

    #[test]
    fn test_success_only_for_zero() {
        assert!(ProcessState::exited(1, 0).success());
        assert!(!ProcessState::exited(1, 255).success());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let usage = ResourceUsage {
            user_time: Duration::from_millis(12),
            system_time: Duration::from_millis(3),
        };

        // Raw wait status: exit code lives in the second byte
        let exited = ProcessState::from_exit_status(
            10,
            std::process::ExitStatus::from_raw(2 << 8),
            usage,
        );
        assert_eq!(exited.exit_code(), 2);
        assert_eq!(exited.user_time(), Duration::from_millis(12));
        assert_eq!(exited.system_time(), Duration::from_millis(3));

        let killed = ProcessState::from_exit_status(
            11,
            std::process::ExitStatus::from_raw(15),
            ResourceUsage::default(),
        );
        assert_eq!(killed.signal(), Some(15));
        assert_eq!(killed.exit_code(), -1);
    }
}
