// Executor Port
// Factory for command handles; owns the one environment-dependent lookup

use tokio_util::sync::CancellationToken;

use super::cmd::Cmd;
use crate::error::Result;

pub mod mocks;

/// Executor trait
///
/// Implementations:
/// - SubprocessExecutor: real processes via tokio (execport-infra-system)
/// - FakeExecutor: scripted processes for tests (`mocks`)
///
/// Executors hold no mutable state and are safe to share between tasks.
/// Pass one to whatever needs to spawn processes; there is no global default.
pub trait Executor: Send + Sync {
    /// Build an unstarted command running `name` with `args`
    ///
    /// The argument vector is `[name, args...]`. Names without a path
    /// separator are resolved with `look_path`; a failed lookup is recorded
    /// on the handle and reported by `start`.
    fn command(&self, name: &str, args: &[&str]) -> Box<dyn Cmd>;

    /// Like `command`, but canceling `token` before the process exits stops it
    fn command_context(&self, token: CancellationToken, name: &str, args: &[&str]) -> Box<dyn Cmd>;

    /// Resolve an executable name against the search path
    ///
    /// # Errors
    /// - ExecError::NotFound if no matching executable exists
    fn look_path(&self, file: &str) -> Result<String>;
}

/// Argument vector for `name args...`
pub fn argv(name: &str, args: &[&str]) -> Vec<String> {
    std::iter::once(name)
        .chain(args.iter().copied())
        .map(str::to_string)
        .collect()
}

/// True if `name` should be used as a path rather than searched for
pub fn has_path_separator(name: &str) -> bool {
    name.contains('/') || (cfg!(windows) && name.contains('\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argv_prepends_name() {
        assert_eq!(argv("echo", &["a", "b"]), vec!["echo", "a", "b"]);
        assert_eq!(argv("true", &[]), vec!["true"]);
    }

    #[test]
    fn test_has_path_separator() {
        assert!(has_path_separator("./run.sh"));
        assert!(has_path_separator("/bin/sh"));
        assert!(!has_path_separator("sh"));
    }
}
