// Subprocess executor implementation
// reason: builds SubprocessCmd handles; PATH lookup stays here so the core never touches the OS
use tokio_util::sync::CancellationToken;

use execport_core::domain::CommandSpec;
use execport_core::port::executor::argv;
use execport_core::port::{Cmd, Executor};
use execport_core::{ExecutorConfig, Result};

use crate::path_lookup::{look_path, resolve};
use crate::subprocess_cmd::SubprocessCmd;

/// Subprocess executor
/// Spawns real child processes; cheap to clone and share between tasks
#[derive(Debug, Clone, Default)]
pub struct SubprocessExecutor {
    config: ExecutorConfig,
}

impl SubprocessExecutor {
    /// Create a new subprocess executor
    ///
    /// # Arguments
    /// * `config` - Wait-delay for token-bound commands and inherited-env allowlist
    ///
    /// # Example
    /// ```ignore
    /// let executor = SubprocessExecutor::new(
    ///     ExecutorConfig::default().with_env_allowlist(["PATH", "HOME"]),
    /// );
    /// let out = executor.command("echo", &["hi"]).output().await?;
    /// ```
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn build(&self, token: Option<CancellationToken>, name: &str, args: &[&str]) -> SubprocessCmd {
        let (path, err) = resolve(name);
        let mut spec = CommandSpec::new(path, argv(name, args))
            .with_err(err)
            .with_inherit_env_allowlist(self.config.inherit_env_allowlist.clone());
        if let Some(token) = token {
            spec = spec.with_token(token, self.config.wait_delay());
        }
        SubprocessCmd::new(spec)
    }
}

impl Executor for SubprocessExecutor {
    fn command(&self, name: &str, args: &[&str]) -> Box<dyn Cmd> {
        Box::new(self.build(None, name, args))
    }

    fn command_context(&self, token: CancellationToken, name: &str, args: &[&str]) -> Box<dyn Cmd> {
        Box::new(self.build(Some(token), name, args))
    }

    fn look_path(&self, file: &str) -> Result<String> {
        look_path(file)
    }
}
