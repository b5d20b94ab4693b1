// Executor configuration
// Passed explicitly to executors; nothing is read from the environment here

use serde::Deserialize;
use std::time::Duration;

use crate::constants::DEFAULT_WAIT_DELAY;

/// Settings shared by every command an executor builds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Wait-delay given to commands bound to a cancellation token (ms)
    pub wait_delay_ms: u64,

    /// When set, an inherited environment is filtered to these keys
    pub inherit_env_allowlist: Option<Vec<String>>,
}

impl ExecutorConfig {
    pub fn wait_delay(&self) -> Duration {
        Duration::from_millis(self.wait_delay_ms)
    }

    pub fn with_wait_delay(mut self, wait_delay: Duration) -> Self {
        self.wait_delay_ms = wait_delay.as_millis() as u64;
        self
    }

    pub fn with_env_allowlist<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inherit_env_allowlist = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            wait_delay_ms: DEFAULT_WAIT_DELAY.as_millis() as u64,
            inherit_env_allowlist: None,
        }
    }
}
