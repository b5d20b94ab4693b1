// execport Core - Process execution ports, domain types & test doubles
// NO OS process spawning here; adapters live in infra crates

pub mod application;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod port;

pub use config::ExecutorConfig;
pub use error::{ExecError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
