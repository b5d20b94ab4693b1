// Execution constants (no magic values)
use std::time::Duration;

/// Grace period between cancellation and forced kill (5s)
/// Same budget the graceful shutdown path has always used
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_millis(5000);

/// In-memory pipe capacity for Stdin/Stdout/Stderr pipes (64 KiB)
pub const PIPE_BUFFER_SIZE: usize = 64 * 1024;

/// Bytes of stderr kept at each end when `output` captures it for an error (32 KiB)
pub const STDERR_CAPTURE_LIMIT: usize = 32 * 1024;

/// Environment variable holding the search path
pub const PATH_ENV: &str = "PATH";
