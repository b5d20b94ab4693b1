// Reaper - waits for a child, honoring cancellation and wait-delay
//
// Cancel path: run the cancel callback (or the child's default terminate),
// give the child `wait_delay` to exit, then force-kill it.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{CancelFn, ProcessState};

/// A started child process, real or simulated
#[async_trait]
pub trait ChildProcess: Send {
    fn pid(&self) -> u32;

    /// Wait for exit and reap. Must be cancel safe.
    async fn wait_exit(&mut self) -> io::Result<ProcessState>;

    /// Default cancel action (a polite termination request)
    fn terminate(&mut self) -> io::Result<()>;

    /// Forced kill once the wait-delay has elapsed
    fn force_kill(&mut self) -> io::Result<()>;
}

/// Final state plus whether cancellation caused it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaped {
    pub state: ProcessState,
    pub canceled: bool,
}

/// Cancel-path progress of one wait, kept by the handle across dropped waits
#[derive(Debug, Default)]
pub struct CancelProgress {
    requested: bool,
}

impl CancelProgress {
    /// True once the cancel action has run
    pub fn requested(&self) -> bool {
        self.requested
    }
}

/// Wait for `child`, running the cancel path at most once if `token` fires
///
/// Cancel safe: a dropped call can be repeated with the same `progress`;
/// the cancel action is not run again and the result still reports
/// `canceled`.
///
/// # Arguments
/// * `progress` - Per-handle cancel progress
/// * `token` - Cancellation token the command was bound to, if any
/// * `cancel` - Custom cancel callback; `None` uses `ChildProcess::terminate`
/// * `wait_delay` - Grace period before force-kill; zero waits indefinitely
pub async fn reap<C: ChildProcess + ?Sized>(
    child: &mut C,
    progress: &mut CancelProgress,
    token: Option<&CancellationToken>,
    cancel: Option<&CancelFn>,
    wait_delay: Duration,
) -> io::Result<Reaped> {
    if !progress.requested {
        let Some(token) = token else {
            let state = child.wait_exit().await?;
            return Ok(Reaped {
                state,
                canceled: false,
            });
        };

        tokio::select! {
            biased;
            state = child.wait_exit() => {
                return Ok(Reaped { state: state?, canceled: false });
            }
            _ = token.cancelled() => {}
        }

        let pid = child.pid();
        info!(pid = %pid, wait_delay = ?wait_delay, "Cancellation requested, stopping process");
        progress.requested = true;

        let requested = match cancel {
            Some(cancel) => cancel(pid),
            None => child.terminate(),
        };
        if let Err(e) = requested {
            debug!(pid = %pid, error = %e, "Cancel action failed, killing process");
            child.force_kill()?;
        }
    }

    let state = if wait_delay.is_zero() {
        child.wait_exit().await?
    } else {
        match timeout(wait_delay, child.wait_exit()).await {
            Ok(state) => state?,
            Err(_) => {
                warn!(pid = %child.pid(), "Process did not exit within wait delay, killing");
                child.force_kill()?;
                child.wait_exit().await?
            }
        }
    };

    Ok(Reaped {
        state,
        canceled: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const SIGTERM: i32 = 15;
    const SIGKILL: i32 = 9;

    /// Simulated child: exits on its own after `runtime`, or on a signal
    struct Sleeper {
        runtime: Duration,
        obeys_terminate: bool,
        signal: Option<i32>,
        stop: CancellationToken,
    }

    impl Sleeper {
        fn new(runtime: Duration, obeys_terminate: bool) -> Self {
            Self {
                runtime,
                obeys_terminate,
                signal: None,
                stop: CancellationToken::new(),
            }
        }
    }

    #[async_trait]
    impl ChildProcess for Sleeper {
        fn pid(&self) -> u32 {
            4242
        }

        async fn wait_exit(&mut self) -> io::Result<ProcessState> {
            tokio::select! {
                _ = tokio::time::sleep(self.runtime) => Ok(ProcessState::exited(4242, 0)),
                _ = self.stop.cancelled() => {
                    Ok(ProcessState::signaled(4242, self.signal.unwrap_or(SIGKILL)))
                }
            }
        }

        fn terminate(&mut self) -> io::Result<()> {
            if self.obeys_terminate {
                self.signal = Some(SIGTERM);
                self.stop.cancel();
            }
            Ok(())
        }

        fn force_kill(&mut self) -> io::Result<()> {
            self.signal = Some(SIGKILL);
            self.stop.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_natural_exit_without_token() {
        let mut child = Sleeper::new(Duration::from_millis(5), true);
        let reaped = reap(&mut child, &mut CancelProgress::default(), None, None, Duration::ZERO).await.unwrap();

        assert!(reaped.state.success());
        assert!(!reaped.canceled);
    }

    #[tokio::test]
    async fn test_cancel_terminates() {
        let mut child = Sleeper::new(Duration::from_secs(60), true);
        let token = CancellationToken::new();
        token.cancel();

        let reaped = reap(&mut child, &mut CancelProgress::default(), Some(&token), None, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(reaped.canceled);
        assert_eq!(reaped.state.signal(), Some(SIGTERM));
    }

    #[tokio::test]
    async fn test_force_kill_after_wait_delay() {
        let mut child = Sleeper::new(Duration::from_secs(60), false);
        let token = CancellationToken::new();
        token.cancel();

        let started = std::time::Instant::now();
        let reaped = reap(&mut child, &mut CancelProgress::default(), Some(&token), None, Duration::from_millis(50))
            .await
            .unwrap();

        assert!(reaped.canceled);
        assert_eq!(reaped.state.signal(), Some(SIGKILL));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_custom_cancel_runs_once() {
        let mut child = Sleeper::new(Duration::from_millis(30), false);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cancel: CancelFn = Arc::new(move |_pid| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let token = CancellationToken::new();
        token.cancel();

        let reaped = reap(&mut child, &mut CancelProgress::default(), Some(&token), Some(&cancel), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reaped.canceled);
        // The callback did nothing, so the child ran to completion
        assert!(reaped.state.success());
    }

    #[tokio::test]
    async fn test_failing_cancel_escalates_to_kill() {
        let mut child = Sleeper::new(Duration::from_secs(60), false);
        let cancel: CancelFn = Arc::new(|_pid| Err(io::Error::other("no permission")));
        let token = CancellationToken::new();
        token.cancel();

        let reaped = reap(&mut child, &mut CancelProgress::default(), Some(&token), Some(&cancel), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(reaped.state.signal(), Some(SIGKILL));
    }

    #[tokio::test]
    async fn test_dropped_reap_resumes_without_second_cancel() {
        let mut child = Sleeper::new(Duration::from_secs(60), false);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cancel: CancelFn = Arc::new(move |_pid| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let token = CancellationToken::new();
        token.cancel();
        let mut progress = CancelProgress::default();

        let first = timeout(
            Duration::from_millis(20),
            reap(&mut child, &mut progress, Some(&token), Some(&cancel), Duration::from_secs(60)),
        )
        .await;
        assert!(first.is_err());
        assert!(progress.requested());

        let reaped = reap(&mut child, &mut progress, Some(&token), Some(&cancel), Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(reaped.canceled);
        assert_eq!(reaped.state.signal(), Some(SIGKILL));
    }
}
