// Command Handle Port
// One external process invocation: configuration, lifecycle, and results

use async_trait::async_trait;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::{
    CancelFn, CaptureBuffer, CmdState, CommandSpec, InputSource, OutputSink, PipeReader,
    PipeWriter, ProcessState, StreamKind, SysProcAttr,
};
use crate::error::{ExecError, Result};

/// Command handle
///
/// Implementations:
/// - SubprocessCmd: spawns a real OS process (execport-infra-system)
/// - FakeCmd: replays a scripted process (`port::executor::mocks`)
///
/// State machine: `Unconfigured → Configured → Started → Exited`. Setters are
/// legal before start only; `start` once; `wait` once, after `start`. Any
/// other order fails with `ExecError::Usage` and never blocks.
///
/// Implementors provide `spec`, `spec_mut`, `start` and `wait`; everything
/// else is composed from those.
#[async_trait]
pub trait Cmd: fmt::Debug + fmt::Display + Send {
    fn spec(&self) -> &CommandSpec;

    fn spec_mut(&mut self) -> &mut CommandSpec;

    /// Launch the process without waiting for it
    ///
    /// # Errors
    /// - ExecError::NotFound if the executable cannot be located
    /// - ExecError::Launch if it cannot be executed
    /// - ExecError::Usage if the handle was already started
    /// - ExecError::Canceled if the bound token is already canceled
    fn start(&mut self) -> Result<()>;

    /// Wait for the started process to exit and reap it
    ///
    /// # Errors
    /// - ExecError::Exit on non-zero exit, signal, or cancellation
    /// - ExecError::Usage if not started or already waited
    /// - ExecError::Io / ExecError::WaitDelayExpired if stream copying failed
    async fn wait(&mut self) -> Result<()>;

    // ========================================================================
    // Getters
    // ========================================================================

    fn path(&self) -> &str {
        self.spec().path()
    }

    fn args(&self) -> &[String] {
        self.spec().args()
    }

    fn env(&self) -> Option<&[String]> {
        self.spec().env()
    }

    fn dir(&self) -> Option<&Path> {
        self.spec().dir()
    }

    fn stdin(&self) -> StreamKind {
        self.spec().stdin_kind()
    }

    fn stdout(&self) -> StreamKind {
        self.spec().stdout_kind()
    }

    fn stderr(&self) -> StreamKind {
        self.spec().stderr_kind()
    }

    fn extra_files(&self) -> usize {
        self.spec().extra_file_count()
    }

    fn sys_proc_attr(&self) -> &SysProcAttr {
        self.spec().sys_proc_attr()
    }

    /// Present only once the process has been waited on
    fn process_state(&self) -> Option<&ProcessState> {
        self.spec().process_state()
    }

    fn err(&self) -> Option<&ExecError> {
        self.spec().err()
    }

    fn cancel(&self) -> Option<&CancelFn> {
        self.spec().cancel()
    }

    fn wait_delay(&self) -> Duration {
        self.spec().wait_delay()
    }

    fn state(&self) -> CmdState {
        self.spec().state()
    }

    /// Environment the process runs (or would run) with
    fn environ(&self) -> Vec<String> {
        self.spec().environ()
    }

    // ========================================================================
    // Setters (fail with ExecError::Usage once started)
    // ========================================================================

    fn set_path(&mut self, path: &str) -> Result<()> {
        self.spec_mut().set_path(path)
    }

    fn set_args(&mut self, args: Vec<String>) -> Result<()> {
        self.spec_mut().set_args(args)
    }

    fn set_env(&mut self, env: Option<Vec<String>>) -> Result<()> {
        self.spec_mut().set_env(env)
    }

    fn set_dir(&mut self, dir: Option<PathBuf>) -> Result<()> {
        self.spec_mut().set_dir(dir)
    }

    fn set_stdin(&mut self, stdin: InputSource) -> Result<()> {
        self.spec_mut().set_stdin(stdin)
    }

    fn set_stdout(&mut self, stdout: OutputSink) -> Result<()> {
        self.spec_mut().set_stdout(stdout)
    }

    fn set_stderr(&mut self, stderr: OutputSink) -> Result<()> {
        self.spec_mut().set_stderr(stderr)
    }

    fn set_extra_files(&mut self, files: Vec<File>) -> Result<()> {
        self.spec_mut().set_extra_files(files)
    }

    fn set_sys_proc_attr(&mut self, attr: SysProcAttr) -> Result<()> {
        self.spec_mut().set_sys_proc_attr(attr)
    }

    fn set_cancel(&mut self, cancel: Option<CancelFn>) -> Result<()> {
        self.spec_mut().set_cancel(cancel)
    }

    fn set_wait_delay(&mut self, wait_delay: Duration) -> Result<()> {
        self.spec_mut().set_wait_delay(wait_delay)
    }

    fn set_err(&mut self, err: Option<ExecError>) -> Result<()> {
        self.spec_mut().set_err(err)
    }

    // ========================================================================
    // Behaviors
    // ========================================================================

    /// Stream connected to the child's stdin; drop it to send EOF
    fn stdin_pipe(&mut self) -> Result<PipeWriter> {
        self.spec_mut().stdin_pipe()
    }

    /// Stream connected to the child's stdout; read it fully before `wait`
    fn stdout_pipe(&mut self) -> Result<PipeReader> {
        self.spec_mut().stdout_pipe()
    }

    /// Stream connected to the child's stderr; read it fully before `wait`
    fn stderr_pipe(&mut self) -> Result<PipeReader> {
        self.spec_mut().stderr_pipe()
    }

    /// Start, then wait
    async fn run(&mut self) -> Result<()> {
        self.start()?;
        self.wait().await
    }

    /// Run and return stdout
    ///
    /// When no stderr sink was configured, stderr is captured and attached to
    /// the `ExitError` on failure.
    async fn output(&mut self) -> Result<Vec<u8>> {
        let stdout = CaptureBuffer::unbounded();
        let stderr = self.spec_mut().capture_output(stdout.clone())?;

        match self.run().await {
            Ok(()) => Ok(stdout.contents()),
            Err(ExecError::Exit(exit)) => Err(ExecError::Exit(match stderr {
                Some(stderr) => exit.with_stderr(stderr.contents()),
                None => exit,
            })),
            Err(e) => Err(e),
        }
    }

    /// Run and return stdout and stderr merged in write order
    async fn combined_output(&mut self) -> Result<Vec<u8>> {
        let combined = CaptureBuffer::unbounded();
        self.spec_mut().capture_combined(combined.clone())?;
        self.run().await?;
        Ok(combined.contents())
    }
}
