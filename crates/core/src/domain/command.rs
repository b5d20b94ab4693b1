// Command Spec - configuration and lifecycle of one process invocation
//
// Both the subprocess adapter and the scripted fake hold one of these, so
// state-machine rules and setter guards live in exactly one place.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio_util::sync::CancellationToken;

use super::capture::CaptureBuffer;
use super::environ::{effective_environ, render_command};
use super::error::UsageError;
use super::process_state::ProcessState;
use crate::constants::{PIPE_BUFFER_SIZE, STDERR_CAPTURE_LIMIT};
use crate::error::{ExecError, Result};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Caller's end of a `stdin_pipe`
pub type PipeWriter = DuplexStream;
/// Caller's end of a `stdout_pipe` / `stderr_pipe`
pub type PipeReader = DuplexStream;

/// Invoked with the child's pid when the bound token is canceled
pub type CancelFn = Arc<dyn Fn(u32) -> io::Result<()> + Send + Sync>;

/// Summary of how a standard stream is wired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Null,
    Inherit,
    File,
    Reader,
    Writer,
    Pipe,
    Capture,
}

/// Where the child's standard input comes from (default: null device)
#[derive(Default)]
pub enum InputSource {
    #[default]
    Null,
    Inherit,
    File(File),
    Reader(BoxedReader),
    Pipe(DuplexStream),
}

impl InputSource {
    /// Feed a fixed byte string
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        InputSource::Reader(Box::new(io::Cursor::new(data.into())))
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            InputSource::Null => StreamKind::Null,
            InputSource::Inherit => StreamKind::Inherit,
            InputSource::File(_) => StreamKind::File,
            InputSource::Reader(_) => StreamKind::Reader,
            InputSource::Pipe(_) => StreamKind::Pipe,
        }
    }
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InputSource::{:?}", self.kind())
    }
}

/// Where the child's standard output or error goes (default: null device)
#[derive(Default)]
pub enum OutputSink {
    #[default]
    Null,
    Inherit,
    File(File),
    Writer(BoxedWriter),
    Pipe(DuplexStream),
    Capture(CaptureBuffer),
}

impl OutputSink {
    pub fn kind(&self) -> StreamKind {
        match self {
            OutputSink::Null => StreamKind::Null,
            OutputSink::Inherit => StreamKind::Inherit,
            OutputSink::File(_) => StreamKind::File,
            OutputSink::Writer(_) => StreamKind::Writer,
            OutputSink::Pipe(_) => StreamKind::Pipe,
            OutputSink::Capture(_) => StreamKind::Capture,
        }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputSink::{:?}", self.kind())
    }
}

/// Platform process attributes, honored on Unix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SysProcAttr {
    /// Start the child in a new session
    pub setsid: bool,
    /// Put the child in this process group (0 = its own new group)
    pub process_group: Option<i32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl SysProcAttr {
    pub fn is_default(&self) -> bool {
        *self == SysProcAttr::default()
    }
}

/// Handle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdState {
    Unconfigured,
    Configured,
    Started,
    Exited,
    /// Start failed; the handle is inert
    Failed,
}

/// Streams handed to the running process at start
#[derive(Debug)]
pub struct Streams {
    pub stdin: InputSource,
    pub stdout: OutputSink,
    pub stderr: OutputSink,
    pub extra_files: Vec<File>,
}

pub struct CommandSpec {
    path: String,
    args: Vec<String>,
    env: Option<Vec<String>>,
    dir: Option<PathBuf>,
    stdin: InputSource,
    stdout: OutputSink,
    stderr: OutputSink,
    extra_files: Vec<File>,
    extra_file_count: usize,
    sys_proc_attr: SysProcAttr,
    cancel: Option<CancelFn>,
    wait_delay: Duration,
    err: Option<ExecError>,
    token: Option<CancellationToken>,
    inherit_env_allowlist: Option<Vec<String>>,
    attached: Option<[StreamKind; 3]>,
    state: CmdState,
    process_state: Option<ProcessState>,
}

impl CommandSpec {
    /// Unstarted command running `path` with the full argument vector `args`
    pub fn new(path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            path: path.into(),
            args,
            env: None,
            dir: None,
            stdin: InputSource::Null,
            stdout: OutputSink::Null,
            stderr: OutputSink::Null,
            extra_files: Vec::new(),
            extra_file_count: 0,
            sys_proc_attr: SysProcAttr::default(),
            cancel: None,
            wait_delay: Duration::ZERO,
            err: None,
            token: None,
            inherit_env_allowlist: None,
            attached: None,
            state: CmdState::Unconfigured,
            process_state: None,
        }
    }

    /// Bind to a cancellation token with the given wait-delay
    pub fn with_token(mut self, token: CancellationToken, wait_delay: Duration) -> Self {
        self.token = Some(token);
        self.wait_delay = wait_delay;
        self
    }

    /// Record a failure that `start` must report (e.g. path resolution)
    pub fn with_err(mut self, err: Option<ExecError>) -> Self {
        self.err = err;
        self
    }

    pub fn with_inherit_env_allowlist(mut self, allowlist: Option<Vec<String>>) -> Self {
        self.inherit_env_allowlist = allowlist;
        self
    }

    pub fn with_env(mut self, env: Option<Vec<String>>) -> Self {
        self.env = env;
        self
    }

    pub fn with_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dir = dir;
        self
    }

    // --- getters ---

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> Option<&[String]> {
        self.env.as_deref()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn stdin_kind(&self) -> StreamKind {
        self.attached.map_or_else(|| self.stdin.kind(), |k| k[0])
    }

    pub fn stdout_kind(&self) -> StreamKind {
        self.attached.map_or_else(|| self.stdout.kind(), |k| k[1])
    }

    pub fn stderr_kind(&self) -> StreamKind {
        self.attached.map_or_else(|| self.stderr.kind(), |k| k[2])
    }

    /// Number of extra files configured (they move into the child at start)
    pub fn extra_file_count(&self) -> usize {
        self.extra_file_count
    }

    pub fn sys_proc_attr(&self) -> &SysProcAttr {
        &self.sys_proc_attr
    }

    pub fn cancel(&self) -> Option<&CancelFn> {
        self.cancel.as_ref()
    }

    pub fn wait_delay(&self) -> Duration {
        self.wait_delay
    }

    pub fn err(&self) -> Option<&ExecError> {
        self.err.as_ref()
    }

    pub fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    pub fn state(&self) -> CmdState {
        self.state
    }

    pub fn process_state(&self) -> Option<&ProcessState> {
        self.process_state.as_ref()
    }

    /// Environment the process runs with
    pub fn environ(&self) -> Vec<String> {
        effective_environ(
            self.env.as_deref(),
            self.dir.as_deref(),
            self.inherit_env_allowlist.as_deref(),
        )
    }

    // --- guarded setters ---

    fn configurable(&mut self) -> std::result::Result<&mut Self, UsageError> {
        match self.state {
            CmdState::Unconfigured | CmdState::Configured => {
                self.state = CmdState::Configured;
                Ok(self)
            }
            _ => Err(UsageError::AlreadyStarted),
        }
    }

    pub fn set_path(&mut self, path: &str) -> Result<()> {
        self.configurable()?.path = path.to_string();
        Ok(())
    }

    pub fn set_args(&mut self, args: Vec<String>) -> Result<()> {
        self.configurable()?.args = args;
        Ok(())
    }

    pub fn set_env(&mut self, env: Option<Vec<String>>) -> Result<()> {
        self.configurable()?.env = env;
        Ok(())
    }

    pub fn set_dir(&mut self, dir: Option<PathBuf>) -> Result<()> {
        self.configurable()?.dir = dir;
        Ok(())
    }

    pub fn set_stdin(&mut self, stdin: InputSource) -> Result<()> {
        self.configurable()?.stdin = stdin;
        Ok(())
    }

    pub fn set_stdout(&mut self, stdout: OutputSink) -> Result<()> {
        self.configurable()?.stdout = stdout;
        Ok(())
    }

    pub fn set_stderr(&mut self, stderr: OutputSink) -> Result<()> {
        self.configurable()?.stderr = stderr;
        Ok(())
    }

    pub fn set_extra_files(&mut self, files: Vec<File>) -> Result<()> {
        let spec = self.configurable()?;
        spec.extra_file_count = files.len();
        spec.extra_files = files;
        Ok(())
    }

    pub fn set_sys_proc_attr(&mut self, attr: SysProcAttr) -> Result<()> {
        self.configurable()?.sys_proc_attr = attr;
        Ok(())
    }

    pub fn set_cancel(&mut self, cancel: Option<CancelFn>) -> Result<()> {
        self.configurable()?.cancel = cancel;
        Ok(())
    }

    pub fn set_wait_delay(&mut self, wait_delay: Duration) -> Result<()> {
        self.configurable()?.wait_delay = wait_delay;
        Ok(())
    }

    pub fn set_err(&mut self, err: Option<ExecError>) -> Result<()> {
        self.configurable()?.err = err;
        Ok(())
    }

    // --- pipes and captures ---

    pub fn stdin_pipe(&mut self) -> Result<PipeWriter> {
        let spec = self.configurable()?;
        if spec.stdin.kind() != StreamKind::Null {
            return Err(UsageError::StdinAlreadySet.into());
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        spec.stdin = InputSource::Pipe(theirs);
        Ok(ours)
    }

    pub fn stdout_pipe(&mut self) -> Result<PipeReader> {
        let spec = self.configurable()?;
        if spec.stdout.kind() != StreamKind::Null {
            return Err(UsageError::StdoutAlreadySet.into());
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        spec.stdout = OutputSink::Pipe(theirs);
        Ok(ours)
    }

    pub fn stderr_pipe(&mut self) -> Result<PipeReader> {
        let spec = self.configurable()?;
        if spec.stderr.kind() != StreamKind::Null {
            return Err(UsageError::StderrAlreadySet.into());
        }
        let (ours, theirs) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        spec.stderr = OutputSink::Pipe(theirs);
        Ok(ours)
    }

    /// Wire stdout into `stdout`; capture stderr for error reporting if unset
    ///
    /// Returns the stderr buffer when one was installed.
    pub fn capture_output(&mut self, stdout: CaptureBuffer) -> Result<Option<CaptureBuffer>> {
        let spec = self.configurable()?;
        if spec.stdout.kind() != StreamKind::Null {
            return Err(UsageError::StdoutAlreadySet.into());
        }
        spec.stdout = OutputSink::Capture(stdout);
        if spec.stderr.kind() != StreamKind::Null {
            return Ok(None);
        }
        let stderr = CaptureBuffer::bounded(STDERR_CAPTURE_LIMIT);
        spec.stderr = OutputSink::Capture(stderr.clone());
        Ok(Some(stderr))
    }

    /// Wire stdout and stderr into the same buffer
    pub fn capture_combined(&mut self, combined: CaptureBuffer) -> Result<()> {
        let spec = self.configurable()?;
        if spec.stdout.kind() != StreamKind::Null {
            return Err(UsageError::StdoutAlreadySet.into());
        }
        if spec.stderr.kind() != StreamKind::Null {
            return Err(UsageError::StderrAlreadySet.into());
        }
        spec.stdout = OutputSink::Capture(combined.clone());
        spec.stderr = OutputSink::Capture(combined);
        Ok(())
    }

    // --- lifecycle ---

    /// Checks that must pass before spawning; a failure leaves the handle inert
    pub fn prepare_start(&mut self) -> Result<()> {
        if !matches!(self.state, CmdState::Unconfigured | CmdState::Configured) {
            return Err(UsageError::AlreadyStarted.into());
        }

        let failure = if let Some(err) = &self.err {
            Some(err.clone())
        } else if self.cancel.is_some() && self.token.is_none() {
            Some(UsageError::CancelWithoutContext.into())
        } else if self.token.as_ref().is_some_and(|t| t.is_cancelled()) {
            Some(ExecError::Canceled)
        } else {
            None
        };

        match failure {
            Some(err) => {
                self.state = CmdState::Failed;
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Move the configured streams out for the spawned process
    pub fn take_streams(&mut self) -> Streams {
        self.attached = Some([self.stdin.kind(), self.stdout.kind(), self.stderr.kind()]);
        Streams {
            stdin: std::mem::take(&mut self.stdin),
            stdout: std::mem::take(&mut self.stdout),
            stderr: std::mem::take(&mut self.stderr),
            extra_files: std::mem::take(&mut self.extra_files),
        }
    }

    pub fn mark_started(&mut self) {
        self.state = CmdState::Started;
    }

    pub fn mark_failed(&mut self) {
        self.state = CmdState::Failed;
    }

    /// Check that `wait` is legal now; never blocks
    pub fn check_wait(&self) -> std::result::Result<(), UsageError> {
        match self.state {
            CmdState::Started => Ok(()),
            CmdState::Exited => Err(UsageError::AlreadyWaited),
            CmdState::Unconfigured | CmdState::Configured | CmdState::Failed => {
                Err(UsageError::NotStarted)
            }
        }
    }

    /// Record the reaped state; the handle is `Exited` from here on
    pub fn finish(&mut self, state: ProcessState) {
        self.state = CmdState::Exited;
        self.process_state = Some(state);
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_command(&self.path, &self.args))
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("path", &self.path)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("dir", &self.dir)
            .field("stdin", &self.stdin_kind())
            .field("stdout", &self.stdout_kind())
            .field("stderr", &self.stderr_kind())
            .field("extra_files", &self.extra_file_count)
            .field("sys_proc_attr", &self.sys_proc_attr)
            .field("cancel", &self.cancel.is_some())
            .field("wait_delay", &self.wait_delay)
            .field("state", &self.state)
            .field("process_state", &self.process_state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CommandSpec {
        CommandSpec::new("/bin/echo", vec!["echo".into(), "hi".into()])
    }

    #[test]
    fn test_args_returned_verbatim() {
        let mut spec = spec();
        let args = vec!["custom-argv0".to_string(), "b".into(), "a".into()];
        spec.set_args(args.clone()).unwrap();

        assert_eq!(spec.args(), args.as_slice());
        assert_eq!(spec.path(), "/bin/echo");
        assert_eq!(spec.state(), CmdState::Configured);
    }

    #[test]
    fn test_setters_rejected_after_start() {
        let mut spec = spec();
        spec.prepare_start().unwrap();
        spec.mark_started();

        let err = spec.set_dir(Some(PathBuf::from("/tmp"))).unwrap_err();
        assert!(matches!(err, ExecError::Usage(UsageError::AlreadyStarted)));
        assert!(spec.dir().is_none());
    }

    #[test]
    fn test_wait_state_machine() {
        let mut spec = spec();
        assert_eq!(spec.check_wait(), Err(UsageError::NotStarted));

        spec.prepare_start().unwrap();
        spec.mark_started();
        assert_eq!(spec.check_wait(), Ok(()));
        // Checking does not consume the wait
        assert_eq!(spec.check_wait(), Ok(()));
        assert!(spec.process_state().is_none());

        spec.finish(ProcessState::exited(1, 0));
        assert_eq!(spec.state(), CmdState::Exited);
        assert_eq!(spec.check_wait(), Err(UsageError::AlreadyWaited));
        assert!(matches!(
            spec.prepare_start(),
            Err(ExecError::Usage(UsageError::AlreadyStarted))
        ));
    }

    #[test]
    fn test_recorded_error_fails_start_and_makes_handle_inert() {
        let mut spec = spec().with_err(Some(ExecError::not_found("nope")));

        assert!(matches!(spec.prepare_start(), Err(ExecError::NotFound { .. })));
        assert_eq!(spec.state(), CmdState::Failed);
        assert_eq!(spec.check_wait(), Err(UsageError::NotStarted));
        assert!(spec.err().is_some());
    }

    #[test]
    fn test_cancel_requires_token() {
        let mut spec = spec();
        let cancel: CancelFn = Arc::new(|_pid| Ok(()));
        spec.set_cancel(Some(cancel)).unwrap();

        assert!(matches!(
            spec.prepare_start(),
            Err(ExecError::Usage(UsageError::CancelWithoutContext))
        ));
    }

    #[test]
    fn test_canceled_token_fails_start() {
        let token = CancellationToken::new();
        token.cancel();
        let mut spec = spec().with_token(token, Duration::from_millis(10));

        assert!(matches!(spec.prepare_start(), Err(ExecError::Canceled)));
    }

    #[tokio::test]
    async fn test_pipe_conflicts() {
        let mut spec = spec();
        spec.set_stdout(OutputSink::Inherit).unwrap();

        assert!(matches!(
            spec.stdout_pipe(),
            Err(ExecError::Usage(UsageError::StdoutAlreadySet))
        ));
        assert!(spec.stderr_pipe().is_ok());
        assert!(matches!(
            spec.stderr_pipe(),
            Err(ExecError::Usage(UsageError::StderrAlreadySet))
        ));
        assert!(spec.stdin_pipe().is_ok());
        assert_eq!(spec.stdin_kind(), StreamKind::Pipe);
    }

    #[test]
    fn test_capture_output_keeps_existing_stderr() {
        let mut spec = spec();
        spec.set_stderr(OutputSink::Inherit).unwrap();

        let stderr = spec.capture_output(CaptureBuffer::unbounded()).unwrap();
        assert!(stderr.is_none());
        assert_eq!(spec.stdout_kind(), StreamKind::Capture);
        assert_eq!(spec.stderr_kind(), StreamKind::Inherit);
    }

    #[test]
    fn test_take_streams_keeps_kinds_visible() {
        let mut spec = spec();
        spec.set_stdin(InputSource::bytes("data")).unwrap();
        spec.set_stdout(OutputSink::Capture(CaptureBuffer::unbounded())).unwrap();

        let streams = spec.take_streams();
        assert_eq!(streams.stdin.kind(), StreamKind::Reader);
        assert_eq!(spec.stdin_kind(), StreamKind::Reader);
        assert_eq!(spec.stdout_kind(), StreamKind::Capture);
        assert_eq!(spec.stderr_kind(), StreamKind::Null);
    }

    #[test]
    fn test_display() {
        assert_eq!(spec().to_string(), "/bin/echo hi");
    }
}
