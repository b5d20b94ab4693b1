// ============================================================================
// Scripted Fake Executor for Testing
// ============================================================================
//
// Each `command` consumes the next scripted `Expectation`. After `start` the
// fake "process" runs on its own task: it drains stdin, writes the scripted
// stdout/stderr into whatever sinks were configured, then lives for
// `runs_for` before exiting with the scripted status. Cancellation and
// wait-delay go through the same reaper as real processes. A handle that
// takes an expectation but never starts is reported by `verify`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{argv, has_path_separator, Executor};
use crate::application::reaper::{reap, CancelProgress, ChildProcess, Reaped};
use crate::application::streams::sink_writer;
use crate::config::ExecutorConfig;
use crate::domain::{
    environ::render_command, BoxedWriter, CommandSpec, ExitError, InputSource, OutputSink, ProcessState,
    ResourceUsage, Termination, UsageError,
};
use crate::error::{ExecError, Result};
use crate::port::cmd::Cmd;

/// Directory fake executables appear to live in
pub const FAKE_BIN_DIR: &str = "/fake/bin";

/// First pid handed out by a fake executor
pub const FAKE_PID_BASE: u32 = 10_000;

pub const SIGTERM: i32 = 15;
pub const SIGKILL: i32 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LaunchBehavior {
    Spawn,
    NotFound,
    Fail(io::ErrorKind),
}

/// One scripted command invocation
#[derive(Debug, Clone)]
pub struct Expectation {
    program: String,
    args: Option<Vec<String>>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    termination: Termination,
    usage: ResourceUsage,
    runtime: Duration,
    ignores_termination: bool,
    launch: LaunchBehavior,
}

impl Expectation {
    /// Expect `program` (as passed to `command`), exiting 0 with no output
    pub fn command(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            termination: Termination::Exited(0),
            usage: ResourceUsage::default(),
            runtime: Duration::ZERO,
            ignores_termination: false,
            launch: LaunchBehavior::Spawn,
        }
    }

    /// Require exactly these arguments (excluding the program name)
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn stdout(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdout = bytes.into();
        self
    }

    pub fn stderr(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stderr = bytes.into();
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.termination = Termination::Exited(code);
        self
    }

    pub fn killed_by(mut self, signal: i32) -> Self {
        self.termination = Termination::Signaled(signal);
        self
    }

    pub fn usage(mut self, usage: ResourceUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Keep running this long after writing output
    pub fn runs_for(mut self, runtime: Duration) -> Self {
        self.runtime = runtime;
        self
    }

    /// Survive the default terminate; only the forced kill stops it
    pub fn ignores_termination(mut self) -> Self {
        self.ignores_termination = true;
        self
    }

    /// The executable cannot be located
    pub fn not_found(mut self) -> Self {
        self.launch = LaunchBehavior::NotFound;
        self
    }

    /// Located, but spawning fails with `kind` (e.g. PermissionDenied)
    pub fn launch_failure(mut self, kind: io::ErrorKind) -> Self {
        self.launch = LaunchBehavior::Fail(kind);
        self
    }

    fn matches(&self, name: &str, args: &[&str]) -> bool {
        self.program == name
            && self
                .args
                .as_ref()
                .map_or(true, |expected| expected.iter().map(String::as_str).eq(args.iter().copied()))
    }

    fn describe(&self) -> String {
        match &self.args {
            Some(args) => {
                let full: Vec<String> = std::iter::once(self.program.clone())
                    .chain(args.iter().cloned())
                    .collect();
                render_command(&self.program, &full)
            }
            None => format!("{} ...", self.program),
        }
    }
}

/// A command the fake actually started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub pid: u32,
    pub path: String,
    pub args: Vec<String>,
    pub env: Option<Vec<String>>,
    pub dir: Option<PathBuf>,
    /// Bytes the fake process read from stdin
    pub stdin: Vec<u8>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("unexpected command {0:?}: script exhausted")]
    Unexpected(String),

    #[error("expected {expected:?}, got {actual:?}")]
    Mismatch { expected: String, actual: String },

    #[error("expected command {0:?} was never issued")]
    Unmet(String),

    #[error("command {command:?} was issued but never started: {reason}")]
    NotStarted { command: String, reason: String },
}

#[derive(Debug)]
struct FakeState {
    script: VecDeque<Expectation>,
    paths: HashMap<String, String>,
    calls: Vec<RecordedCall>,
    problems: Vec<ScriptError>,
    next_pid: u32,
}

type SharedState = Arc<Mutex<FakeState>>;

fn lock(state: &Mutex<FakeState>) -> MutexGuard<'_, FakeState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Deterministic executor driven by a script of expected commands
#[derive(Debug, Clone)]
pub struct FakeExecutor {
    state: SharedState,
    config: ExecutorConfig,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                script: VecDeque::new(),
                paths: HashMap::new(),
                calls: Vec::new(),
                problems: Vec::new(),
                next_pid: FAKE_PID_BASE,
            })),
            config,
        }
    }

    /// Append an expectation to the script (builder form)
    pub fn expect(self, expectation: Expectation) -> Self {
        self.push(expectation);
        self
    }

    /// Append an expectation to the script
    ///
    /// Bare program names become resolvable through `look_path` unless the
    /// expectation says the program is missing.
    pub fn push(&self, expectation: Expectation) {
        let mut state = lock(&self.state);
        if expectation.launch != LaunchBehavior::NotFound && !has_path_separator(&expectation.program) {
            state
                .paths
                .entry(expectation.program.clone())
                .or_insert_with(|| format!("{}/{}", FAKE_BIN_DIR, expectation.program));
        }
        state.script.push_back(expectation);
    }

    /// Make `name` resolve to `path`
    pub fn with_program(self, name: impl Into<String>, path: impl Into<String>) -> Self {
        lock(&self.state).paths.insert(name.into(), path.into());
        self
    }

    /// Every started command, in start order
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state).calls.clone()
    }

    /// Report unexpected commands and unused expectations
    pub fn verify(&self) -> std::result::Result<(), Vec<ScriptError>> {
        let state = lock(&self.state);
        let mut problems = state.problems.clone();
        problems.extend(state.script.iter().map(|e| ScriptError::Unmet(e.describe())));
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    fn build(&self, token: Option<CancellationToken>, name: &str, args: &[&str]) -> FakeCmd {
        let actual = render_command(name, &argv(name, args));
        let expectation = {
            let mut state = lock(&self.state);
            match state.script.pop_front() {
                Some(next) if next.matches(name, args) => Some(next),
                Some(next) => {
                    let expected = next.describe();
                    state.script.push_front(next);
                    state.problems.push(ScriptError::Mismatch {
                        expected,
                        actual: actual.clone(),
                    });
                    None
                }
                None => {
                    state.problems.push(ScriptError::Unexpected(actual.clone()));
                    None
                }
            }
        };

        let (path, err) = match &expectation {
            None => (
                name.to_string(),
                Some(ExecError::launch(
                    name,
                    io::Error::other(format!("unexpected command in fake script: {}", actual)),
                )),
            ),
            Some(e) if e.launch == LaunchBehavior::NotFound => {
                (name.to_string(), Some(ExecError::not_found(name)))
            }
            Some(_) => match self.look_path(name) {
                Ok(path) => (path, None),
                Err(err) => (name.to_string(), Some(err)),
            },
        };

        let mut spec = CommandSpec::new(path, argv(name, args))
            .with_err(err)
            .with_inherit_env_allowlist(self.config.inherit_env_allowlist.clone());
        if let Some(token) = token {
            spec = spec.with_token(token, self.config.wait_delay());
        }

        FakeCmd {
            spec,
            expectation,
            state: self.state.clone(),
            running: None,
            progress: CancelProgress::default(),
            reaped: None,
        }
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for FakeExecutor {
    fn command(&self, name: &str, args: &[&str]) -> Box<dyn Cmd> {
        Box::new(self.build(None, name, args))
    }

    fn command_context(&self, token: CancellationToken, name: &str, args: &[&str]) -> Box<dyn Cmd> {
        Box::new(self.build(Some(token), name, args))
    }

    fn look_path(&self, file: &str) -> Result<String> {
        if has_path_separator(file) {
            return Ok(file.to_string());
        }
        lock(&self.state)
            .paths
            .get(file)
            .cloned()
            .ok_or_else(|| ExecError::not_found(file))
    }
}

/// Command handle produced by `FakeExecutor`
#[derive(Debug)]
pub struct FakeCmd {
    spec: CommandSpec,
    expectation: Option<Expectation>,
    state: SharedState,
    running: Option<FakeChild>,
    progress: CancelProgress,
    reaped: Option<Reaped>,
}

impl FakeCmd {
    /// Report the scripted expectation as issued but never run
    fn abandon(&mut self, reason: &str) {
        if let Some(script) = self.expectation.take() {
            lock(&self.state).problems.push(ScriptError::NotStarted {
                command: script.describe(),
                reason: reason.to_string(),
            });
        }
    }
}

impl Drop for FakeCmd {
    fn drop(&mut self) {
        self.abandon("handle dropped before start");
    }
}

impl fmt::Display for FakeCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.spec, f)
    }
}

#[async_trait]
impl Cmd for FakeCmd {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut CommandSpec {
        &mut self.spec
    }

    fn start(&mut self) -> Result<()> {
        if let Err(e) = self.spec.prepare_start() {
            // A scripted lookup failure is satisfied by failing here
            if self
                .expectation
                .as_ref()
                .is_some_and(|script| script.launch == LaunchBehavior::NotFound)
            {
                self.expectation = None;
            } else {
                self.abandon(&e.to_string());
            }
            return Err(e);
        }

        let Some(script) = self.expectation.take() else {
            self.spec.mark_failed();
            return Err(ExecError::launch(
                self.spec.path(),
                io::Error::other("fake command has no script"),
            ));
        };
        if let LaunchBehavior::Fail(kind) = script.launch {
            self.spec.mark_failed();
            return Err(ExecError::launch(self.spec.path(), io::Error::from(kind)));
        }

        let (pid, call_index) = {
            let mut state = lock(&self.state);
            let pid = state.next_pid;
            state.next_pid += 1;
            state.calls.push(RecordedCall {
                pid,
                path: self.spec.path().to_string(),
                args: self.spec.args().to_vec(),
                env: self.spec.env().map(<[String]>::to_vec),
                dir: self.spec.dir().map(PathBuf::from),
                stdin: Vec::new(),
            });
            (pid, state.calls.len() - 1)
        };

        let streams = self.spec.take_streams();
        let stop = CancellationToken::new();
        let body = simulate(
            streams.stdin,
            streams.stdout,
            streams.stderr,
            script.stdout,
            script.stderr,
            script.runtime,
            self.state.clone(),
            call_index,
        );
        let stopped = stop.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                result = body => result,
                _ = stopped.cancelled() => Ok(()),
            }
        });

        self.spec.mark_started();
        info!(pid = %pid, command = %self.spec, "Fake process started");

        self.running = Some(FakeChild {
            pid,
            task: Some(task),
            io_error: None,
            stop,
            signal: None,
            termination: script.termination,
            usage: script.usage,
            ignores_termination: script.ignores_termination,
        });
        Ok(())
    }

    async fn wait(&mut self) -> Result<()> {
        self.spec.check_wait()?;
        let cancel = self.spec.cancel().cloned();
        let token = self.spec.token().cloned();
        let wait_delay = self.spec.wait_delay();

        let child = self.running.as_mut().ok_or(UsageError::NotStarted)?;
        let reaped = match &self.reaped {
            Some(reaped) => reaped.clone(),
            None => {
                let reaped = reap(
                    child,
                    &mut self.progress,
                    token.as_ref(),
                    cancel.as_ref(),
                    wait_delay,
                )
                .await?;
                self.reaped = Some(reaped.clone());
                reaped
            }
        };
        let io_error = child.io_error.take();
        let pid = child.pid;
        self.running = None;

        info!(pid = %pid, state = %reaped.state, canceled = %reaped.canceled, "Fake process exited");
        self.spec.finish(reaped.state.clone());

        if reaped.canceled || !reaped.state.success() {
            return Err(ExitError::new(reaped.state)
                .with_canceled(reaped.canceled)
                .into());
        }
        match io_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// The running half of a fake process
#[derive(Debug)]
struct FakeChild {
    pid: u32,
    task: Option<JoinHandle<io::Result<()>>>,
    io_error: Option<io::Error>,
    stop: CancellationToken,
    signal: Option<i32>,
    termination: Termination,
    usage: ResourceUsage,
    ignores_termination: bool,
}

impl FakeChild {
    fn running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait_exit(&mut self) -> io::Result<ProcessState> {
        if let Some(task) = self.task.as_mut() {
            let joined = task.await;
            self.task = None;
            self.io_error = match joined {
                Ok(result) => result.err(),
                Err(join_err) => Some(io::Error::other(join_err.to_string())),
            };
        }

        let termination = match self.signal {
            Some(signal) => Termination::Signaled(signal),
            None => self.termination,
        };
        Ok(ProcessState::new(self.pid, termination, self.usage))
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.running() && !self.ignores_termination {
            self.signal = Some(SIGTERM);
            self.stop.cancel();
        }
        Ok(())
    }

    fn force_kill(&mut self) -> io::Result<()> {
        if self.running() {
            self.signal = Some(SIGKILL);
            self.stop.cancel();
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn simulate(
    stdin: InputSource,
    stdout: OutputSink,
    stderr: OutputSink,
    stdout_bytes: Vec<u8>,
    stderr_bytes: Vec<u8>,
    runtime: Duration,
    state: SharedState,
    call_index: usize,
) -> io::Result<()> {
    let consumed = drain_input(stdin).await?;
    if let Some(call) = lock(&state).calls.get_mut(call_index) {
        call.stdin = consumed;
    }

    // Sinks stay open until the fake process "exits", like real pipes
    let stdout = emit(stdout, &stdout_bytes).await?;
    let stderr = emit(stderr, &stderr_bytes).await?;

    tokio::time::sleep(runtime).await;
    drop(stdout);
    drop(stderr);
    Ok(())
}

async fn drain_input(stdin: InputSource) -> io::Result<Vec<u8>> {
    let mut consumed = Vec::new();
    match stdin {
        InputSource::Null | InputSource::Inherit => {}
        InputSource::File(file) => {
            tokio::fs::File::from_std(file)
                .read_to_end(&mut consumed)
                .await?;
        }
        InputSource::Reader(mut reader) => {
            reader.read_to_end(&mut consumed).await?;
        }
        InputSource::Pipe(mut pipe) => {
            pipe.read_to_end(&mut consumed).await?;
        }
    }
    Ok(consumed)
}

/// Write scripted bytes into a sink, returning whatever must stay open
async fn emit(sink: OutputSink, bytes: &[u8]) -> io::Result<Option<BoxedWriter>> {
    let (mut writer, joined) = match sink {
        OutputSink::File(file) => {
            let mut file = tokio::fs::File::from_std(file);
            file.write_all(bytes).await?;
            file.flush().await?;
            return Ok(None);
        }
        other => match sink_writer(other) {
            Some(found) => found,
            None => return Ok(None),
        },
    };
    let written = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    }
    .await;

    match written {
        Ok(()) => Ok(Some(writer)),
        // A reader that hung up on a pipe is the caller's business
        Err(e) if !joined && e.kind() == io::ErrorKind::BrokenPipe => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CaptureBuffer, CmdState, StreamKind};

    #[tokio::test]
    async fn test_scripted_success() {
        let executor =
            FakeExecutor::new().expect(Expectation::command("echo").args(["hello"]).stdout("hello\n"));

        let mut cmd = executor.command("echo", &["hello"]);
        assert_eq!(cmd.path(), "/fake/bin/echo");
        assert_eq!(cmd.args(), ["echo", "hello"]);

        let out = cmd.output().await.unwrap();
        assert_eq!(out, b"hello\n");
        assert!(cmd.process_state().unwrap().success());
        assert_eq!(cmd.state(), CmdState::Exited);
        executor.verify().unwrap();
    }

    #[tokio::test]
    async fn test_scripted_failure_carries_stderr() {
        let executor = FakeExecutor::new().expect(
            Expectation::command("make")
                .stdout("partial")
                .stderr("error: no rule\n")
                .exit_code(2),
        );

        let err = executor.command("make", &["all"]).output().await.unwrap_err();
        let exit = err.exit_error().expect("exit error");

        assert_eq!(exit.exit_code(), 2);
        assert_eq!(exit.stderr(), b"error: no rule\n");
        assert!(!exit.canceled());
    }

    #[tokio::test]
    async fn test_records_stdin_env_and_dir() {
        let executor = FakeExecutor::new().expect(Expectation::command("cat"));

        let mut cmd = executor.command("cat", &[]);
        cmd.set_stdin(InputSource::bytes("payload")).unwrap();
        cmd.set_env(Some(vec!["A=1".into()])).unwrap();
        cmd.set_dir(Some(PathBuf::from("/work"))).unwrap();
        cmd.run().await.unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].stdin, b"payload");
        assert_eq!(calls[0].env, Some(vec!["A=1".to_string()]));
        assert_eq!(calls[0].dir, Some(PathBuf::from("/work")));
        assert_eq!(calls[0].pid, FAKE_PID_BASE);
    }

    #[tokio::test]
    async fn test_not_found_fails_start() {
        let executor = FakeExecutor::new().expect(Expectation::command("ghost").not_found());

        let mut cmd = executor.command("ghost", &[]);
        assert!(matches!(cmd.err(), Some(ExecError::NotFound { .. })));
        assert!(matches!(cmd.run().await, Err(ExecError::NotFound { .. })));
        assert!(executor.calls().is_empty());
        assert!(matches!(executor.look_path("ghost"), Err(ExecError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let executor = FakeExecutor::new()
            .expect(Expectation::command("locked").launch_failure(io::ErrorKind::PermissionDenied));

        let mut cmd = executor.command("locked", &[]);
        assert!(matches!(cmd.start(), Err(ExecError::Launch { .. })));
        assert_eq!(cmd.state(), CmdState::Failed);
    }

    #[tokio::test]
    async fn test_unexpected_and_mismatched_commands() {
        let executor = FakeExecutor::new().expect(Expectation::command("git").args(["status"]));

        let mut wrong = executor.command("git", &["push"]);
        assert!(matches!(wrong.start(), Err(ExecError::Launch { .. })));

        executor.command("git", &["status"]).run().await.unwrap();

        let mut extra = executor.command("ls", &[]);
        assert!(extra.start().is_err());

        let problems = executor.verify().unwrap_err();
        assert_eq!(problems.len(), 2);
        assert!(matches!(problems[0], ScriptError::Mismatch { .. }));
        assert!(matches!(problems[1], ScriptError::Unexpected(_)));
    }

    #[tokio::test]
    async fn test_unmet_expectation_reported() {
        let executor = FakeExecutor::new().expect(Expectation::command("never"));

        let problems = executor.verify().unwrap_err();
        assert_eq!(problems, vec![ScriptError::Unmet("never ...".to_string())]);
    }

    #[tokio::test]
    async fn test_cancel_terminates_fake() {
        let executor = FakeExecutor::new()
            .expect(Expectation::command("sleep").runs_for(Duration::from_secs(60)));
        let token = CancellationToken::new();

        let mut cmd = executor.command_context(token.clone(), "sleep", &["60"]);
        cmd.start().unwrap();
        token.cancel();
        let err = cmd.wait().await.unwrap_err();

        assert!(err.is_canceled());
        assert_eq!(err.exit_error().unwrap().signal(), Some(SIGTERM));
    }

    #[tokio::test]
    async fn test_wait_delay_forces_kill() {
        let config = ExecutorConfig::default().with_wait_delay(Duration::from_millis(20));
        let executor = FakeExecutor::with_config(config).expect(
            Expectation::command("stubborn")
                .runs_for(Duration::from_secs(60))
                .ignores_termination(),
        );
        let token = CancellationToken::new();

        let mut cmd = executor.command_context(token.clone(), "stubborn", &[]);
        assert_eq!(cmd.wait_delay(), Duration::from_millis(20));
        cmd.start().unwrap();
        token.cancel();
        let err = cmd.wait().await.unwrap_err();

        assert_eq!(err.exit_error().unwrap().signal(), Some(SIGKILL));
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_pipes_stream_before_wait() {
        let executor = FakeExecutor::new().expect(Expectation::command("tr").stdout("HI"));

        let mut cmd = executor.command("tr", &["a-z", "A-Z"]);
        let mut stdin = cmd.stdin_pipe().unwrap();
        let mut stdout = cmd.stdout_pipe().unwrap();
        assert_eq!(cmd.stdout(), StreamKind::Pipe);
        cmd.start().unwrap();

        stdin.write_all(b"hi").await.unwrap();
        drop(stdin);
        let mut out = Vec::new();
        stdout.read_to_end(&mut out).await.unwrap();
        cmd.wait().await.unwrap();

        assert_eq!(out, b"HI");
        assert_eq!(executor.calls()[0].stdin, b"hi");
    }

    #[tokio::test]
    async fn test_combined_output_merges_streams() {
        let executor = FakeExecutor::new()
            .expect(Expectation::command("build").stdout("out\n").stderr("err\n"));

        let out = executor.command("build", &[]).combined_output().await.unwrap();

        assert_eq!(out, b"out\nerr\n");
    }

    #[tokio::test]
    async fn test_capture_into_configured_sink() {
        let executor = FakeExecutor::new().expect(Expectation::command("date").stdout("today"));
        let capture = CaptureBuffer::unbounded();

        let mut cmd = executor.command("date", &[]);
        cmd.set_stdout(OutputSink::Capture(capture.clone())).unwrap();
        cmd.run().await.unwrap();

        assert_eq!(capture.contents(), b"today");
        assert!(matches!(
            cmd.output().await,
            Err(ExecError::Usage(UsageError::AlreadyStarted))
        ));
    }

    #[tokio::test]
    async fn test_look_path_table() {
        let executor = FakeExecutor::new().with_program("python3", "/opt/py/bin/python3");

        assert_eq!(executor.look_path("python3").unwrap(), "/opt/py/bin/python3");
        assert_eq!(executor.look_path("./local").unwrap(), "./local");
        assert!(executor.look_path("missing").is_err());
    }

    #[tokio::test]
    async fn test_dropped_handle_is_reported() {
        let executor = FakeExecutor::new().expect(Expectation::command("deploy"));

        drop(executor.command("deploy", &[]));

        let problems = executor.verify().unwrap_err();
        assert!(matches!(&problems[..], [ScriptError::NotStarted { command, .. }] if command == "deploy ..."));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_is_reported() {
        let executor = FakeExecutor::new().expect(Expectation::command("deploy"));
        let token = CancellationToken::new();
        token.cancel();

        let mut cmd = executor.command_context(token, "deploy", &[]);
        assert!(matches!(cmd.start(), Err(ExecError::Canceled)));
        drop(cmd);

        let problems = executor.verify().unwrap_err();
        assert_eq!(problems.len(), 1);
        assert!(matches!(&problems[0], ScriptError::NotStarted { reason, .. } if reason == "command canceled before start"));
    }

    #[tokio::test]
    async fn test_wait_survives_dropped_wait() {
        let executor = FakeExecutor::new()
            .expect(Expectation::command("sleep").runs_for(Duration::from_millis(200)));

        let mut cmd = executor.command("sleep", &["1"]);
        cmd.start().unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(20), cmd.wait())
            .await
            .is_err());

        assert_eq!(cmd.state(), CmdState::Started);
        assert!(cmd.process_state().is_none());

        cmd.wait().await.unwrap();
        assert_eq!(cmd.state(), CmdState::Exited);
        assert!(cmd.process_state().unwrap().success());
        executor.verify().unwrap();
    }
}
