// Subprocess command handle
// reason: tokio::process for async spawn and stdio; wait4 on a blocking thread
// for the exit status with per-child CPU time (see wait); nix for signals

use async_trait::async_trait;
use std::ffi::OsStr;
use std::fmt;
use std::io;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use execport_core::application::reaper::{reap, CancelProgress, ChildProcess, Reaped};
use execport_core::application::streams::{copy_from_child, copy_into_child, sink_writer, Copiers};
use execport_core::domain::environ::split_env_entry;
use execport_core::domain::{
    BoxedReader, BoxedWriter, CommandSpec, ExitError, InputSource, OutputSink, ProcessState, Streams,
    UsageError,
};
use execport_core::port::Cmd;
use execport_core::{ExecError, Result};

use crate::path_lookup::resolve;
use crate::platform;

/// Command handle backed by a real OS process
///
/// `start` spawns onto the current tokio runtime and must be called from
/// within one. A `wait` future dropped before completion (e.g. under
/// `tokio::time::timeout`) leaves the handle started; calling `wait` again
/// resumes where it stopped.
#[derive(Debug)]
pub struct SubprocessCmd {
    spec: CommandSpec,
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    child: SystemChild,
    copiers: Copiers,
    progress: CancelProgress,
    reaped: Option<Reaped>,
}

impl SubprocessCmd {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            running: None,
        }
    }

    /// Adopt a configured `std::process::Command`
    ///
    /// Program, arguments, environment changes and working directory carry
    /// over. Stdio does not (std has no getters for it), so the streams start
    /// at the null device like any new handle. An `env_clear` is not visible
    /// either: the environment is the caller's with the command's changes
    /// applied. A bare program name is resolved through the search path.
    pub fn from_command(command: &std::process::Command) -> Self {
        let program = lossy(command.get_program());
        let args = std::iter::once(program.clone())
            .chain(command.get_args().map(lossy))
            .collect();

        let changes: Vec<(String, Option<String>)> = command
            .get_envs()
            .map(|(key, value)| (lossy(key), value.map(lossy)))
            .collect();
        let env = (!changes.is_empty()).then(|| {
            let mut env: Vec<String> = std::env::vars_os()
                .map(|(key, value)| format!("{}={}", lossy(&key), lossy(&value)))
                .filter(|entry| {
                    split_env_entry(entry).is_some_and(|(key, _)| !changes.iter().any(|(k, _)| k == key))
                })
                .collect();
            env.extend(
                changes
                    .iter()
                    .filter_map(|(key, value)| value.as_ref().map(|value| format!("{key}={value}"))),
            );
            env
        });

        let (path, err) = resolve(&program);
        let spec = CommandSpec::new(path, args)
            .with_err(err)
            .with_env(env)
            .with_dir(command.get_current_dir().map(|dir| dir.to_path_buf()));
        Self::new(spec)
    }

    fn build_command(&self, environ: &[String]) -> Command {
        let args = self.spec.args();
        let mut command = Command::new(self.spec.path());

        #[cfg(unix)]
        if let Some(arg0) = args.first() {
            command.arg0(arg0);
        }
        command.args(args.iter().skip(1));

        command.env_clear();
        for (key, value) in environ.iter().filter_map(|entry| split_env_entry(entry)) {
            command.env(key, value);
        }

        if let Some(dir) = self.spec.dir() {
            command.current_dir(dir);
        }
        command
    }

    fn spawn(&self, environ: Vec<String>, streams: Streams) -> Result<Running> {
        let path = self.spec.path();
        let mut command = self.build_command(&environ);

        let Streams {
            stdin,
            stdout,
            stderr,
            extra_files,
        } = streams;

        let (stdin_stdio, stdin_source) = match stdin {
            InputSource::Null => (Stdio::null(), None),
            InputSource::Inherit => (Stdio::inherit(), None),
            InputSource::File(file) => (Stdio::from(file), None),
            InputSource::Reader(reader) => (Stdio::piped(), Some((reader, true))),
            InputSource::Pipe(pipe) => (Stdio::piped(), Some((Box::new(pipe) as BoxedReader, false))),
        };
        let (stdout_stdio, stdout_sink) = output_stdio(stdout);
        let (stderr_stdio, stderr_sink) = output_stdio(stderr);
        command.stdin(stdin_stdio).stdout(stdout_stdio).stderr(stderr_stdio);

        platform::apply(&mut command, self.spec.sys_proc_attr(), &extra_files)
            .map_err(|e| ExecError::launch(path, e))?;

        let mut child = command.spawn().map_err(|e| self.spawn_error(e))?;
        // The child holds its own copies now
        drop(extra_files);

        let pid = child.id().unwrap_or_default();
        let mut copiers = Copiers::new();

        if let (Some((source, joined)), Some(child_stdin)) = (stdin_source, child.stdin.take()) {
            let task = copy_into_child(source, child_stdin);
            if joined {
                copiers.push(task);
            }
        }
        if let (Some((sink, joined)), Some(child_stdout)) = (stdout_sink, child.stdout.take()) {
            let task = copy_from_child(child_stdout, sink);
            if joined {
                copiers.push(task);
            }
        }
        if let (Some((sink, joined)), Some(child_stderr)) = (stderr_sink, child.stderr.take()) {
            let task = copy_from_child(child_stderr, sink);
            if joined {
                copiers.push(task);
            }
        }

        Ok(Running {
            child: SystemChild::new(child, pid),
            copiers,
            progress: CancelProgress::default(),
            reaped: None,
        })
    }

    fn spawn_error(&self, err: io::Error) -> ExecError {
        let missing_dir = self.spec.dir().is_some_and(|dir| !dir.is_dir());
        if err.kind() == io::ErrorKind::NotFound && !missing_dir {
            ExecError::not_found(self.spec.path())
        } else {
            ExecError::launch(self.spec.path(), err)
        }
    }
}

impl From<std::process::Command> for SubprocessCmd {
    fn from(command: std::process::Command) -> Self {
        Self::from_command(&command)
    }
}

fn lossy(value: &OsStr) -> String {
    value.to_string_lossy().into_owned()
}

fn output_stdio(sink: OutputSink) -> (Stdio, Option<(BoxedWriter, bool)>) {
    match sink {
        OutputSink::Null => (Stdio::null(), None),
        OutputSink::Inherit => (Stdio::inherit(), None),
        OutputSink::File(file) => (Stdio::from(file), None),
        other => (Stdio::piped(), sink_writer(other)),
    }
}

#[async_trait]
impl Cmd for SubprocessCmd {
    fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut CommandSpec {
        &mut self.spec
    }

    fn start(&mut self) -> Result<()> {
        self.spec.prepare_start()?;

        let environ = self.spec.environ();
        let streams = self.spec.take_streams();
        let running = match self.spawn(environ, streams) {
            Ok(running) => running,
            Err(e) => {
                warn!(command = %self.spec, error = %e, "Failed to start process");
                self.spec.mark_failed();
                return Err(e);
            }
        };

        self.spec.mark_started();
        info!(
            pid = %running.child.pid,
            command = %self.spec,
            dir = ?self.spec.dir(),
            "Process started"
        );
        self.running = Some(running);
        Ok(())
    }

    async fn wait(&mut self) -> Result<()> {
        self.spec.check_wait()?;

        let cancel = self.spec.cancel().cloned();
        let token = self.spec.token().cloned();
        let wait_delay = self.spec.wait_delay();

        // Progress lives in `running` so a dropped wait can be resumed
        let running = self.running.as_mut().ok_or(UsageError::NotStarted)?;
        let reaped = match &running.reaped {
            Some(reaped) => reaped.clone(),
            None => {
                let reaped = reap(
                    &mut running.child,
                    &mut running.progress,
                    token.as_ref(),
                    cancel.as_ref(),
                    wait_delay,
                )
                .await?;
                running.reaped = Some(reaped.clone());
                reaped
            }
        };
        let copied = running.copiers.join(wait_delay).await;
        let pid = running.child.pid;
        self.running = None;

        info!(
            pid = %pid,
            state = %reaped.state,
            canceled = %reaped.canceled,
            user_time = ?reaped.state.user_time(),
            system_time = ?reaped.state.system_time(),
            "Process exited"
        );
        self.spec.finish(reaped.state.clone());

        if reaped.canceled || !reaped.state.success() {
            return Err(ExitError::new(reaped.state)
                .with_canceled(reaped.canceled)
                .into());
        }
        copied
    }
}

impl fmt::Display for SubprocessCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.spec, f)
    }
}

#[cfg(unix)]
type ReapTask = tokio::task::JoinHandle<io::Result<(std::process::ExitStatus, execport_core::domain::ResourceUsage)>>;

/// A spawned OS process
///
/// On Unix the exit status comes from `wait4` on a blocking thread, which
/// also yields this child's own CPU time. The tokio `Child` is then only
/// held for ownership; tokio discards it when dropped after the reap.
#[derive(Debug)]
struct SystemChild {
    #[cfg_attr(unix, allow(dead_code))]
    child: Child,
    pid: u32,
    #[cfg(unix)]
    reaper: Option<ReapTask>,
    exited: Option<ProcessState>,
}

impl SystemChild {
    fn new(child: Child, pid: u32) -> Self {
        Self {
            child,
            pid,
            #[cfg(unix)]
            reaper: None,
            exited: None,
        }
    }

    #[cfg(unix)]
    async fn reap_os(&mut self) -> io::Result<ProcessState> {
        let pid = self.pid;
        // Kept across dropped waits; a second wait4 on the same pid would fail
        let reaper = self
            .reaper
            .get_or_insert_with(|| tokio::task::spawn_blocking(move || crate::wait::wait_pid(pid)));
        let joined = reaper.await;
        self.reaper = None;

        let (status, usage) = joined.map_err(io::Error::other)??;
        Ok(ProcessState::from_exit_status(pid, status, usage))
    }

    #[cfg(not(unix))]
    async fn reap_os(&mut self) -> io::Result<ProcessState> {
        let status = self.child.wait().await?;
        Ok(ProcessState::from_exit_status(
            self.pid,
            status,
            execport_core::domain::ResourceUsage::default(),
        ))
    }
}

#[async_trait]
impl ChildProcess for SystemChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn wait_exit(&mut self) -> io::Result<ProcessState> {
        if let Some(state) = &self.exited {
            return Ok(state.clone());
        }
        let state = self.reap_os().await?;
        self.exited = Some(state.clone());
        Ok(state)
    }

    fn terminate(&mut self) -> io::Result<()> {
        platform::terminate(self.pid)
    }

    #[cfg(unix)]
    fn force_kill(&mut self) -> io::Result<()> {
        // Once reaped the pid may belong to someone else
        let reaped = self.exited.is_some() || self.reaper.as_ref().is_some_and(|task| task.is_finished());
        if reaped {
            return Ok(());
        }
        platform::force_kill(self.pid)
    }

    #[cfg(not(unix))]
    fn force_kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            // Already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }
}
