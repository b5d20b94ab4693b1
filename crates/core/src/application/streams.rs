// Stream copying between configured sources/sinks and a running child

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::domain::{BoxedReader, BoxedWriter, OutputSink};
use crate::error::{ExecError, Result};

type CopyTask = JoinHandle<io::Result<()>>;

/// Copy tasks that `wait` must drain before reporting
#[derive(Debug, Default)]
pub struct Copiers {
    tasks: VecDeque<CopyTask>,
    first_err: Option<ExecError>,
}

impl Copiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: CopyTask) {
        self.tasks.push_back(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for every copier; the first failure wins
    ///
    /// With a non-zero `wait_delay` the copiers get that long after process
    /// exit before they are aborted and `WaitDelayExpired` is returned.
    /// Cancel safe: finished copiers are removed as they complete.
    pub async fn join(&mut self, wait_delay: Duration) -> Result<()> {
        let tasks = &mut self.tasks;
        let first_err = &mut self.first_err;
        let drain = async move {
            while let Some(task) = tasks.front_mut() {
                let joined = task.await;
                tasks.pop_front();
                let outcome = match joined {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => ExecError::from(e),
                    Err(join_err) => ExecError::from(io::Error::other(join_err.to_string())),
                };
                first_err.get_or_insert(outcome);
            }
        };

        if wait_delay.is_zero() {
            drain.await;
        } else if timeout(wait_delay, drain).await.is_err() {
            for task in self.tasks.drain(..) {
                task.abort();
            }
            return Err(ExecError::WaitDelayExpired(wait_delay));
        }

        match self.first_err.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Copy `source` into the child's stdin, then close it
///
/// A child that exits without reading all of its input is not an error.
pub fn copy_into_child<W>(mut source: BoxedReader, mut child_stdin: W) -> CopyTask
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let copied = tokio::io::copy(&mut source, &mut child_stdin).await;
        let closed = child_stdin.shutdown().await;
        match copied.and(closed) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e),
        }
    })
}

/// Copy a child's output stream into `sink`
pub fn copy_from_child<R>(mut child_out: R, mut sink: BoxedWriter) -> CopyTask
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let bytes = tokio::io::copy(&mut child_out, &mut sink).await?;
        sink.flush().await?;
        debug!(bytes = %bytes, "Child output stream drained");
        Ok(())
    })
}

/// Writer behind a sink, and whether `wait` should join its copier
///
/// Pipe copiers belong to the caller's end of the pipe and are not joined.
/// Returns `None` for sinks that need no copier (null, inherit, file).
pub fn sink_writer(sink: OutputSink) -> Option<(BoxedWriter, bool)> {
    match sink {
        OutputSink::Null | OutputSink::Inherit | OutputSink::File(_) => None,
        OutputSink::Writer(w) => Some((w, true)),
        OutputSink::Capture(buf) => Some((Box::new(buf), true)),
        OutputSink::Pipe(p) => Some((Box::new(p), false)),
    }
}
