// Capture Buffer - in-memory sink for child output

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

/// Shared, cloneable byte sink
///
/// Clones write into the same buffer, which is how `combined_output` merges
/// stdout and stderr. A bounded buffer keeps the first and last `limit` bytes
/// and records how much was dropped in between.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    limit: Option<usize>,
    prefix: Vec<u8>,
    suffix: VecDeque<u8>,
    skipped: u64,
}

impl Inner {
    fn push(&mut self, data: &[u8]) {
        let Some(limit) = self.limit else {
            self.prefix.extend_from_slice(data);
            return;
        };

        let room = limit.saturating_sub(self.prefix.len());
        let (head, rest) = data.split_at(room.min(data.len()));
        self.prefix.extend_from_slice(head);

        self.suffix.extend(rest.iter().copied());
        let overflow = self.suffix.len().saturating_sub(limit);
        if overflow > 0 {
            self.suffix.drain(..overflow);
            self.skipped += overflow as u64;
        }
    }

    fn contents(&self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        if self.skipped > 0 {
            out.extend_from_slice(format!("\n... omitting {} bytes ...\n", self.skipped).as_bytes());
        }
        out.extend(self.suffix.iter().copied());
        out
    }
}

impl CaptureBuffer {
    /// Keeps everything written
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` leading and `limit` trailing bytes
    pub fn bounded(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                limit: Some(limit),
                ..Inner::default()
            })),
        }
    }

    pub fn write_bytes(&self, data: &[u8]) {
        self.lock().push(data);
    }

    /// Snapshot of the captured bytes
    pub fn contents(&self) -> Vec<u8> {
        self.lock().contents()
    }

    /// Bytes dropped from the middle of a bounded buffer
    pub fn skipped(&self) -> u64 {
        self.lock().skipped
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking writer cannot leave the byte buffers inconsistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.write_bytes(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_unbounded_keeps_everything() {
        let mut buf = CaptureBuffer::unbounded();
        buf.write_all(b"hello ").await.unwrap();
        buf.write_all(b"world").await.unwrap();

        assert_eq!(buf.contents(), b"hello world");
        assert_eq!(buf.skipped(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_storage() {
        let buf = CaptureBuffer::unbounded();
        let mut a = buf.clone();
        let mut b = buf.clone();

        a.write_all(b"out").await.unwrap();
        b.write_all(b"err").await.unwrap();

        assert_eq!(buf.contents(), b"outerr");
    }

    #[test]
    fn test_bounded_under_limit() {
        let buf = CaptureBuffer::bounded(8);
        buf.write_bytes(b"abc");
        buf.write_bytes(b"def");

        assert_eq!(buf.contents(), b"abcdef");
    }

    #[test]
    fn test_bounded_keeps_prefix_and_suffix() {
        let buf = CaptureBuffer::bounded(4);
        buf.write_bytes(b"0123");
        buf.write_bytes(b"4567");
        buf.write_bytes(b"89ABCDEF");

        assert_eq!(buf.skipped(), 8);
        assert_eq!(
            buf.contents(),
            b"0123\n... omitting 8 bytes ...\nCDEF".to_vec()
        );
    }
}
