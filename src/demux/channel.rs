//! Logical channels derived from a hijacked connection.
//!
//! The background task that owns the physical socket fills bounded buffers;
//! channels only hold the receiving end of those buffers plus a shared handle
//! that aborts the task once every channel is gone.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::demux::frame::DemuxError;

/// Item yielded by output channels.
pub type Chunk = Result<Bytes, DemuxError>;

/// Aborts the background tasks feeding a set of channels when dropped.
#[derive(Debug, Default)]
pub(crate) struct ReaderTasks {
    handles: Vec<AbortHandle>,
}

impl ReaderTasks {
    pub(crate) fn new(handles: Vec<AbortHandle>) -> Arc<Self> {
        Arc::new(Self { handles })
    }
}

impl Drop for ReaderTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
        tracing::trace!(tasks = self.handles.len(), "Demux reader tasks released");
    }
}

/// An independent stdout or stderr byte stream.
///
/// Yields payload chunks in arrival order; ends when the connection closes
/// cleanly and yields one `Err` if demuxing fails.
#[derive(Debug)]
pub struct OutputStream {
    rx: Option<mpsc::Receiver<Chunk>>,
    _tasks: Arc<ReaderTasks>,
}

impl OutputStream {
    pub(crate) fn new(rx: mpsc::Receiver<Chunk>, tasks: Arc<ReaderTasks>) -> Self {
        Self {
            rx: Some(rx),
            _tasks: tasks,
        }
    }

    /// A stream that is already finished, for channels that were not requested.
    pub(crate) fn closed(tasks: Arc<ReaderTasks>) -> Self {
        Self {
            rx: None,
            _tasks: tasks,
        }
    }

    /// Receive the next chunk.
    pub async fn recv(&mut self) -> Option<Chunk> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl Stream for OutputStream {
    type Item = Chunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Chunk>> {
        match self.rx.as_mut() {
            Some(rx) => rx.poll_recv(cx),
            None => Poll::Ready(None),
        }
    }
}

/// Write side of a session. Bytes are sent to the daemon unframed.
pub struct StdinSink {
    inner: Option<Pin<Box<dyn AsyncWrite + Send>>>,
    _tasks: Arc<ReaderTasks>,
}

impl StdinSink {
    pub(crate) fn new<W>(writer: W, tasks: Arc<ReaderTasks>) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            inner: Some(Box::pin(writer)),
            _tasks: tasks,
        }
    }

    /// A sink for sessions that were opened without stdin.
    pub(crate) fn detached(tasks: Arc<ReaderTasks>) -> Self {
        Self {
            inner: None,
            _tasks: tasks,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.inner.is_some()
    }

    fn not_attached() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "stdin is not attached to this session")
    }
}

impl std::fmt::Debug for StdinSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdinSink")
            .field("attached", &self.inner.is_some())
            .finish()
    }
}

impl AsyncWrite for StdinSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.inner.as_mut() {
            Some(inner) => inner.as_mut().poll_write(cx, buf),
            None => Poll::Ready(Err(Self::not_attached())),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => inner.as_mut().poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.inner.as_mut() {
            Some(inner) => inner.as_mut().poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

/// Composite stdin/stdout/stderr handle.
///
/// Produced by [`crate::demux::fan`] from one framed connection or by
/// [`crate::demux::pack`] from separately attached raw connections; callers
/// cannot tell which.
#[derive(Debug)]
pub struct Multiplexed {
    pub stdin: StdinSink,
    pub stdout: OutputStream,
    pub stderr: OutputStream,
}

impl Multiplexed {
    pub fn into_parts(self) -> (StdinSink, OutputStream, OutputStream) {
        (self.stdin, self.stdout, self.stderr)
    }
}
