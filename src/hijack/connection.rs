//! Hijacked connection handles.
//!
//! # Responsibilities
//! - Own the upgraded duplex byte channel exclusively
//! - Carry the raw/framed mode fixed at upgrade time
//! - Hand out exactly one typed view per connection

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};

/// Content type the engine uses for TTY sessions.
pub const RAW_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.raw-stream";

/// Content type the engine uses for non-TTY sessions.
pub const MULTIPLEXED_STREAM_CONTENT_TYPE: &str = "application/vnd.docker.multiplexed-stream";

/// Any duplex byte channel a hijack can produce.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed duplex channel.
pub type BoxedDuplex = Box<dyn Duplex>;

/// How bytes on a hijacked connection are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// TTY allocated: one undifferentiated byte stream.
    Raw,
    /// No TTY: stdout/stderr interleaved as 8-byte-header frames.
    Framed,
}

impl StreamMode {
    /// Mode implied by the TTY flag used when the container/exec was created.
    pub fn from_tty(tty: bool) -> Self {
        if tty {
            StreamMode::Raw
        } else {
            StreamMode::Framed
        }
    }

    /// Mode advertised by an upgrade response's content type, if recognised.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type.split(';').next().unwrap_or_default().trim();
        match essence {
            RAW_STREAM_CONTENT_TYPE => Some(StreamMode::Raw),
            MULTIPLEXED_STREAM_CONTENT_TYPE => Some(StreamMode::Framed),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            StreamMode::Raw => RAW_STREAM_CONTENT_TYPE,
            StreamMode::Framed => MULTIPLEXED_STREAM_CONTENT_TYPE,
        }
    }
}

/// A connection taken over from HTTP after a successful upgrade.
///
/// The mode is immutable. Use [`HijackedConnection::into_stream`] to obtain the
/// matching typed view; only a [`FramedStream`] can be demultiplexed.
pub struct HijackedConnection {
    io: BoxedDuplex,
    mode: StreamMode,
}

impl HijackedConnection {
    pub fn new<T: Duplex>(io: T, mode: StreamMode) -> Self {
        Self {
            io: Box::new(io),
            mode,
        }
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Consume the connection into its mode-specific view.
    pub fn into_stream(self) -> HijackedStream {
        match self.mode {
            StreamMode::Raw => HijackedStream::Raw(RawStream { io: self.io }),
            StreamMode::Framed => HijackedStream::Framed(FramedStream { io: self.io }),
        }
    }
}

impl std::fmt::Debug for HijackedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HijackedConnection")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Mode-specific view of a hijacked connection.
#[derive(Debug)]
pub enum HijackedStream {
    Raw(RawStream),
    Framed(FramedStream),
}

/// A TTY session: reads yield the combined terminal output, writes go to stdin.
pub struct RawStream {
    io: BoxedDuplex,
}

impl RawStream {
    pub fn new<T: Duplex>(io: T) -> Self {
        Self { io: Box::new(io) }
    }

    /// Split into independently owned read and write halves.
    pub fn into_split(self) -> (ReadHalf<BoxedDuplex>, WriteHalf<BoxedDuplex>) {
        tokio::io::split(self.io)
    }

    pub(crate) fn into_inner(self) -> BoxedDuplex {
        self.io
    }
}

impl std::fmt::Debug for RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStream").finish_non_exhaustive()
    }
}

impl AsyncRead for RawStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for RawStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// A non-TTY session carrying framed stdout/stderr.
///
/// Deliberately exposes no `AsyncRead`: the only way to read it is through
/// [`crate::demux::fan`], which takes exclusive ownership of the socket.
pub struct FramedStream {
    io: BoxedDuplex,
}

impl FramedStream {
    pub fn new<T: Duplex>(io: T) -> Self {
        Self { io: Box::new(io) }
    }

    pub(crate) fn into_inner(self) -> BoxedDuplex {
        self.io
    }
}

impl std::fmt::Debug for FramedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedStream").finish_non_exhaustive()
    }
}
