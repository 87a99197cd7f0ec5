//! Dialed byte stream shared by every transport.
//!
//! Each stream is bound to its agent's shutdown token: once the agent closes,
//! every read or write fails with `ConnectionAborted`, including reads already
//! parked inside a hijacked session's frame reader.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::transport::ssh::SshStream;
use crate::transport::tracker::{ConnectionGuard, ConnectionId};

pub(crate) enum Inner {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    NamedPipe(tokio::net::windows::named_pipe::NamedPipeClient),
    Ssh(SshStream),
}

/// An open connection to the engine.
pub struct TransportStream {
    inner: Inner,
    guard: ConnectionGuard,
    shutdown: CancellationToken,
    // One waker slot per direction: after a split, reads and writes are
    // polled from different tasks.
    read_cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    write_cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

#[derive(Clone, Copy)]
enum Direction {
    Read,
    Write,
}

impl TransportStream {
    pub(crate) fn new(inner: Inner, guard: ConnectionGuard, shutdown: CancellationToken) -> Self {
        Self {
            inner,
            guard,
            read_cancelled: Box::pin(shutdown.clone().cancelled_owned()),
            write_cancelled: Box::pin(shutdown.clone().cancelled_owned()),
            shutdown,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    fn poll_aborted(&mut self, direction: Direction, cx: &mut Context<'_>) -> Option<io::Error> {
        let cancelled = match direction {
            Direction::Read => &mut self.read_cancelled,
            Direction::Write => &mut self.write_cancelled,
        };
        if self.shutdown.is_cancelled() || cancelled.as_mut().poll(cx).is_ready() {
            return Some(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "agent closed the connection",
            ));
        }
        None
    }
}

impl std::fmt::Debug for TransportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            Inner::Tcp(_) => "tcp",
            Inner::Tls(_) => "tls",
            #[cfg(unix)]
            Inner::Unix(_) => "unix",
            #[cfg(windows)]
            Inner::NamedPipe(_) => "npipe",
            Inner::Ssh(_) => "ssh",
        };
        f.debug_struct("TransportStream")
            .field("id", &self.guard.id())
            .field("kind", &kind)
            .finish()
    }
}

macro_rules! dispatch {
    ($inner:expr, $stream:ident => $body:expr) => {
        match $inner {
            Inner::Tcp($stream) => $body,
            Inner::Tls($stream) => $body,
            #[cfg(unix)]
            Inner::Unix($stream) => $body,
            #[cfg(windows)]
            Inner::NamedPipe($stream) => $body,
            Inner::Ssh($stream) => $body,
        }
    };
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(err) = this.poll_aborted(Direction::Read, cx) {
            return Poll::Ready(Err(err));
        }
        dispatch!(&mut this.inner, s => Pin::new(s).poll_read(cx, buf))
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Some(err) = this.poll_aborted(Direction::Write, cx) {
            return Poll::Ready(Err(err));
        }
        dispatch!(&mut this.inner, s => Pin::new(s).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Some(err) = this.poll_aborted(Direction::Write, cx) {
            return Poll::Ready(Err(err));
        }
        dispatch!(&mut this.inner, s => Pin::new(s).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        dispatch!(&mut this.inner, s => Pin::new(s).poll_shutdown(cx))
    }
}

impl hyper::rt::Read for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let mut io = TokioIo::new(self.get_mut());
        hyper::rt::Read::poll_read(Pin::new(&mut io), cx, buf)
    }
}

impl hyper::rt::Write for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(self, cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(self, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(self, cx)
    }
}

impl Connection for TransportStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tracker::ConnectionTracker;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn connected_pair(token: CancellationToken) -> (TransportStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let tracker = ConnectionTracker::new();
        let stream = TransportStream::new(Inner::Tcp(client.unwrap()), tracker.track(), token);
        (stream, server.unwrap().0)
    }

    #[tokio::test]
    async fn passes_bytes_through() {
        let (mut stream, mut peer) = connected_pair(CancellationToken::new()).await;
        stream.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        peer.write_all(b"pong").await.unwrap();
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn cancellation_fails_a_pending_read() {
        let token = CancellationToken::new();
        let (mut stream, _peer) = connected_pair(token.clone()).await;

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 1];
            stream.read(&mut buf).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn cancellation_wakes_reader_after_writes_from_another_task() {
        let token = CancellationToken::new();
        let (stream, mut peer) = connected_pair(token.clone()).await;
        let (mut read, mut write) = tokio::io::split(stream);

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 1];
            read.read(&mut buf).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The writer polls last before cancellation.
        write.write_all(b"ls\n").await.unwrap();
        write.flush().await.unwrap();
        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).await.unwrap();

        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), reader)
            .await
            .expect("reader was not woken by cancellation")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);
    }

    #[tokio::test]
    async fn writes_fail_after_cancellation() {
        let token = CancellationToken::new();
        let (mut stream, _peer) = connected_pair(token.clone()).await;
        token.cancel();
        let err = stream.write_all(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
