//! Collapse stdout/stderr pairs when one side is statically absent.
//!
//! # Design Decisions
//! - Presence is tracked in the type: [`Present`] wraps a value, [`Absent`]
//!   marks a channel the caller never requested
//! - [`Compress`] has one impl per presence combination, so a stdout-only
//!   read yields a bare value instead of a pair with an unused slot
//! - [`collect`] and [`forward`] are the consumers built on top

use std::future::Future;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::demux::channel::{Multiplexed, OutputStream};
use crate::demux::frame::DemuxError;

/// A channel that was requested and produced a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Present<T>(pub T);

/// A channel that was not requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Absent;

/// Results for a stdout/stderr pair before compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxOutput<O, E> {
    pub stdout: O,
    pub stderr: E,
}

/// Drop unused slots from a [`DemuxOutput`].
pub trait Compress {
    type Output;

    fn compress(self) -> Self::Output;
}

impl<A, B> Compress for DemuxOutput<Present<A>, Present<B>> {
    type Output = (A, B);

    fn compress(self) -> (A, B) {
        (self.stdout.0, self.stderr.0)
    }
}

impl<A> Compress for DemuxOutput<Present<A>, Absent> {
    type Output = A;

    fn compress(self) -> A {
        self.stdout.0
    }
}

impl<B> Compress for DemuxOutput<Absent, Present<B>> {
    type Output = B;

    fn compress(self) -> B {
        self.stderr.0
    }
}

impl Compress for DemuxOutput<Absent, Absent> {
    type Output = ();

    fn compress(self) {}
}

/// Something that can be drained into a presence-tagged value.
pub trait Collect: Send {
    type Collected: Send;

    fn collect_all(self) -> impl Future<Output = Result<Self::Collected, DemuxError>> + Send;
}

impl Collect for OutputStream {
    type Collected = Present<Bytes>;

    async fn collect_all(mut self) -> Result<Present<Bytes>, DemuxError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Present(buf.freeze()))
    }
}

impl Collect for Absent {
    type Collected = Absent;

    async fn collect_all(self) -> Result<Absent, DemuxError> {
        Ok(Absent)
    }
}

/// Drain the requested channels concurrently and return their compressed
/// contents: `(stdout, stderr)`, a single `Bytes`, or `()`.
pub async fn collect<O, E>(
    stdout: O,
    stderr: E,
) -> Result<<DemuxOutput<O::Collected, E::Collected> as Compress>::Output, DemuxError>
where
    O: Collect,
    E: Collect,
    DemuxOutput<O::Collected, E::Collected>: Compress,
{
    let (stdout, stderr) = tokio::try_join!(stdout.collect_all(), stderr.collect_all())?;
    Ok(DemuxOutput { stdout, stderr }.compress())
}

/// Copy `stdin` into the session and drain stdout/stderr into the given
/// writers until both output channels finish.
///
/// Stdin runs alongside the outputs; its end or failure never ends the
/// session on its own, since the remote process decides when it exits.
pub async fn forward<R, O, E>(
    session: Multiplexed,
    stdin: Option<R>,
    stdout: O,
    stderr: E,
) -> Result<(), DemuxError>
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let (mut sink, out, err) = session.into_parts();

    let outputs = async {
        tokio::try_join!(drain_into(out, stdout), drain_into(err, stderr)).map(|_| ())
    };
    tokio::pin!(outputs);

    let Some(mut source) = stdin else {
        return outputs.await;
    };

    let input = async {
        tokio::io::copy(&mut source, &mut sink).await?;
        sink.shutdown().await
    };
    tokio::pin!(input);

    let mut input_done = false;
    loop {
        tokio::select! {
            result = &mut outputs => return result,
            result = &mut input, if !input_done => {
                input_done = true;
                match result {
                    Ok(()) => tracing::debug!("Stdin forwarding finished"),
                    Err(e) => tracing::debug!(error = %e, "Stdin forwarding stopped"),
                }
            }
        }
    }
}

async fn drain_into<W>(mut source: OutputStream, mut sink: W) -> Result<(), DemuxError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = source.next().await {
        sink.write_all(&chunk?).await?;
    }
    sink.flush().await?;
    Ok(())
}
