//! Split one framed connection into stdin/stdout/stderr channels.
//!
//! # Data Flow
//! ```text
//! physical socket ──read half──▶ FramedRead<FrameCodec> ──▶ router task
//!                                                   ├──▶ stdout buffer (bounded)
//!                                                   └──▶ stderr buffer (bounded)
//! stdin sink ──write half──▶ physical socket (unframed)
//! ```
//!
//! A full buffer blocks the router, which stops reading the socket: the
//! slowest consumer throttles the connection instead of losing bytes.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use crate::demux::channel::{Chunk, Multiplexed, OutputStream, ReaderTasks, StdinSink};
use crate::demux::frame::{DemuxError, FrameCodec, StreamId};
use crate::hijack::FramedStream;

/// Default per-channel buffer capacity, in chunks.
pub const DEFAULT_BUFFER_CAPACITY: usize = 16;

/// Options for [`fan_with`].
#[derive(Debug, Clone, Copy)]
pub struct FanOptions {
    /// Chunks each of stdout/stderr may hold before the reader blocks.
    pub buffer_capacity: usize,
    /// Optional cap on a single frame's payload length.
    pub max_frame_bytes: Option<usize>,
}

impl Default for FanOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_frame_bytes: None,
        }
    }
}

/// Split a framed connection using default options.
pub fn fan(stream: FramedStream) -> Multiplexed {
    fan_with(stream, FanOptions::default())
}

/// Split a framed connection.
///
/// Must be called from within a Tokio runtime; the frame reader is spawned
/// immediately and owns the read side of the socket from then on.
pub fn fan_with(stream: FramedStream, options: FanOptions) -> Multiplexed {
    let capacity = options.buffer_capacity.max(1);
    let (read, write) = tokio::io::split(stream.into_inner());

    let codec = match options.max_frame_bytes {
        Some(limit) => FrameCodec::with_max_length(limit),
        None => FrameCodec::new(),
    };

    let (stdout_tx, stdout_rx) = mpsc::channel(capacity);
    let (stderr_tx, stderr_rx) = mpsc::channel(capacity);

    let task = tokio::spawn(route_frames(
        FramedRead::new(read, codec),
        stdout_tx,
        stderr_tx,
    ));
    let tasks = ReaderTasks::new(vec![task.abort_handle()]);

    Multiplexed {
        stdin: StdinSink::new(write, tasks.clone()),
        stdout: OutputStream::new(stdout_rx, tasks.clone()),
        stderr: OutputStream::new(stderr_rx, tasks),
    }
}

/// Read frames until the connection ends, delivering each payload to the
/// channel named by its header.
async fn route_frames<R>(
    mut frames: FramedRead<R, FrameCodec>,
    stdout: mpsc::Sender<Chunk>,
    stderr: mpsc::Sender<Chunk>,
) where
    R: AsyncRead + Unpin,
{
    let mut stdout = Some(stdout);
    let mut stderr = Some(stderr);

    while let Some(result) = frames.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "Demux terminated");
                broadcast_error(&e, stdout.as_ref(), stderr.as_ref()).await;
                return;
            }
        };

        if frame.payload.is_empty() {
            continue;
        }

        let slot = match frame.stream {
            StreamId::Stdout => &mut stdout,
            StreamId::Stderr => &mut stderr,
            StreamId::Stdin => {
                tracing::trace!(length = frame.payload.len(), "Discarding stdin frame from daemon");
                continue;
            }
        };

        if let Some(tx) = slot.as_ref() {
            if tx.send(Ok(frame.payload)).await.is_err() {
                tracing::trace!(stream = %frame.stream, "Consumer dropped, discarding further output");
                *slot = None;
            }
        }
    }

    tracing::debug!("Demux reached end of stream");
}

async fn broadcast_error(
    err: &DemuxError,
    stdout: Option<&mpsc::Sender<Chunk>>,
    stderr: Option<&mpsc::Sender<Chunk>>,
) {
    for tx in [stdout, stderr].into_iter().flatten() {
        let _ = tx.send(Err(err.clone())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demux::frame::encode_frame;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn drain(stream: &mut OutputStream) -> Result<Vec<Bytes>, DemuxError> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.recv().await {
            out.push(chunk?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let (client, mut daemon) = tokio::io::duplex(1024);
        let mux = fan(FramedStream::new(client));
        let (_stdin, mut stdout, mut stderr) = mux.into_parts();

        daemon.write_all(&encode_frame(StreamId::Stdout, b"A").unwrap()).await.unwrap();
        daemon.write_all(&encode_frame(StreamId::Stderr, b"x").unwrap()).await.unwrap();
        daemon.write_all(&encode_frame(StreamId::Stdout, b"B").unwrap()).await.unwrap();
        drop(daemon);

        // Read stderr first to show ordering between channels does not matter.
        assert_eq!(drain(&mut stderr).await.unwrap(), vec![Bytes::from("x")]);
        assert_eq!(
            drain(&mut stdout).await.unwrap(),
            vec![Bytes::from("A"), Bytes::from("B")]
        );
    }

    #[tokio::test]
    async fn byte_at_a_time_delivery() {
        let (client, mut daemon) = tokio::io::duplex(1);
        let mux = fan(FramedStream::new(client));
        let (_stdin, mut stdout, mut stderr) = mux.into_parts();

        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(StreamId::Stdout, b"hello ").unwrap());
        wire.extend_from_slice(&encode_frame(StreamId::Stderr, b"oops").unwrap());
        wire.extend_from_slice(&encode_frame(StreamId::Stdout, b"world").unwrap());

        let writer = tokio::spawn(async move {
            for byte in wire {
                daemon.write_all(&[byte]).await.unwrap();
            }
        });

        let (out, err) = tokio::join!(drain(&mut stdout), drain(&mut stderr));
        writer.await.unwrap();
        assert_eq!(out.unwrap().concat(), b"hello world");
        assert_eq!(err.unwrap().concat(), b"oops");
    }

    #[tokio::test]
    async fn invalid_stream_id_fails_both_channels() {
        let (client, mut daemon) = tokio::io::duplex(1024);
        let mux = fan(FramedStream::new(client));
        let (_stdin, mut stdout, mut stderr) = mux.into_parts();

        daemon.write_all(&encode_frame(StreamId::Stdout, b"ok").unwrap()).await.unwrap();
        daemon.write_all(&[3, 0, 0, 0, 0, 0, 0, 1, b'?']).await.unwrap();

        assert_eq!(stdout.recv().await.unwrap().unwrap(), Bytes::from("ok"));
        assert!(matches!(
            stdout.recv().await,
            Some(Err(DemuxError::InvalidStreamId(3)))
        ));
        assert!(matches!(
            stderr.recv().await,
            Some(Err(DemuxError::InvalidStreamId(3)))
        ));
        assert!(stdout.recv().await.is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_reported() {
        let (client, mut daemon) = tokio::io::duplex(1024);
        let mux = fan(FramedStream::new(client));
        let (_stdin, mut stdout, _stderr) = mux.into_parts();

        daemon.write_all(&[1, 0, 0, 0, 0, 0, 0, 9, b'a']).await.unwrap();
        drop(daemon);

        assert!(matches!(
            stdout.recv().await,
            Some(Err(DemuxError::Truncated { expected: 9, received: 1 }))
        ));
    }

    #[tokio::test]
    async fn stdin_is_written_unframed() {
        let (client, mut daemon) = tokio::io::duplex(1024);
        let mux = fan(FramedStream::new(client));
        let (mut stdin, _stdout, _stderr) = mux.into_parts();

        stdin.write_all(b"echo hi\n").await.unwrap();
        stdin.flush().await.unwrap();

        let mut buf = [0u8; 8];
        daemon.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"echo hi\n");
    }

    #[tokio::test]
    async fn slow_consumer_applies_backpressure_without_loss() {
        let (client, mut daemon) = tokio::io::duplex(64);
        let mux = fan_with(
            FramedStream::new(client),
            FanOptions {
                buffer_capacity: 1,
                max_frame_bytes: None,
            },
        );
        let (_stdin, mut stdout, mut stderr) = mux.into_parts();

        let writer = tokio::spawn(async move {
            for i in 0..50u8 {
                daemon.write_all(&encode_frame(StreamId::Stderr, &[i]).unwrap()).await.unwrap();
                daemon.write_all(&encode_frame(StreamId::Stdout, &[i]).unwrap()).await.unwrap();
            }
        });

        // Drain stdout only for a while; stderr is full so the reader stalls.
        let first = stdout.recv().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(&[0]));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!writer.is_finished());

        let (out, err) = tokio::join!(drain(&mut stdout), drain(&mut stderr));
        writer.await.unwrap();
        assert_eq!(out.unwrap().len(), 49);
        assert_eq!(err.unwrap().concat(), (0..50u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn dropping_every_channel_releases_the_socket() {
        let (client, mut daemon) = tokio::io::duplex(64);
        let mux = fan(FramedStream::new(client));
        drop(mux);

        // Once the reader task is aborted the client half is dropped and the
        // daemon side observes EOF.
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), daemon.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
