//! Present separately attached raw connections as one multiplexed handle.
//!
//! Attaching with only `stdin`, only `stdout` or only `stderr` requested
//! yields one raw connection per channel. [`pack`] wraps up to three such
//! connections in the same [`Multiplexed`] shape that [`crate::demux::fan`]
//! produces, so downstream code does not care how the channels were obtained.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::demux::channel::{Chunk, Multiplexed, OutputStream, ReaderTasks, StdinSink};
use crate::demux::fan::DEFAULT_BUFFER_CAPACITY;
use crate::demux::frame::DemuxError;
use crate::hijack::RawStream;

/// Independently obtained channels to combine.
#[derive(Debug, Default)]
pub struct PackInput {
    pub stdin: Option<RawStream>,
    pub stdout: Option<RawStream>,
    pub stderr: Option<RawStream>,
}

/// Combine channels using the default buffer capacity.
pub fn pack(input: PackInput) -> Multiplexed {
    pack_with_capacity(input, DEFAULT_BUFFER_CAPACITY)
}

/// Combine channels, buffering up to `capacity` chunks per output.
pub fn pack_with_capacity(input: PackInput, capacity: usize) -> Multiplexed {
    let capacity = capacity.max(1);
    let mut handles = Vec::with_capacity(2);
    let mut receivers = [None, None];

    for (slot, source) in [input.stdout, input.stderr].into_iter().enumerate() {
        if let Some(source) = source {
            let (tx, rx) = mpsc::channel(capacity);
            let task = tokio::spawn(pump(source, tx));
            handles.push(task.abort_handle());
            receivers[slot] = Some(rx);
        }
    }

    let tasks = ReaderTasks::new(handles);
    let [stdout_rx, stderr_rx] = receivers;
    let output = |rx: Option<mpsc::Receiver<Chunk>>| match rx {
        Some(rx) => OutputStream::new(rx, tasks.clone()),
        None => OutputStream::closed(tasks.clone()),
    };

    let stdout = output(stdout_rx);
    let stderr = output(stderr_rx);
    let stdin = match input.stdin {
        Some(raw) => StdinSink::new(raw, tasks),
        None => StdinSink::detached(tasks),
    };

    Multiplexed {
        stdin,
        stdout,
        stderr,
    }
}

async fn pump(source: RawStream, tx: mpsc::Sender<Chunk>) {
    let mut reader = ReaderStream::new(source);

    while let Some(result) = reader.next().await {
        let chunk = result.map_err(DemuxError::from);
        let failed = chunk.is_err();
        if tx.send(chunk).await.is_err() || failed {
            break;
        }
    }

    tracing::trace!("Packed channel finished");
}
