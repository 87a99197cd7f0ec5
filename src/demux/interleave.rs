//! Merge stdout and stderr into a single stream in arrival order.

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};

use crate::demux::channel::OutputStream;
use crate::demux::frame::{DemuxError, StreamId};

/// A chunk labelled with the channel it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tagged {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl Tagged {
    pub fn stream(&self) -> StreamId {
        match self {
            Tagged::Stdout(_) => StreamId::Stdout,
            Tagged::Stderr(_) => StreamId::Stderr,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        match self {
            Tagged::Stdout(bytes) | Tagged::Stderr(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            Tagged::Stdout(bytes) | Tagged::Stderr(bytes) => bytes,
        }
    }
}

/// Merge two output channels into one untagged byte stream.
///
/// Each source keeps its own order; how the two sources interleave depends
/// only on when their chunks arrive.
pub fn interleave(
    stdout: OutputStream,
    stderr: OutputStream,
) -> impl Stream<Item = Result<Bytes, DemuxError>> + Send + Unpin {
    interleave_tagged(stdout, stderr).map(|item| item.map(Tagged::into_bytes))
}

/// Merge two output channels, labelling every chunk with its origin.
pub fn interleave_tagged(
    stdout: OutputStream,
    stderr: OutputStream,
) -> impl Stream<Item = Result<Tagged, DemuxError>> + Send + Unpin {
    stream::select(
        stdout.map(|chunk| chunk.map(Tagged::Stdout)),
        stderr.map(|chunk| chunk.map(Tagged::Stderr)),
    )
}
