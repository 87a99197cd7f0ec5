//! Frame codec for multiplexed hijacked streams.
//!
//! # Wire Format
//! ```text
//! ┌──────────┬───────────┬──────────────────────┬─────────────────────┐
//! │ byte 0   │ bytes 1-3 │ bytes 4-7            │ payload             │
//! │ streamId │ reserved  │ length (u32, BE)     │ `length` bytes      │
//! └──────────┴───────────┴──────────────────────┴─────────────────────┘
//! ```
//!
//! # Design Decisions
//! - Implemented as a `tokio_util` codec so partial reads are handled by
//!   `FramedRead`'s buffer, never by scanning for a plausible header
//! - The decoder keeps the parsed header between calls and only yields a
//!   frame once all `length` payload bytes are buffered
//! - Unknown stream ids and mid-frame EOF are hard errors

use std::io;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Stream a frame belongs to.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamId {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl TryFrom<u8> for StreamId {
    type Error = DemuxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StreamId::Stdin),
            1 => Ok(StreamId::Stdout),
            2 => Ok(StreamId::Stderr),
            other => Err(DemuxError::InvalidStreamId(other)),
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamId::Stdin => write!(f, "stdin"),
            StreamId::Stdout => write!(f, "stdout"),
            StreamId::Stderr => write!(f, "stderr"),
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream: StreamId,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(stream: StreamId, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

/// Errors that terminate demuxing.
///
/// `Clone` so a single failure can be delivered to every channel derived from
/// the same physical connection.
#[derive(Debug, Clone, Error)]
pub enum DemuxError {
    /// Header byte 0 was not 0, 1 or 2.
    #[error("protocol violation: unknown stream id {0}")]
    InvalidStreamId(u8),

    /// The connection closed partway through a header or payload.
    #[error("protocol violation: stream ended mid-frame ({received} of {expected} bytes)")]
    Truncated { expected: usize, received: usize },

    /// Declared payload length exceeds the configured cap.
    #[error("protocol violation: frame length {length} exceeds limit {limit}")]
    FrameTooLarge { length: usize, limit: usize },

    /// The physical connection failed.
    #[error("connection error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for DemuxError {
    fn from(err: io::Error) -> Self {
        DemuxError::Io(Arc::new(err))
    }
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    Payload { stream: StreamId, length: usize },
}

/// Codec for the engine's stdout/stderr framing.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: DecodeState,
    max_length: Option<usize>,
}

impl FrameCodec {
    /// Create a codec that accepts any `u32` payload length.
    pub fn new() -> Self {
        Self {
            state: DecodeState::Header,
            max_length: None,
        }
    }

    /// Create a codec that rejects frames longer than `limit` bytes.
    pub fn with_max_length(limit: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_length: Some(limit),
        }
    }

    fn decode_header(&self, src: &mut BytesMut) -> Result<Option<(StreamId, usize)>, DemuxError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let stream = StreamId::try_from(src[0])?;
        let length = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;

        if let Some(limit) = self.max_length {
            if length > limit {
                return Err(DemuxError::FrameTooLarge { length, limit });
            }
        }

        src.advance(HEADER_LEN);
        Ok(Some((stream, length)))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = DemuxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, DemuxError> {
        let (stream, length) = match self.state {
            DecodeState::Header => match self.decode_header(src)? {
                Some((stream, length)) => {
                    self.state = DecodeState::Payload { stream, length };
                    (stream, length)
                }
                None => return Ok(None),
            },
            DecodeState::Payload { stream, length } => (stream, length),
        };

        if src.len() < length {
            // Hint the buffer without trusting a huge length up front.
            src.reserve((length - src.len()).min(64 * 1024));
            return Ok(None);
        }

        let payload = src.split_to(length).freeze();
        self.state = DecodeState::Header;
        src.reserve(HEADER_LEN);

        tracing::trace!(stream = %stream, length, "Frame decoded");
        Ok(Some(Frame { stream, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, DemuxError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.state {
            DecodeState::Header if src.is_empty() => Ok(None),
            DecodeState::Header => Err(DemuxError::Truncated {
                expected: HEADER_LEN,
                received: src.len(),
            }),
            DecodeState::Payload { length, .. } => Err(DemuxError::Truncated {
                expected: length,
                received: src.len(),
            }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = DemuxError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), DemuxError> {
        let length = wire_length(frame.payload.len())?;

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.stream as u8);
        dst.put_bytes(0, 3);
        dst.put_u32(length);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

/// The header's length field for a payload of `len` bytes.
fn wire_length(len: usize) -> Result<u32, DemuxError> {
    u32::try_from(len).map_err(|_| DemuxError::FrameTooLarge {
        length: len,
        limit: u32::MAX as usize,
    })
}

/// Encode a single frame into a fresh buffer.
pub fn encode_frame(stream: StreamId, payload: &[u8]) -> Result<Bytes, DemuxError> {
    let length = wire_length(payload.len())?;
    let mut dst = BytesMut::with_capacity(HEADER_LEN + payload.len());
    dst.put_u8(stream as u8);
    dst.put_bytes(0, 3);
    dst.put_u32(length);
    dst.extend_from_slice(payload);
    Ok(dst.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8], chunk: usize) -> Result<Vec<Frame>, DemuxError> {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();

        for piece in bytes.chunks(chunk.max(1)) {
            buf.extend_from_slice(piece);
            while let Some(frame) = codec.decode(&mut buf)? {
                frames.push(frame);
            }
        }
        while let Some(frame) = codec.decode_eof(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn sample_stream() -> (Vec<u8>, Vec<Frame>) {
        let frames = vec![
            Frame::new(StreamId::Stdout, "A"),
            Frame::new(StreamId::Stderr, "x"),
            Frame::new(StreamId::Stdout, "B"),
            Frame::new(StreamId::Stdout, Bytes::new()),
            Frame::new(StreamId::Stderr, vec![0u8; 1500]),
        ];
        let mut bytes = Vec::new();
        for frame in &frames {
            bytes.extend_from_slice(&encode_frame(frame.stream, &frame.payload).unwrap());
        }
        (bytes, frames)
    }

    #[test]
    fn header_layout() {
        let encoded = encode_frame(StreamId::Stderr, b"hello").unwrap();
        assert_eq!(&encoded[..8], &[2, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&encoded[8..], b"hello");
    }

    #[test]
    fn decodes_frames_in_order() {
        let (bytes, expected) = sample_stream();
        assert_eq!(decode_all(&bytes, bytes.len()).unwrap(), expected);
    }

    #[test]
    fn one_byte_reads_match_contiguous_read() {
        let (bytes, expected) = sample_stream();
        for chunk in [1, 3, 7, 8, 9, 512] {
            assert_eq!(decode_all(&bytes, chunk).unwrap(), expected, "chunk size {chunk}");
        }
    }

    #[test]
    fn payload_is_not_emitted_until_complete() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[1u8, 0, 0, 0, 0, 0, 0, 4, b'a', b'b'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"cd");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, Frame::new(StreamId::Stdout, "abcd"));
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_stream_id_is_a_protocol_violation() {
        let bytes = [3u8, 0, 0, 0, 0, 0, 0, 1, b'z'];
        let err = decode_all(&bytes, bytes.len()).unwrap_err();
        assert!(matches!(err, DemuxError::InvalidStreamId(3)));
    }

    #[test]
    fn truncated_payload_fails_at_eof() {
        let bytes = [1u8, 0, 0, 0, 0, 0, 0, 10, b'a', b'b'];
        let err = decode_all(&bytes, 4).unwrap_err();
        assert!(matches!(
            err,
            DemuxError::Truncated {
                expected: 10,
                received: 2
            }
        ));
    }

    #[test]
    fn truncated_header_fails_at_eof() {
        let err = decode_all(&[1u8, 0, 0], 1).unwrap_err();
        assert!(matches!(err, DemuxError::Truncated { expected: 8, received: 3 }));
    }

    #[test]
    fn length_cap_is_enforced() {
        let mut codec = FrameCodec::with_max_length(4);
        let mut buf = BytesMut::from(&encode_frame(StreamId::Stdout, b"too long").unwrap()[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, DemuxError::FrameTooLarge { length: 8, limit: 4 }));
    }

    #[test]
    fn stdin_frames_decode() {
        let bytes = encode_frame(StreamId::Stdin, b"in").unwrap();
        let frames = decode_all(&bytes, 2).unwrap();
        assert_eq!(frames, vec![Frame::new(StreamId::Stdin, "in")]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_payload_length_is_rejected() {
        let too_big = u32::MAX as usize + 1;
        assert!(matches!(
            wire_length(too_big),
            Err(DemuxError::FrameTooLarge { length, .. }) if length == too_big
        ));
        assert_eq!(wire_length(u32::MAX as usize).unwrap(), u32::MAX);
    }
}
