//! Demux engine for hijacked container sessions.
//!
//! # Data Flow
//! ```text
//! FramedStream ──▶ fan ──▶ Multiplexed { stdin, stdout, stderr }
//! RawStream x3 ──▶ pack ─┘        │
//!                                 ├──▶ interleave / interleave_tagged
//!                                 ├──▶ collect (compressed result)
//!                                 └──▶ forward (copy to/from local I/O)
//! ```
//!
//! # Design Decisions
//! - One background task owns the physical socket; channels only hold
//!   buffer handles, so concurrent reads can never split a frame
//! - Buffers are bounded; a slow consumer blocks the reader instead of
//!   losing data
//! - A decode failure is delivered to every channel of the connection
//! - Dropping every channel aborts the reader and closes the socket

pub mod channel;
pub mod compress;
pub mod fan;
pub mod frame;
pub mod interleave;
pub mod pack;

pub use channel::{Chunk, Multiplexed, OutputStream, StdinSink};
pub use compress::{collect, forward, Absent, Collect, Compress, DemuxOutput, Present};
pub use fan::{fan, fan_with, FanOptions, DEFAULT_BUFFER_CAPACITY};
pub use frame::{encode_frame, DemuxError, Frame, FrameCodec, StreamId, HEADER_LEN};
pub use interleave::{interleave, interleave_tagged, Tagged};
pub use pack::{pack, pack_with_capacity, PackInput};
