//! Hijack upgrader.
//!
//! Interactive endpoints (`attach`, `exec/{id}/start`) answer with
//! `101 Switching Protocols`, after which the socket carries raw bytes with
//! no HTTP framing. This module performs that exchange and hands back the
//! socket tagged with its layout.
//!
//! # Design Decisions
//! - Only `101` counts as success; anything else closes the socket before
//!   the error is returned
//! - The caller's TTY flag decides raw vs framed; a contradicting engine
//!   content type is an error
//! - Raw and framed sessions are different types, so a raw socket cannot be
//!   handed to the frame decoder

pub mod connection;
pub mod upgrade;

pub use connection::{
    BoxedDuplex, Duplex, FramedStream, HijackedConnection, HijackedStream, RawStream, StreamMode,
    MULTIPLEXED_STREAM_CONTENT_TYPE, RAW_STREAM_CONTENT_TYPE,
};
pub use upgrade::{upgrade, upgrade_inferred, UpgradeError, UPGRADE_PROTOCOL};
