//! Progress conveyor for pull, push and build.
//!
//! # Data Flow
//! ```text
//! response body (chunked NDJSON)
//!     → decode.rs (LinesCodec + serde_json, error events become Err)
//!     → EventStream
//!         ├── sinks::wait_for_completion (collect all)
//!         ├── sinks::follow / follow_in_console (side effects only)
//!         └── broadcast.rs → several of the above at once
//! ```
//!
//! # Design Decisions
//! - The engine reports failures in-band; the first error event fails the
//!   whole operation even if later events look successful
//! - Broadcast subscribers are bounded channels fed by one pump task

pub mod broadcast;
pub mod decode;
pub mod event;
pub mod sinks;

pub use broadcast::{broadcast, Subscriber, DEFAULT_SUBSCRIBER_CAPACITY};
pub use decode::{decode_events, parse_event, EventResult, EventStream, ProgressError};
pub use event::{ErrorDetail, ProgressDetail, ProgressEvent};
pub use sinks::{
    collect_and_follow, collect_and_follow_in_console, collect_and_follow_with, follow, follow_in_console, follow_into,
    wait_for_completion,
};
