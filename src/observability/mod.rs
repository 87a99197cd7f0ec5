//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! transport, hijack, demux, progress, archive
//!     → tracing events (connection_id, identity, stream fields)
//!     → logging.rs (EnvFilter + fmt subscriber, when the embedding app asks)
//! ```

pub mod logging;

pub use logging::init_logging;
