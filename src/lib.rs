//! Transport core for the Docker/Moby Engine API.
//!
//! Connects to an engine over a unix socket, named pipe, TCP (optionally TLS)
//! or SSH; upgrades attach and exec requests into hijacked connections;
//! demultiplexes framed output; decodes progress streams; and streams build
//! contexts as tar archives.

pub mod archive;
pub mod client;
pub mod config;
pub mod demux;
pub mod hijack;
pub mod observability;
pub mod progress;
pub mod transport;

pub use client::{Agent, AgentError, AgentOptions, AgentRegistry, ProgressRequestError, RequestError, Session};
pub use config::ClientConfig;
pub use hijack::{HijackedConnection, HijackedStream, StreamMode, UpgradeError};
pub use transport::{ConnectionSpec, Platform, TransportKind};
