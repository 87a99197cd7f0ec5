use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::transport::platform::{Platform, TransportKind};

/// Failure to open a transport connection.
///
/// Scoped to the dial that produced it; the agent stays usable.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to {target} after {timeout:?}")]
    Timeout { target: String, timeout: Duration },

    #[error("TLS handshake with {server} failed: {source}")]
    TlsHandshake {
        server: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid TLS configuration: {0}")]
    TlsConfig(String),

    #[error("failed to start ssh client {program:?}: {source}")]
    SshSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{kind} transport is not supported on the {platform:?} platform")]
    Unsupported {
        kind: TransportKind,
        platform: Platform,
    },

    #[error("agent is closed")]
    Closed,
}
