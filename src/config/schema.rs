//! Configuration schema definitions.
//!
//! Every section has defaults so a config file only needs the fields it
//! changes; an empty file connects to the platform's system socket.

use serde::{Deserialize, Serialize};

use crate::demux::DEFAULT_BUFFER_CAPACITY;
use crate::progress::DEFAULT_SUBSCRIBER_CAPACITY;
use crate::transport::{ConnectionSpec, SshOptions};

/// Root configuration for an agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Engine endpoint.
    pub connection: ConnectionSpec,

    /// Agent identity; must be unique within a registry.
    pub identity: String,

    /// Optional API version pin, e.g. "1.45".
    pub api_version: Option<String>,

    pub timeouts: TimeoutConfig,

    pub demux: DemuxConfig,

    pub progress: ProgressConfig,

    pub ssh: SshOptions,

    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionSpec::default(),
            identity: "default".to_string(),
            api_version: None,
            timeouts: TimeoutConfig::default(),
            demux: DemuxConfig::default(),
            progress: ProgressConfig::default(),
            ssh: SshOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds, including TLS and SSH.
    pub connect_secs: u64,

    /// Time to wait for a response head (or upgrade answer) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 60,
        }
    }
}

/// Demultiplexer settings for attached sessions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Chunks buffered per output channel before the reader blocks.
    pub buffer_capacity: usize,

    /// Largest accepted frame payload. Unlimited when unset.
    pub max_frame_bytes: Option<usize>,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            max_frame_bytes: None,
        }
    }
}

/// Progress stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Events buffered per broadcast subscriber.
    pub buffer_capacity: usize,

    /// Longest accepted event line. Unlimited when unset.
    pub max_line_bytes: Option<usize>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            max_line_bytes: None,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "moby_transport=info".to_string(),
        }
    }
}
