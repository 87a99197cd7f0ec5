//! Platform capability table.
//!
//! Which transports an agent may use is a static property of the platform
//! the caller targets, looked up here rather than detected at runtime.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Transport family of a [`crate::transport::ConnectionSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    UnixSocket,
    NamedPipe,
    Tcp,
    Tls,
    Ssh,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::UnixSocket => "unix socket",
            TransportKind::NamedPipe => "named pipe",
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tls",
            TransportKind::Ssh => "ssh",
        };
        f.write_str(name)
    }
}

/// Execution environment an agent is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// A native process with access to sockets, pipes and child processes.
    #[default]
    Native,
    /// A sandbox that can only open outbound TCP/TLS connections.
    Web,
}

impl Platform {
    /// Whether this platform can dial the given transport.
    pub const fn supports(self, kind: TransportKind) -> bool {
        match (self, kind) {
            (_, TransportKind::Tcp | TransportKind::Tls) => true,
            (Platform::Web, _) => false,
            (Platform::Native, TransportKind::UnixSocket) => cfg!(unix),
            (Platform::Native, TransportKind::NamedPipe) => cfg!(windows),
            (Platform::Native, TransportKind::Ssh) => true,
        }
    }

    /// Transports usable on this platform, in preference order.
    pub fn supported_transports(self) -> Vec<TransportKind> {
        [
            TransportKind::UnixSocket,
            TransportKind::NamedPipe,
            TransportKind::Ssh,
            TransportKind::Tls,
            TransportKind::Tcp,
        ]
        .into_iter()
        .filter(|kind| self.supports(*kind))
        .collect()
    }
}

/// Engine socket installed system-wide by the daemon package.
pub fn system_socket_default() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"\\.\pipe\docker_engine")
    } else {
        PathBuf::from("/var/run/docker.sock")
    }
}

/// Per-user engine socket used by rootless and desktop installs.
pub fn user_socket_default() -> Option<PathBuf> {
    let home = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE"))?;
    Some(
        PathBuf::from(home)
            .join(".docker")
            .join("run")
            .join("docker.sock"),
    )
}
