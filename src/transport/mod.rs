//! Transport resolver.
//!
//! # Data Flow
//! ```text
//! ConnectionSpec (config / DOCKER_HOST)
//!     → platform.rs (capability check for the caller's platform)
//!     → dialer.rs (one resolver per spec variant)
//!         ├── unix socket / named pipe
//!         ├── tcp → tls.rs (optional handshake)
//!         └── ssh.rs (ssh child running `docker system dial-stdio`)
//!     → stream.rs (tracked, cancellable byte stream)
//!     → HTTP client or hijack upgrader
//! ```
//!
//! # Design Decisions
//! - The spec is a tagged enum; no runtime probing for transports
//! - Every dialed stream carries a tracker guard and the agent's shutdown
//!   token, so closing the agent fails pending I/O on all of its sockets
//! - Dial errors are scoped to the dial; the agent stays usable

pub mod connection_spec;
pub mod dialer;
pub mod error;
pub mod platform;
pub mod ssh;
pub mod stream;
pub mod tls;
pub mod tracker;

pub use connection_spec::{ConnectionSpec, SpecError, SshAuth, TlsSpec};
pub use dialer::{Dialer, DialerOptions, DEFAULT_CONNECT_TIMEOUT};
pub use error::ConnectError;
pub use platform::{Platform, TransportKind};
pub use ssh::SshOptions;
pub use stream::TransportStream;
pub use tracker::{ConnectionGuard, ConnectionId, ConnectionTracker};
