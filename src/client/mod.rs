//! HTTP client factory.
//!
//! # Data Flow
//! ```text
//! ConnectionSpec + AgentOptions
//!     → registry.rs (identity claimed, duplicates rejected)
//!     → agent.rs
//!         ├── pooled hyper client over the transport Dialer (ordinary calls)
//!         ├── dedicated dial + hijack::upgrade (attach, exec start)
//!         └── progress::decode_events (pull, push, build)
//! ```

pub mod agent;
pub mod body;
pub mod error;
pub mod registry;

pub use agent::{Agent, AgentOptions, ProgressRequestError, Session, DEFAULT_REQUEST_TIMEOUT};
pub use body::{Body, BoxError};
pub use error::{AgentError, RequestError};
pub use registry::{AgentRegistry, Registration};
