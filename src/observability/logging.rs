//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for applications embedding the agent
//! - Configure log level from the environment, then from config
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging; the library itself only emits
//!   events and never installs a subscriber on its own
//! - `RUST_LOG` wins over the configured filter

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

use crate::config::schema::LoggingConfig;

/// Install a global `fmt` subscriber.
///
/// Fails if a global subscriber is already set; callers that may initialise
/// twice can ignore the error.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter(config))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter))
}
