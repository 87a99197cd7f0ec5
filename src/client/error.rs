use std::time::Duration;

use hyper::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::{ConnectError, SpecError};

/// Configuration failures when building an agent. Never retried.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("an agent with identity {0:?} already exists")]
    DuplicateIdentity(String),

    #[error("agent identity must not be empty")]
    EmptyIdentity,

    #[error("invalid connection specification: {0}")]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Transport(#[from] ConnectError),

    #[error("invalid api version {0:?}")]
    InvalidApiVersion(String),
}

/// Failure of a single ordinary request. Other requests are unaffected.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request failed: {0}")]
    Http(#[source] hyper_util::client::legacy::Error),

    #[error("failed to read response body: {0}")]
    Body(#[source] hyper::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("engine returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("agent is closed")]
    Closed,
}

impl RequestError {
    /// HTTP status reported by the engine, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the failure happened while opening the connection.
    pub fn is_connect(&self) -> bool {
        matches!(self, RequestError::Http(e) if e.is_connect())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Human-readable message from an engine error body.
///
/// The engine answers errors with `{"message": "..."}`; proxies in front of
/// it may send plain text or nothing at all.
pub(crate) fn daemon_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        return parsed.message;
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_from_json_body() {
        let msg = daemon_message(
            StatusCode::NOT_FOUND,
            br#"{"message":"No such container: abc"}"#,
        );
        assert_eq!(msg, "No such container: abc");
    }

    #[test]
    fn message_from_text_or_status() {
        assert_eq!(
            daemon_message(StatusCode::BAD_GATEWAY, b"upstream down\n"),
            "upstream down"
        );
        assert_eq!(daemon_message(StatusCode::CONFLICT, b""), "Conflict");
    }

    #[test]
    fn status_accessor() {
        let err = RequestError::Status {
            status: StatusCode::CONFLICT,
            message: "in use".to_string(),
        };
        assert_eq!(err.status(), Some(StatusCode::CONFLICT));
        assert!(!err.is_connect());
        assert_eq!(err.to_string(), "engine returned 409 Conflict: in use");
    }
}
