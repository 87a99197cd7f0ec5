//! Upgrade an HTTP request into a hijacked connection.
//!
//! # Data Flow
//! ```text
//! dialed stream ──▶ http1 handshake ──▶ send request (Connection: Upgrade, Upgrade: tcp)
//!                        │                      │
//!                  driver task            101 Switching Protocols?
//!                 (with_upgrades)          ├── no  ──▶ Rejected, socket closed
//!                                          └── yes ──▶ content type agrees with tty?
//!                                                       ├── no  ──▶ ModeMismatch, socket closed
//!                                                       └── yes ──▶ HijackedConnection
//! ```
//!
//! [`upgrade_inferred`] skips the agreement check: a labeled response picks
//! the mode itself and the caller's flag only covers unlabeled responses.

use std::time::Duration;

use http_body_util::{BodyExt, Limited};
use hyper::header::{HeaderValue, CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use hyper::{Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::client::body::Body;
use crate::client::error::daemon_message;
use crate::hijack::connection::{HijackedConnection, StreamMode};
use crate::transport::{ConnectError, TransportStream};

/// Upgrade protocol token the engine expects.
pub const UPGRADE_PROTOCOL: &str = "tcp";

/// Largest rejection body read for an error message.
const MAX_REJECTION_BODY: usize = 64 * 1024;

/// Failure to take over a connection.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("invalid upgrade request: {0}")]
    InvalidRequest(String),

    #[error("HTTP exchange failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("engine refused to upgrade ({status}): {message}")]
    Rejected { status: StatusCode, message: String },

    #[error("engine sent a {actual:?} stream but the session was opened for a {expected:?} stream")]
    ModeMismatch {
        expected: StreamMode,
        actual: StreamMode,
    },

    #[error("connection upgrade failed: {0}")]
    Upgrade(#[source] hyper::Error),

    #[error("upgrade timed out after {0:?}")]
    Timeout(Duration),
}

/// Owns the task driving the HTTP/1 connection until the upgrade completes.
///
/// Aborting the task drops the transport stream and closes the socket.
struct ConnectionDriver {
    handle: Option<JoinHandle<()>>,
}

impl ConnectionDriver {
    /// Abort the task and wait until the socket has been released.
    async fn close(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ConnectionDriver {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// How the stream mode of a hijacked connection is chosen.
#[derive(Debug, Clone, Copy)]
enum ModePolicy {
    /// The caller's mode; a contradicting label is an error.
    Require(StreamMode),
    /// The response label; the given mode only when the label is absent.
    PreferLabel(StreamMode),
}

impl ModePolicy {
    fn resolve(self, labeled: Option<StreamMode>) -> Result<StreamMode, UpgradeError> {
        match (self, labeled) {
            (ModePolicy::Require(expected), Some(actual)) if actual != expected => {
                Err(UpgradeError::ModeMismatch { expected, actual })
            }
            (ModePolicy::PreferLabel(_), Some(actual)) => Ok(actual),
            (ModePolicy::Require(mode), _) | (ModePolicy::PreferLabel(mode), None) => Ok(mode),
        }
    }
}

/// Send `request` over `stream` and take the connection over on success.
///
/// `tty` must match the TTY flag the container or exec was created with. If
/// the engine labels the response with a contradicting content type the
/// upgrade fails instead of yielding a misparsed stream.
pub async fn upgrade(
    stream: TransportStream,
    request: Request<Body>,
    tty: bool,
) -> Result<HijackedConnection, UpgradeError> {
    upgrade_with(stream, request, ModePolicy::Require(StreamMode::from_tty(tty))).await
}

/// Like [`upgrade`], but the mode comes from the response content type when
/// the engine sends one. `fallback_tty` is used only for unlabeled responses
/// from engines older than API 1.42.
pub async fn upgrade_inferred(
    stream: TransportStream,
    request: Request<Body>,
    fallback_tty: bool,
) -> Result<HijackedConnection, UpgradeError> {
    upgrade_with(stream, request, ModePolicy::PreferLabel(StreamMode::from_tty(fallback_tty))).await
}

async fn upgrade_with(
    stream: TransportStream,
    mut request: Request<Body>,
    policy: ModePolicy,
) -> Result<HijackedConnection, UpgradeError> {
    let connection_id = stream.id();
    prepare_request(&mut request)?;

    let (mut sender, conn) = hyper::client::conn::http1::handshake(stream)
        .await
        .map_err(UpgradeError::Handshake)?;

    // The connection task must keep running for the upgrade to work.
    let driver = ConnectionDriver {
        handle: Some(tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                tracing::debug!(connection_id = %connection_id, error = %e, "Upgrade connection ended");
            }
        })),
    };

    let result = async {
        let response = sender
            .send_request(request)
            .await
            .map_err(UpgradeError::Handshake)?;

        let status = response.status();
        if status != StatusCode::SWITCHING_PROTOCOLS {
            let body = Limited::new(response.into_body(), MAX_REJECTION_BODY)
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            return Err(UpgradeError::Rejected {
                status,
                message: daemon_message(status, &body),
            });
        }

        let labeled = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(StreamMode::from_content_type);
        let mode = policy.resolve(labeled)?;

        let upgraded = hyper::upgrade::on(response)
            .await
            .map_err(UpgradeError::Upgrade)?;
        Ok((upgraded, mode))
    }
    .await;

    match result {
        Ok((upgraded, mode)) => {
            tracing::debug!(connection_id = %connection_id, mode = ?mode, "Connection hijacked");
            Ok(HijackedConnection::new(TokioIo::new(upgraded), mode))
        }
        Err(e) => {
            drop(sender);
            driver.close().await;
            tracing::debug!(connection_id = %connection_id, error = %e, "Upgrade failed, socket closed");
            Err(e)
        }
    }
}

/// Rewrite the request for a single-connection HTTP/1 exchange.
fn prepare_request(request: &mut Request<Body>) -> Result<(), UpgradeError> {
    let host = request
        .uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| "localhost".to_string());
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    *request.uri_mut() =
        Uri::try_from(path).map_err(|e| UpgradeError::InvalidRequest(e.to_string()))?;

    let headers = request.headers_mut();
    if !headers.contains_key(HOST) {
        let value = HeaderValue::try_from(host)
            .map_err(|e| UpgradeError::InvalidRequest(e.to_string()))?;
        headers.insert(HOST, value);
    }
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(UPGRADE, HeaderValue::from_static(UPGRADE_PROTOCOL));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::body;

    #[test]
    fn required_mode_rejects_contradicting_label() {
        let policy = ModePolicy::Require(StreamMode::Framed);
        assert_eq!(policy.resolve(None).unwrap(), StreamMode::Framed);
        assert_eq!(policy.resolve(Some(StreamMode::Framed)).unwrap(), StreamMode::Framed);
        assert!(matches!(
            policy.resolve(Some(StreamMode::Raw)),
            Err(UpgradeError::ModeMismatch {
                expected: StreamMode::Framed,
                actual: StreamMode::Raw
            })
        ));
    }

    #[test]
    fn preferred_label_overrides_fallback() {
        let policy = ModePolicy::PreferLabel(StreamMode::Framed);
        assert_eq!(policy.resolve(Some(StreamMode::Raw)).unwrap(), StreamMode::Raw);
        assert_eq!(policy.resolve(None).unwrap(), StreamMode::Framed);
    }

    #[test]
    fn request_is_rewritten_to_origin_form() {
        let mut request = Request::post("http://localhost/v1.45/containers/abc/attach?stream=1")
            .body(body::empty())
            .unwrap();
        prepare_request(&mut request).unwrap();

        assert_eq!(request.uri(), "/v1.45/containers/abc/attach?stream=1");
        assert_eq!(request.headers()[HOST], "localhost");
        assert_eq!(request.headers()[CONNECTION], "Upgrade");
        assert_eq!(request.headers()[UPGRADE], "tcp");
    }

    #[test]
    fn explicit_host_header_is_kept() {
        let mut request = Request::post("https://engine:2376/exec/1/start")
            .header(HOST, "engine.internal")
            .body(body::empty())
            .unwrap();
        prepare_request(&mut request).unwrap();
        assert_eq!(request.headers()[HOST], "engine.internal");
    }
}
