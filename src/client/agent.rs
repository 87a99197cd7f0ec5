//! The engine client.
//!
//! An [`Agent`] owns one pooled HTTP client built on a [`Dialer`], plus the
//! shutdown token every socket it opens is bound to. Ordinary calls share
//! pooled connections; each hijack dials a connection of its own.

use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::http::request::Builder;
use hyper::{Method, Request, Response, Uri};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::client::body::{self, Body};
use crate::client::error::{daemon_message, AgentError, RequestError};
use crate::client::registry::{AgentRegistry, Registration};
use crate::config::schema::ClientConfig;
use crate::demux::{fan_with, FanOptions, Multiplexed};
use crate::hijack::{self, HijackedConnection, HijackedStream, RawStream, UpgradeError};
use crate::progress::{
    broadcast, collect_and_follow_with, decode_events, EventStream, ProgressError, ProgressEvent,
    Subscriber, DEFAULT_SUBSCRIBER_CAPACITY,
};
use crate::transport::{
    ConnectError, ConnectionSpec, ConnectionTracker, Dialer, DialerOptions, Platform, SshOptions,
    DEFAULT_CONNECT_TIMEOUT,
};

/// Default bound on waiting for response headers.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest error body read to build an error message.
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Settings for [`Agent::connect`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Registry key; at most one live agent per identity.
    pub identity: String,
    pub platform: Platform,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Pin requests to an API version, e.g. `1.45`.
    pub api_version: Option<String>,
    pub demux: FanOptions,
    /// Events buffered per consumer when a progress stream is broadcast.
    pub progress_buffer_capacity: usize,
    pub progress_max_line_bytes: Option<usize>,
    pub ssh: SshOptions,
}

impl AgentOptions {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            platform: Platform::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            api_version: None,
            demux: FanOptions::default(),
            progress_buffer_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
            progress_max_line_bytes: None,
            ssh: SshOptions::default(),
        }
    }

    /// Options taken from a loaded configuration file.
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            identity: config.identity.clone(),
            platform: Platform::default(),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            request_timeout: Duration::from_secs(config.timeouts.request_secs),
            api_version: config.api_version.clone(),
            demux: FanOptions {
                buffer_capacity: config.demux.buffer_capacity,
                max_frame_bytes: config.demux.max_frame_bytes,
            },
            progress_buffer_capacity: config.progress.buffer_capacity,
            progress_max_line_bytes: config.progress.max_line_bytes,
            ssh: config.ssh.clone(),
        }
    }
}

/// Failure of a request whose progress stream is consumed to completion.
#[derive(Debug, Error)]
pub enum ProgressRequestError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Output side of an attached session.
#[derive(Debug)]
pub enum Session {
    /// TTY session: one combined byte stream, writes go to stdin.
    Tty(RawStream),
    /// Non-TTY session split into stdin, stdout and stderr.
    Multiplexed(Multiplexed),
}

struct AgentInner {
    registration: Registration,
    spec: ConnectionSpec,
    base: String,
    dialer: Dialer,
    client: Client<Dialer, Body>,
    tracker: ConnectionTracker,
    shutdown: CancellationToken,
    request_timeout: Duration,
    demux: FanOptions,
    progress_buffer_capacity: usize,
    progress_max_line_bytes: Option<usize>,
}

impl Drop for AgentInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A client bound to one engine.
///
/// Cheap to clone; clones share the connection pool and identity. The
/// identity is released once the last clone is dropped.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("identity", &self.identity())
            .field("target", &self.inner.spec.describe())
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Build an agent for `spec`, claiming `options.identity` in `registry`.
    ///
    /// No connection is opened until the first request.
    pub fn connect(
        spec: ConnectionSpec,
        options: AgentOptions,
        registry: &AgentRegistry,
    ) -> Result<Self, AgentError> {
        let version_prefix = match &options.api_version {
            Some(version) => format!("/v{}", parse_api_version(version)?),
            None => String::new(),
        };
        let base_url = spec.base_url()?;
        let base = format!("{}{}", base_url.as_str().trim_end_matches('/'), version_prefix);

        let target = spec.describe();
        let registration = registry.register(&options.identity, &target)?;

        let tracker = ConnectionTracker::new();
        let shutdown = CancellationToken::new();
        let dialer = Dialer::new(
            spec.clone(),
            DialerOptions {
                platform: options.platform,
                connect_timeout: options.connect_timeout,
                ssh: options.ssh,
            },
            tracker.clone(),
            shutdown.clone(),
        )?;
        let client = Client::builder(TokioExecutor::new()).build(dialer.clone());

        tracing::info!(identity = %options.identity, target = %target, base = %base, "Agent opened");

        Ok(Self {
            inner: Arc::new(AgentInner {
                registration,
                spec,
                base,
                dialer,
                client,
                tracker,
                shutdown,
                request_timeout: options.request_timeout,
                demux: options.demux,
                progress_buffer_capacity: options.progress_buffer_capacity,
                progress_max_line_bytes: options.progress_max_line_bytes,
            }),
        })
    }

    pub fn identity(&self) -> &str {
        self.inner.registration.identity()
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.inner.spec
    }

    /// Base URL including any path and version prefix.
    pub fn base_url(&self) -> &str {
        &self.inner.base
    }

    /// Absolute URI for an API path such as `/containers/json?all=1`.
    pub fn url(&self, path: &str) -> Result<Uri, RequestError> {
        self.join(path)
            .parse()
            .map_err(|e: hyper::http::uri::InvalidUri| RequestError::InvalidRequest(e.to_string()))
    }

    fn join(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.inner.base, path)
        } else {
            format!("{}/{}", self.inner.base, path)
        }
    }

    /// Request builder targeting `path` on this engine.
    pub fn request(&self, method: Method, path: &str) -> Builder {
        Request::builder().method(method).uri(self.join(path))
    }

    /// Send an ordinary request.
    ///
    /// Non-2xx responses become [`RequestError::Status`] carrying the engine's
    /// message. The timeout covers the response head only, so streaming
    /// bodies may run for as long as the engine keeps sending.
    pub async fn send(&self, request: Request<Body>) -> Result<Response<Incoming>, RequestError> {
        if self.is_closed() {
            return Err(RequestError::Closed);
        }

        let method = request.method().clone();
        let uri = request.uri().clone();
        let timeout = self.inner.request_timeout;

        let response = tokio::select! {
            result = tokio::time::timeout(timeout, self.inner.client.request(request)) => match result {
                Ok(response) => response.map_err(RequestError::Http)?,
                Err(_) => return Err(RequestError::Timeout(timeout)),
            },
            _ = self.inner.shutdown.cancelled() => return Err(RequestError::Closed),
        };

        let status = response.status();
        tracing::debug!(method = %method, uri = %uri, status = %status, "Request completed");

        if !status.is_success() {
            let body = Limited::new(response.into_body(), MAX_ERROR_BODY)
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            return Err(RequestError::Status {
                status,
                message: daemon_message(status, &body),
            });
        }

        Ok(response)
    }

    /// Send a request and decode its JSON response body.
    pub async fn send_json<T: DeserializeOwned>(&self, request: Request<Body>) -> Result<T, RequestError> {
        let response = self.send(request).await?;
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(RequestError::Body)?
            .to_bytes();
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `GET /_ping`; returns the engine's answer, normally `OK`.
    pub async fn ping(&self) -> Result<String, RequestError> {
        let request = self
            .request(Method::GET, "/_ping")
            .body(body::empty())
            .map_err(|e| RequestError::InvalidRequest(e.to_string()))?;
        let response = self.send(request).await?;
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(RequestError::Body)?
            .to_bytes();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Send a pull, push or build request and decode its progress events.
    pub async fn stream_progress(&self, request: Request<Body>) -> Result<EventStream, RequestError> {
        let response = self.send(request).await?;
        Ok(decode_events(
            response.into_body().into_data_stream(),
            self.inner.progress_max_line_bytes,
        ))
    }

    /// Send a progress request and share its events between `consumers`
    /// subscribers, each buffering up to the configured capacity.
    pub async fn broadcast_progress(
        &self,
        request: Request<Body>,
        consumers: usize,
    ) -> Result<Vec<Subscriber>, RequestError> {
        let events = self.stream_progress(request).await?;
        Ok(broadcast(events, consumers, self.inner.progress_buffer_capacity))
    }

    /// Send a progress request, writing each event to `out` and returning
    /// all of them once the engine finishes.
    pub async fn collect_and_follow_progress<W>(
        &self,
        request: Request<Body>,
        out: W,
    ) -> Result<Vec<ProgressEvent>, ProgressRequestError>
    where
        W: AsyncWrite + Unpin,
    {
        let events = self.stream_progress(request).await?;
        Ok(collect_and_follow_with(events, out, self.inner.progress_buffer_capacity).await?)
    }

    /// Upgrade `request` on a dedicated connection.
    ///
    /// `tty` must be the TTY flag the container or exec was created with.
    pub async fn hijack(&self, request: Request<Body>, tty: bool) -> Result<HijackedConnection, UpgradeError> {
        if self.is_closed() {
            return Err(UpgradeError::Connect(ConnectError::Closed));
        }

        let timeout = self.inner.request_timeout;
        let stream = self.inner.dialer.dial().await?;
        match tokio::time::timeout(timeout, hijack::upgrade(stream, request, tty)).await {
            Ok(result) => result,
            Err(_) => Err(UpgradeError::Timeout(timeout)),
        }
    }

    /// Upgrade `request`, letting the engine's content type pick the mode.
    ///
    /// For callers that do not know the session's TTY flag. `fallback_tty`
    /// applies only when the engine does not label the response.
    pub async fn hijack_inferred(
        &self,
        request: Request<Body>,
        fallback_tty: bool,
    ) -> Result<HijackedConnection, UpgradeError> {
        if self.is_closed() {
            return Err(UpgradeError::Connect(ConnectError::Closed));
        }

        let timeout = self.inner.request_timeout;
        let stream = self.inner.dialer.dial().await?;
        match tokio::time::timeout(timeout, hijack::upgrade_inferred(stream, request, fallback_tty)).await {
            Ok(result) => result,
            Err(_) => Err(UpgradeError::Timeout(timeout)),
        }
    }

    /// Hijack and, for non-TTY sessions, demultiplex with this agent's
    /// buffer settings.
    pub async fn attach(&self, request: Request<Body>, tty: bool) -> Result<Session, UpgradeError> {
        let connection = self.hijack(request, tty).await?;
        Ok(match connection.into_stream() {
            HijackedStream::Raw(raw) => Session::Tty(raw),
            HijackedStream::Framed(framed) => Session::Multiplexed(fan_with(framed, self.inner.demux)),
        })
    }

    /// Sockets currently open through this agent.
    pub fn active_connections(&self) -> u64 {
        self.inner.tracker.active_count()
    }

    /// Fail pending and future I/O on every connection of this agent.
    ///
    /// The identity stays claimed until the last clone is dropped.
    pub fn close(&self) {
        if !self.inner.shutdown.is_cancelled() {
            self.inner.shutdown.cancel();
            tracing::info!(
                identity = %self.identity(),
                active_connections = self.active_connections(),
                "Agent closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

/// Accept `1.45` or `v1.45`.
fn parse_api_version(version: &str) -> Result<&str, AgentError> {
    let trimmed = version.trim().trim_start_matches('v');
    let valid = trimmed
        .split_once('.')
        .map(|(major, minor)| {
            !major.is_empty()
                && !minor.is_empty()
                && major.bytes().all(|b| b.is_ascii_digit())
                && minor.bytes().all(|b| b.is_ascii_digit())
        })
        .unwrap_or(false);

    if valid {
        Ok(trimmed)
    } else {
        Err(AgentError::InvalidApiVersion(version.to_string()))
    }
}
