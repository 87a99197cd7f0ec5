//! Resolve a [`ConnectionSpec`] into connected streams.
//!
//! The dialer is a `tower::Service<Uri>` so it can be handed straight to the
//! pooled hyper client; the request uri is ignored because the spec alone
//! decides where bytes go.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::Uri;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use crate::transport::connection_spec::ConnectionSpec;
use crate::transport::error::ConnectError;
use crate::transport::platform::Platform;
use crate::transport::ssh::{SshOptions, SshStream};
use crate::transport::stream::{Inner, TransportStream};
use crate::transport::tls;
use crate::transport::tracker::ConnectionTracker;

/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings applied to every dial.
#[derive(Debug, Clone)]
pub struct DialerOptions {
    pub platform: Platform,
    pub connect_timeout: Duration,
    pub ssh: SshOptions,
}

impl Default for DialerOptions {
    fn default() -> Self {
        Self {
            platform: Platform::Native,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ssh: SshOptions::default(),
        }
    }
}

/// Opens new connections to one engine.
#[derive(Clone)]
pub struct Dialer {
    spec: Arc<ConnectionSpec>,
    tls: Option<TlsConnector>,
    options: Arc<DialerOptions>,
    tracker: ConnectionTracker,
    shutdown: CancellationToken,
}

impl Dialer {
    /// Validate the spec against the platform and load TLS material.
    pub fn new(
        spec: ConnectionSpec,
        options: DialerOptions,
        tracker: ConnectionTracker,
        shutdown: CancellationToken,
    ) -> Result<Self, ConnectError> {
        let kind = spec.kind();
        if !options.platform.supports(kind) {
            return Err(ConnectError::Unsupported {
                kind,
                platform: options.platform,
            });
        }

        let tls = match &spec {
            ConnectionSpec::Tcp { tls: Some(tls), .. } => Some(tls::load_connector(tls)?),
            _ => None,
        };

        Ok(Self {
            spec: Arc::new(spec),
            tls,
            options: Arc::new(options),
            tracker,
            shutdown,
        })
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Open a new connection, bounded by the connect timeout.
    pub async fn dial(&self) -> Result<TransportStream, ConnectError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectError::Closed);
        }

        let target = self.spec.describe();
        let timeout = self.options.connect_timeout;

        let inner = tokio::select! {
            result = tokio::time::timeout(timeout, self.open()) => match result {
                Ok(inner) => inner?,
                Err(_) => return Err(ConnectError::Timeout { target, timeout }),
            },
            _ = self.shutdown.cancelled() => return Err(ConnectError::Closed),
        };

        let stream = TransportStream::new(inner, self.tracker.track(), self.shutdown.clone());
        tracing::debug!(connection_id = %stream.id(), target = %target, "Connection established");
        Ok(stream)
    }

    async fn open(&self) -> Result<Inner, ConnectError> {
        let dial_err = |source| ConnectError::Dial {
            target: self.spec.describe(),
            source,
        };

        match self.spec.as_ref() {
            #[cfg(unix)]
            ConnectionSpec::UnixSocket { path } => tokio::net::UnixStream::connect(path)
                .await
                .map(Inner::Unix)
                .map_err(dial_err),

            #[cfg(windows)]
            ConnectionSpec::NamedPipe { path } => {
                tokio::net::windows::named_pipe::ClientOptions::new()
                    .open(path)
                    .map(Inner::NamedPipe)
                    .map_err(dial_err)
            }

            ConnectionSpec::Tcp { host, port, tls, .. } => {
                let tcp = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(dial_err)?;
                let _ = tcp.set_nodelay(true);

                match (tls, &self.tls) {
                    (Some(tls_spec), Some(connector)) => {
                        let name = tls::server_name(tls_spec, host)?;
                        let stream = connector.connect(name, tcp).await.map_err(|source| {
                            ConnectError::TlsHandshake {
                                server: host.clone(),
                                source,
                            }
                        })?;
                        Ok(Inner::Tls(Box::new(stream)))
                    }
                    _ => Ok(Inner::Tcp(tcp)),
                }
            }

            ConnectionSpec::Ssh {
                host,
                port,
                auth,
                remote_socket_path,
            } => SshStream::spawn(&self.options.ssh, host, *port, auth, remote_socket_path)
                .map(Inner::Ssh),

            #[allow(unreachable_patterns)]
            other => Err(ConnectError::Unsupported {
                kind: other.kind(),
                platform: self.options.platform,
            }),
        }
    }
}

impl std::fmt::Debug for Dialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialer")
            .field("target", &self.spec.describe())
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl tower::Service<Uri> for Dialer {
    type Response = TransportStream;
    type Error = ConnectError;
    type Future = Pin<Box<dyn Future<Output = Result<TransportStream, ConnectError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), ConnectError>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _uri: Uri) -> Self::Future {
        let dialer = self.clone();
        Box::pin(async move { dialer.dial().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::platform::TransportKind;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn dialer(spec: ConnectionSpec, options: DialerOptions) -> Result<Dialer, ConnectError> {
        Dialer::new(spec, options, ConnectionTracker::new(), CancellationToken::new())
    }

    #[test]
    fn web_platform_rejects_local_transports() {
        let err = dialer(
            ConnectionSpec::UnixSocket {
                path: "/var/run/docker.sock".into(),
            },
            DialerOptions {
                platform: Platform::Web,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConnectError::Unsupported {
                kind: TransportKind::UnixSocket,
                platform: Platform::Web
            }
        ));
    }

    #[tokio::test]
    async fn dials_tcp_and_tracks_the_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"hello").await.unwrap();
        });

        let d = dialer(
            ConnectionSpec::Tcp {
                host: "127.0.0.1".to_string(),
                port,
                tls: None,
                path_prefix: None,
            },
            DialerOptions::default(),
        )
        .unwrap();

        let mut stream = d.dial().await.unwrap();
        assert_eq!(d.tracker().active_count(), 1);
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(stream);
        assert_eq!(d.tracker().active_count(), 0);
        server.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_socket_is_a_dial_error() {
        let dir = tempfile::tempdir().unwrap();
        let d = dialer(
            ConnectionSpec::UnixSocket {
                path: dir.path().join("missing.sock"),
            },
            DialerOptions::default(),
        )
        .unwrap();
        assert!(matches!(d.dial().await, Err(ConnectError::Dial { .. })));
    }

    #[tokio::test]
    async fn closed_agent_refuses_to_dial() {
        let token = CancellationToken::new();
        let d = Dialer::new(
            ConnectionSpec::Tcp {
                host: "127.0.0.1".to_string(),
                port: 1,
                tls: None,
                path_prefix: None,
            },
            DialerOptions::default(),
            ConnectionTracker::new(),
            token.clone(),
        )
        .unwrap();
        token.cancel();
        assert!(matches!(d.dial().await, Err(ConnectError::Closed)));
    }
}
