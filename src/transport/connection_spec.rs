//! Connection specifications and `DOCKER_HOST` parsing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::transport::platform::{self, TransportKind};

/// Default port for plain TCP engines.
pub const DEFAULT_TCP_PORT: u16 = 2375;
/// Default port for TLS engines.
pub const DEFAULT_TLS_PORT: u16 = 2376;
/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;
/// Engine socket assumed on the far side of an SSH connection.
pub const DEFAULT_REMOTE_SOCKET: &str = "/var/run/docker.sock";

/// Errors produced while interpreting a connection specification.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("invalid engine url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported engine url scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("engine url {0:?} has no host")]
    MissingHost(String),

    #[error("engine url {0:?} has an empty socket path")]
    EmptyPath(String),
}

/// TLS material for a TCP connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSpec {
    /// CA bundle used to verify the engine. Public web roots when unset.
    pub ca: Option<PathBuf>,
    /// Client certificate chain (PEM).
    pub cert: Option<PathBuf>,
    /// Client private key (PEM).
    pub key: Option<PathBuf>,
    /// Name to verify instead of the dialed host.
    pub server_name: Option<String>,
}

impl TlsSpec {
    /// The `ca.pem`/`cert.pem`/`key.pem` layout used by `DOCKER_CERT_PATH`.
    pub fn from_cert_dir(dir: &Path) -> Self {
        Self {
            ca: Some(dir.join("ca.pem")),
            cert: Some(dir.join("cert.pem")),
            key: Some(dir.join("key.pem")),
            server_name: None,
        }
    }
}

/// Credentials for the SSH transport.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshAuth {
    pub user: Option<String>,
    /// Private key passed to `ssh -i`. The user's ssh agent and config apply
    /// when unset.
    pub identity_file: Option<PathBuf>,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_remote_socket() -> String {
    DEFAULT_REMOTE_SOCKET.to_string()
}

/// Where and how to reach an engine. Supplied once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ConnectionSpec {
    UnixSocket {
        path: PathBuf,
    },
    NamedPipe {
        path: String,
    },
    Tcp {
        host: String,
        port: u16,
        #[serde(default)]
        tls: Option<TlsSpec>,
        /// Prepended to every request path, for engines behind a proxy.
        #[serde(default)]
        path_prefix: Option<String>,
    },
    Ssh {
        host: String,
        #[serde(default = "default_ssh_port")]
        port: u16,
        #[serde(default)]
        auth: SshAuth,
        #[serde(default = "default_remote_socket")]
        remote_socket_path: String,
    },
}

impl Default for ConnectionSpec {
    fn default() -> Self {
        Self::system_default()
    }
}

/// The port as written in `raw`.
///
/// `Url::port` hides ports equal to the scheme default (80 for http, 443 for
/// https), which would otherwise fall back to the engine defaults.
fn explicit_port(raw: &str, url: &Url) -> Result<Option<u16>, SpecError> {
    if !matches!(url.scheme(), "http" | "https") {
        return Ok(url.port());
    }
    let rest = &raw[url.scheme().len()..];
    let opaque = format!("tcp{rest}");
    let reparsed = Url::parse(&opaque).map_err(|source| SpecError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    Ok(reparsed.port())
}

impl ConnectionSpec {
    /// The platform's system-wide engine socket.
    pub fn system_default() -> Self {
        let path = platform::system_socket_default();
        if cfg!(windows) {
            ConnectionSpec::NamedPipe {
                path: path.to_string_lossy().into_owned(),
            }
        } else {
            ConnectionSpec::UnixSocket { path }
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            ConnectionSpec::UnixSocket { .. } => TransportKind::UnixSocket,
            ConnectionSpec::NamedPipe { .. } => TransportKind::NamedPipe,
            ConnectionSpec::Tcp { tls: Some(_), .. } => TransportKind::Tls,
            ConnectionSpec::Tcp { tls: None, .. } => TransportKind::Tcp,
            ConnectionSpec::Ssh { .. } => TransportKind::Ssh,
        }
    }

    /// Parse a `DOCKER_HOST`-style url.
    ///
    /// `tls` supplies certificate material for TCP urls; an `https` url or a
    /// `tcp` url on port 2376 uses TLS even when `tls` is `None`.
    pub fn from_docker_host(host: &str, tls: Option<TlsSpec>) -> Result<Self, SpecError> {
        let host = host.trim();

        if let Some(path) = host.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(SpecError::EmptyPath(host.to_string()));
            }
            return Ok(ConnectionSpec::UnixSocket {
                path: PathBuf::from(path),
            });
        }

        if let Some(path) = host.strip_prefix("npipe://") {
            if path.is_empty() {
                return Err(SpecError::EmptyPath(host.to_string()));
            }
            return Ok(ConnectionSpec::NamedPipe {
                path: path.replace('/', "\\"),
            });
        }

        let url = Url::parse(host).map_err(|source| SpecError::InvalidUrl {
            url: host.to_string(),
            source,
        })?;
        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| SpecError::MissingHost(host.to_string()))?;
        let path = url.path().trim_end_matches('/');
        let path_prefix = (!path.is_empty()).then(|| path.to_string());

        match url.scheme() {
            "tcp" | "http" | "https" => {
                let (default_port, force_tls) = match url.scheme() {
                    "https" => (DEFAULT_TLS_PORT, true),
                    _ => (DEFAULT_TCP_PORT, false),
                };
                let port = explicit_port(host, &url)?.unwrap_or(default_port);
                let use_tls = force_tls
                    || tls.is_some()
                    || (url.scheme() == "tcp" && port == DEFAULT_TLS_PORT);

                Ok(ConnectionSpec::Tcp {
                    host: hostname,
                    port,
                    tls: use_tls.then(|| tls.unwrap_or_default()),
                    path_prefix,
                })
            }
            "ssh" => {
                let user = Some(url.username())
                    .filter(|u| !u.is_empty())
                    .map(str::to_string);
                Ok(ConnectionSpec::Ssh {
                    host: hostname,
                    port: url.port().unwrap_or(DEFAULT_SSH_PORT),
                    auth: SshAuth {
                        user,
                        identity_file: None,
                    },
                    remote_socket_path: path_prefix.unwrap_or_else(default_remote_socket),
                })
            }
            other => Err(SpecError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Resolve the engine from `DOCKER_HOST`, `DOCKER_TLS_VERIFY` and
    /// `DOCKER_CERT_PATH`, falling back to the system socket.
    pub fn from_env() -> Result<Self, SpecError> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Like [`ConnectionSpec::from_env`] with an injectable variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, SpecError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(host) = lookup("DOCKER_HOST").filter(|h| !h.trim().is_empty()) else {
            return Ok(Self::system_default());
        };

        let verify = lookup("DOCKER_TLS_VERIFY").is_some_and(|v| !v.is_empty() && v != "0");
        let tls = if verify {
            let dir = lookup("DOCKER_CERT_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| {
                    lookup("HOME")
                        .or_else(|| lookup("USERPROFILE"))
                        .map(|home| PathBuf::from(home).join(".docker"))
                });
            dir.map(|dir| TlsSpec::from_cert_dir(&dir))
                .or_else(|| Some(TlsSpec::default()))
        } else {
            None
        };

        Self::from_docker_host(&host, tls)
    }

    /// Base url that request paths are resolved against.
    ///
    /// Local and SSH transports carry the engine directly, so the host part is
    /// a placeholder.
    pub fn base_url(&self) -> Result<Url, SpecError> {
        let raw = match self {
            ConnectionSpec::Tcp {
                host,
                port,
                tls,
                path_prefix,
            } => {
                let scheme = if tls.is_some() { "https" } else { "http" };
                let host = if host.contains(':') {
                    format!("[{host}]")
                } else {
                    host.clone()
                };
                let prefix = path_prefix
                    .as_deref()
                    .map(|p| format!("/{}", p.trim_matches('/')))
                    .unwrap_or_default();
                format!("{scheme}://{host}:{port}{prefix}")
            }
            _ => "http://localhost".to_string(),
        };

        Url::parse(&raw).map_err(|source| SpecError::InvalidUrl { url: raw, source })
    }

    /// Short human-readable form for logs.
    pub fn describe(&self) -> String {
        match self {
            ConnectionSpec::UnixSocket { path } => format!("unix://{}", path.display()),
            ConnectionSpec::NamedPipe { path } => format!("npipe://{}", path.replace('\\', "/")),
            ConnectionSpec::Tcp { host, port, tls, .. } => {
                let scheme = if tls.is_some() { "https" } else { "tcp" };
                format!("{scheme}://{host}:{port}")
            }
            ConnectionSpec::Ssh {
                host, port, auth, ..
            } => match &auth.user {
                Some(user) => format!("ssh://{user}@{host}:{port}"),
                None => format!("ssh://{host}:{port}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_unix_socket() {
        let spec = ConnectionSpec::from_docker_host("unix:///var/run/docker.sock", None).unwrap();
        assert_eq!(
            spec,
            ConnectionSpec::UnixSocket {
                path: PathBuf::from("/var/run/docker.sock")
            }
        );
        assert_eq!(spec.base_url().unwrap().as_str(), "http://localhost/");
    }

    #[test]
    fn parses_named_pipe() {
        let spec = ConnectionSpec::from_docker_host("npipe:////./pipe/docker_engine", None).unwrap();
        assert_eq!(
            spec,
            ConnectionSpec::NamedPipe {
                path: r"\\.\pipe\docker_engine".to_string()
            }
        );
    }

    #[test]
    fn tcp_defaults_and_prefix() {
        let spec = ConnectionSpec::from_docker_host("tcp://10.0.0.5/engine/", None).unwrap();
        assert_eq!(
            spec,
            ConnectionSpec::Tcp {
                host: "10.0.0.5".to_string(),
                port: DEFAULT_TCP_PORT,
                tls: None,
                path_prefix: Some("/engine".to_string()),
            }
        );
        assert_eq!(
            spec.base_url().unwrap().as_str(),
            "http://10.0.0.5:2375/engine"
        );
    }

    #[test]
    fn tcp_on_tls_port_implies_tls() {
        let spec = ConnectionSpec::from_docker_host("tcp://engine.local:2376", None).unwrap();
        assert_eq!(spec.kind(), TransportKind::Tls);
        assert_eq!(
            spec.base_url().unwrap().as_str(),
            "https://engine.local:2376/"
        );
    }

    #[test]
    fn https_defaults_to_tls_port() {
        let spec = ConnectionSpec::from_docker_host("https://engine.local", None).unwrap();
        match spec {
            ConnectionSpec::Tcp { port, tls, .. } => {
                assert_eq!(port, DEFAULT_TLS_PORT);
                assert!(tls.is_some());
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn scheme_default_ports_are_kept_when_written() {
        let http = ConnectionSpec::from_docker_host("http://engine:80", None).unwrap();
        assert_eq!(http.describe(), "tcp://engine:80");

        let https = ConnectionSpec::from_docker_host("https://engine:443", None).unwrap();
        assert_eq!(https.describe(), "https://engine:443");

        let ipv6 = ConnectionSpec::from_docker_host("http://[::1]:80/prefix", None).unwrap();
        assert!(matches!(
            ipv6,
            ConnectionSpec::Tcp { ref host, port: 80, ref path_prefix, .. }
                if host == "::1" && path_prefix.as_deref() == Some("/prefix")
        ));

        let unset = ConnectionSpec::from_docker_host("http://engine", None).unwrap();
        assert_eq!(unset.describe(), "tcp://engine:2375");
    }

    #[test]
    fn parses_ssh_target() {
        let spec = ConnectionSpec::from_docker_host("ssh://me@build.example.com:2222", None).unwrap();
        assert_eq!(
            spec,
            ConnectionSpec::Ssh {
                host: "build.example.com".to_string(),
                port: 2222,
                auth: SshAuth {
                    user: Some("me".to_string()),
                    identity_file: None,
                },
                remote_socket_path: DEFAULT_REMOTE_SOCKET.to_string(),
            }
        );

        let spec =
            ConnectionSpec::from_docker_host("ssh://build.example.com/run/user/1000/docker.sock", None)
                .unwrap();
        match spec {
            ConnectionSpec::Ssh {
                port,
                remote_socket_path,
                ..
            } => {
                assert_eq!(port, DEFAULT_SSH_PORT);
                assert_eq!(remote_socket_path, "/run/user/1000/docker.sock");
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = ConnectionSpec::from_docker_host("ftp://example.com", None).unwrap_err();
        assert!(matches!(err, SpecError::UnsupportedScheme(s) if s == "ftp"));
        assert!(ConnectionSpec::from_docker_host("unix://", None).is_err());
    }

    #[test]
    fn env_with_tls_verify() {
        let vars: HashMap<&str, &str> = [
            ("DOCKER_HOST", "tcp://192.168.1.20:2376"),
            ("DOCKER_TLS_VERIFY", "1"),
            ("DOCKER_CERT_PATH", "/certs"),
        ]
        .into_iter()
        .collect();
        let spec = ConnectionSpec::from_env_with(|k| vars.get(k).map(|v| v.to_string())).unwrap();

        match spec {
            ConnectionSpec::Tcp { tls: Some(tls), .. } => {
                assert_eq!(tls.ca, Some(PathBuf::from("/certs/ca.pem")));
                assert_eq!(tls.cert, Some(PathBuf::from("/certs/cert.pem")));
                assert_eq!(tls.key, Some(PathBuf::from("/certs/key.pem")));
            }
            other => panic!("unexpected spec {other:?}"),
        }
    }

    #[test]
    fn env_without_host_uses_system_socket() {
        let spec = ConnectionSpec::from_env_with(|_| None).unwrap();
        assert_eq!(spec, ConnectionSpec::system_default());
    }

    #[test]
    fn deserializes_tagged_toml() {
        let spec: ConnectionSpec = toml::from_str(
            r#"
            transport = "ssh"
            host = "remote"
            [auth]
            user = "ops"
            "#,
        )
        .unwrap();
        assert_eq!(spec.describe(), "ssh://ops@remote:22");
        match spec {
            ConnectionSpec::Ssh {
                remote_socket_path, ..
            } => assert_eq!(remote_socket_path, DEFAULT_REMOTE_SOCKET),
            other => panic!("unexpected spec {other:?}"),
        }
    }
}
