//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, capacities > 0, ports valid)
//! - Check TLS and SSH material is coherent
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>

use std::fmt;

use crate::config::schema::ClientConfig;
use crate::transport::ConnectionSpec;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.identity.trim().is_empty() {
        errors.push(ValidationError::new("identity", "must not be empty"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::new("timeouts.connect_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.demux.buffer_capacity == 0 {
        errors.push(ValidationError::new("demux.buffer_capacity", "must be greater than 0"));
    }
    if config.demux.max_frame_bytes == Some(0) {
        errors.push(ValidationError::new("demux.max_frame_bytes", "must be greater than 0 when set"));
    }
    if config.progress.buffer_capacity == 0 {
        errors.push(ValidationError::new("progress.buffer_capacity", "must be greater than 0"));
    }
    if config.progress.max_line_bytes == Some(0) {
        errors.push(ValidationError::new("progress.max_line_bytes", "must be greater than 0 when set"));
    }

    match &config.connection {
        ConnectionSpec::UnixSocket { path } if path.as_os_str().is_empty() => {
            errors.push(ValidationError::new("connection.path", "must not be empty"));
        }
        ConnectionSpec::NamedPipe { path } if path.is_empty() => {
            errors.push(ValidationError::new("connection.path", "must not be empty"));
        }
        ConnectionSpec::Tcp { host, port, tls, .. } => {
            if host.is_empty() {
                errors.push(ValidationError::new("connection.host", "must not be empty"));
            }
            if *port == 0 {
                errors.push(ValidationError::new("connection.port", "must be greater than 0"));
            }
            if let Some(tls) = tls {
                if tls.cert.is_some() != tls.key.is_some() {
                    errors.push(ValidationError::new(
                        "connection.tls",
                        "cert and key must be given together",
                    ));
                }
            }
        }
        ConnectionSpec::Ssh {
            host,
            port,
            remote_socket_path,
            ..
        } => {
            if host.is_empty() {
                errors.push(ValidationError::new("connection.host", "must not be empty"));
            }
            if *port == 0 {
                errors.push(ValidationError::new("connection.port", "must be greater than 0"));
            }
            if !remote_socket_path.starts_with('/') {
                errors.push(ValidationError::new(
                    "connection.remote_socket_path",
                    "must be an absolute path",
                ));
            }
        }
        _ => {}
    }

    if config.ssh.program.is_empty() {
        errors.push(ValidationError::new("ssh.program", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{SshAuth, TlsSpec};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ClientConfig::default();
        config.identity = " ".to_string();
        config.timeouts.request_secs = 0;
        config.demux.buffer_capacity = 0;
        config.connection = ConnectionSpec::Tcp {
            host: "engine".to_string(),
            port: 0,
            tls: Some(TlsSpec {
                key: Some("key.pem".into()),
                ..TlsSpec::default()
            }),
            path_prefix: None,
        };

        let fields: Vec<_> = validate_config(&config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            [
                "identity",
                "timeouts.request_secs",
                "demux.buffer_capacity",
                "connection.port",
                "connection.tls",
            ]
        );
    }

    #[test]
    fn remote_socket_must_be_absolute() {
        let mut config = ClientConfig::default();
        config.connection = ConnectionSpec::Ssh {
            host: "remote".to_string(),
            port: 22,
            auth: SshAuth::default(),
            remote_socket_path: "docker.sock".to_string(),
        };
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "connection.remote_socket_path: must be an absolute path");
    }
}
