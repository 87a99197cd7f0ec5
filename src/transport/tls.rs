//! TLS client configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::transport::connection_spec::TlsSpec;
use crate::transport::error::ConnectError;

/// Build a connector from certificate files.
pub fn load_connector(spec: &TlsSpec) -> Result<TlsConnector, ConnectError> {
    Ok(TlsConnector::from(Arc::new(client_config(spec)?)))
}

/// Build the rustls client configuration for a TLS engine.
pub fn client_config(spec: &TlsSpec) -> Result<ClientConfig, ConnectError> {
    let mut roots = RootCertStore::empty();
    match &spec.ca {
        Some(ca) => {
            for cert in read_certs(ca)? {
                roots
                    .add(cert)
                    .map_err(|e| ConnectError::TlsConfig(format!("bad CA in {}: {e}", ca.display())))?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConnectError::TlsConfig(e.to_string()))?
    .with_root_certificates(roots);

    let config = match (&spec.cert, &spec.key) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs(cert)?, read_key(key)?)
            .map_err(|e| ConnectError::TlsConfig(e.to_string()))?,
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ConnectError::TlsConfig(
                "client certificate and key must be given together".to_string(),
            ))
        }
    };

    Ok(config)
}

/// Name to verify the engine's certificate against.
pub fn server_name(spec: &TlsSpec, host: &str) -> Result<ServerName<'static>, ConnectError> {
    let name = spec.server_name.as_deref().unwrap_or(host).to_string();
    ServerName::try_from(name.clone())
        .map_err(|_| ConnectError::TlsConfig(format!("invalid server name {name:?}")))
}

fn open(path: &Path) -> Result<BufReader<File>, ConnectError> {
    // Basic validation
    if !path.exists() {
        return Err(ConnectError::TlsConfig(format!(
            "file not found: {}",
            path.display()
        )));
    }
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ConnectError::TlsConfig(format!("{}: {e}", path.display())))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectError::TlsConfig(format!("{}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ConnectError::TlsConfig(format!(
            "no certificates in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConnectError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| ConnectError::TlsConfig(format!("{}: {e}", path.display())))?
        .ok_or_else(|| ConnectError::TlsConfig(format!("no private key in {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn public_roots_without_ca() {
        assert!(client_config(&TlsSpec::default()).is_ok());
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let spec = TlsSpec {
            ca: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..Default::default()
        };
        let err = client_config(&spec).unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn empty_ca_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a certificate").unwrap();
        let spec = TlsSpec {
            ca: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let err = client_config(&spec).unwrap_err();
        assert!(err.to_string().contains("no certificates"));
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let spec = TlsSpec {
            cert: Some(PathBuf::from("cert.pem")),
            ..Default::default()
        };
        assert!(matches!(client_config(&spec), Err(ConnectError::TlsConfig(_))));
    }

    #[test]
    fn server_name_override() {
        let spec = TlsSpec {
            server_name: Some("engine.internal".to_string()),
            ..Default::default()
        };
        let name = server_name(&spec, "10.0.0.1").unwrap();
        assert_eq!(name.to_str(), "engine.internal");
        assert!(server_name(&TlsSpec::default(), "10.0.0.1").is_ok());
    }
}
