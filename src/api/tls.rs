//! HTTPS listener configuration
//!
//! The certificate chain and key come from the `[ssl]` section as base64
//! encoded PEM. They are decoded once at startup; TLS 1.2 is the lowest
//! protocol version offered.

use std::sync::Arc;

use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::CertificateDer;
use tokio_rustls::rustls::{self, version, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::config::SslConfig;

/// TLS setup errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("ssl.{field} is not valid base64: {source}")]
    InvalidBase64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to read PEM data: {0}")]
    Pem(#[from] std::io::Error),

    #[error("ssl.b64cert contains no certificate")]
    NoCertificate,

    #[error("ssl.b64key contains no private key")]
    NoPrivateKey,

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build the rustls server configuration from the `[ssl]` section
pub fn load_tls_config(ssl: &SslConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_pem = ssl.cert_pem().map_err(|source| TlsError::InvalidBase64 {
        field: "b64cert",
        source,
    })?;
    let key_pem = ssl.key_pem().map_err(|source| TlsError::InvalidBase64 {
        field: "b64key",
        source,
    })?;

    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_pem.as_slice()).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificate);
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())?.ok_or(TlsError::NoPrivateKey)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(&[&version::TLS13, &version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Acceptor for the API listener, or None when HTTPS is not configured
pub fn acceptor(ssl: &SslConfig) -> Result<Option<TlsAcceptor>, TlsError> {
    if !ssl.enabled() {
        return Ok(None);
    }
    Ok(Some(TlsAcceptor::from(load_tls_config(ssl)?)))
}


#[cfg(test)]
pub(crate) use tests::{test_ssl, TEST_CERT};
