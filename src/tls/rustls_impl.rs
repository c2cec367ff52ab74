use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio::io::{AsyncRead, AsyncWrite};

/// TLS setup and negotiation failures.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("TLS I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS configuration error: {0}")]
    Configuration(String),
    #[error("no certificates found in PEM input")]
    NoCertificatesFound,
    #[error("no private key found in PEM input")]
    NoPrivateKeyFound,
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(String),
}

impl From<TlsError> for crate::Error {
    fn from(err: TlsError) -> Self {
        Self::Tls(err.to_string())
    }
}

/// An encrypted transport, client or server side.
pub type TlsStream<S> = tokio_rustls::TlsStream<S>;

/// Wraps outgoing transports for `wss://` targets.
#[derive(Clone)]
pub struct TlsConnector(tokio_rustls::TlsConnector);

impl TlsConnector {
    #[must_use]
    pub fn new(config: Arc<rustls::ClientConfig>) -> Self {
        Self(config.into())
    }

    /// Negotiate TLS over `stream`, verifying the certificate against
    /// `host`.
    ///
    /// # Errors
    ///
    /// `TlsError::InvalidDnsName` when `host` is not a server name;
    /// `TlsError::Io` when negotiation fails, certificate rejection included.
    pub async fn connect<S>(&self, host: &str, stream: S) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = ServerName::try_from(host.to_owned())
            .map_err(|_| TlsError::InvalidDnsName(host.to_owned()))?;
        let stream = self.0.connect(name, stream).await?;
        Ok(stream.into())
    }
}

/// Wraps accepted transports when the server terminates TLS.
#[derive(Clone)]
pub struct TlsAcceptor(tokio_rustls::TlsAcceptor);

impl TlsAcceptor {
    #[must_use]
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self(config.into())
    }

    /// # Errors
    ///
    /// `TlsError::Io` when negotiation fails.
    pub async fn accept<S>(&self, stream: S) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let stream = self.0.accept(stream).await?;
        Ok(stream.into())
    }
}

fn open_pem(path: &Path) -> Result<BufReader<File>, TlsError> {
    Ok(BufReader::new(File::open(path)?))
}

/// Every certificate in a PEM file, in file order.
///
/// # Errors
///
/// `TlsError::Io` if the file is unreadable; `TlsError::NoCertificatesFound`
/// if it holds none.
pub fn load_certs_from_file(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open_pem(path)?).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        Err(TlsError::NoCertificatesFound)
    } else {
        Ok(certs)
    }
}

/// The first private key in a PEM file (PKCS#1, PKCS#8 or SEC1).
///
/// # Errors
///
/// `TlsError::Io` if the file is unreadable; `TlsError::NoPrivateKeyFound`
/// if it holds no key.
pub fn load_private_key_from_file(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open_pem(path)?)?.ok_or(TlsError::NoPrivateKeyFound)
}
