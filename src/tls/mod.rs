//! TLS support for `wss://` connections (feature `tls-rustls`).
//!
//! Every configuration built here uses the `ring` crypto provider
//! explicitly, so nothing depends on a process-wide default provider.

mod rustls_impl;

pub use rustls_impl::{
    TlsAcceptor, TlsConnector, TlsError, TlsStream, load_certs_from_file,
    load_private_key_from_file,
};

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};

fn provider() -> Arc<rustls::crypto::CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Client configuration trusting the Mozilla root store from `webpki-roots`.
///
/// # Errors
///
/// Returns `TlsError::Configuration` if the provider rejects the default
/// protocol versions.
pub fn default_client_config() -> Result<Arc<ClientConfig>, TlsError> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    client_config_from_store(roots)
}

/// Client configuration trusting only `roots`, e.g. a private CA or a
/// self-signed server certificate.
///
/// # Errors
///
/// Returns `TlsError::Configuration` if a certificate cannot be parsed.
pub fn client_config_with_roots(
    roots: impl IntoIterator<Item = CertificateDer<'static>>,
) -> Result<Arc<ClientConfig>, TlsError> {
    let mut store = RootCertStore::empty();
    for cert in roots {
        store
            .add(cert)
            .map_err(|e| TlsError::Configuration(e.to_string()))?;
    }
    client_config_from_store(store)
}

fn client_config_from_store(roots: RootCertStore) -> Result<Arc<ClientConfig>, TlsError> {
    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Configuration(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Server configuration presenting `cert_chain`.
///
/// # Errors
///
/// Returns `TlsError::Configuration` if the key does not match the chain.
pub fn server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>, TlsError> {
    let config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Configuration(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|e| TlsError::Configuration(e.to_string()))?;
    Ok(Arc::new(config))
}
