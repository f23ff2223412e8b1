//! rustls client configuration.

use crate::error::TlsError;
use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use std::path::Path;
use std::sync::Arc;

/// ALPN identifier for HTTP/2 over TLS.
pub const ALPN_H2: &[u8] = b"h2";

/// TLS configuration for client channels.
///
/// Cheap to clone; every channel created from the same config shares one
/// `rustls::ClientConfig`.
#[derive(Clone)]
pub struct TlsConfig {
    config: Arc<rustls::ClientConfig>,
}

impl TlsConfig {
    /// Webpki root certificates, ALPN `h2`.
    pub fn new() -> Self {
        let root_store =
            rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::from_root_store(root_store)
    }

    /// Trust only the given certificates, ALPN `h2`.
    pub fn with_root_certificates<I>(certs: I) -> Result<Self, TlsError>
    where
        I: IntoIterator<Item = CertificateDer<'static>>,
    {
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs {
            root_store.add(cert)?;
        }
        Ok(Self::from_root_store(root_store))
    }

    /// Trust the certificates in a PEM bundle, ALPN `h2`.
    pub fn from_pem_file(path: &Path) -> Result<Self, TlsError> {
        let certs = CertificateDer::pem_file_iter(path)
            .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Certificate(format!("{}: {}", path.display(), e)))?;

        if certs.is_empty() {
            return Err(TlsError::Certificate(format!(
                "{}: no certificates found",
                path.display()
            )));
        }

        Self::with_root_certificates(certs)
    }

    fn from_root_store(root_store: rustls::RootCertStore) -> Self {
        let mut config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        Self {
            config: Arc::new(config),
        }
    }

    /// Replace the offered ALPN protocols.
    pub fn with_alpn(mut self, protocols: Vec<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.config).alpn_protocols = protocols;
        self
    }

    /// The ALPN protocols offered in the ClientHello.
    pub fn alpn_protocols(&self) -> &[Vec<u8>] {
        &self.config.alpn_protocols
    }

    pub(crate) fn client_config(&self) -> Arc<rustls::ClientConfig> {
        self.config.clone()
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new()
    }
}
