//! TLS client configuration for HTTPS connections.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::{Error, Result};

/// Configuration for TLS connections.
#[derive(Clone)]
pub struct TlsConfig {
    /// Pre-built `rustls` client configuration.
    pub client_config: Arc<rustls::ClientConfig>,
}

impl std::fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConfig")
            .field("client_auth", &self.client_config.client_auth_cert_resolver.has_certs())
            .finish()
    }
}

impl TlsConfig {
    /// TLS config trusting the Mozilla root certificate store.
    pub fn with_webpki_roots() -> Result<Self> {
        let config = Self::builder()?
            .with_root_certificates(webpki_roots_store())
            .with_no_client_auth();

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    /// TLS config presenting a client certificate loaded from PEM files.
    ///
    /// `key_file` holds the private key (PKCS#8, PKCS#1 or SEC1) and
    /// `cert_file` the certificate chain, leaf first.
    pub fn with_client_auth(key_file: &Path, cert_file: &Path) -> Result<Self> {
        let certs = load_certs(cert_file)?;
        let key = load_private_key(key_file)?;

        let config = Self::builder()?
            .with_root_certificates(webpki_roots_store())
            .with_client_auth_cert(certs, key)?;

        Ok(Self {
            client_config: Arc::new(config),
        })
    }

    fn builder() -> Result<rustls::ConfigBuilder<rustls::ClientConfig, rustls::WantsVerifier>> {
        Ok(rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()?)
    }

    /// Create a TLS config that **skips certificate verification**.
    ///
    /// # Warning
    ///
    /// This is intended **only for testing**. Do not use in production.
    #[cfg(test)]
    pub(crate) fn dangerous_no_verify() -> Self {
        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .expect("safe default protocol versions")
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoVerifier))
        .with_no_client_auth();

        Self {
            client_config: Arc::new(config),
        }
    }
}

impl From<Arc<rustls::ClientConfig>> for TlsConfig {
    fn from(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self { client_config }
    }
}

impl From<rustls::ClientConfig> for TlsConfig {
    fn from(client_config: rustls::ClientConfig) -> Self {
        Self::from(Arc::new(client_config))
    }
}

fn webpki_roots_store() -> rustls::RootCertStore {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    root_store
}

fn open_pem(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::TlsMaterial(format!("{}: {}", path.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsMaterial(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Error::TlsMaterial(format!(
            "{}: no certificates found",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open_pem(path)?)
        .map_err(|e| Error::TlsMaterial(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| Error::TlsMaterial(format!("{}: no private key found", path.display())))
}

#[cfg(test)]
mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerifier;

    impl ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
