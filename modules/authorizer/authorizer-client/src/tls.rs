//! rustls configuration and the HTTPS connector shared by the gRPC and REST clients.

use std::path::Path;
use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, aws_lc_rs};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};

use crate::config::{ClientConfig, ConfigError};

/// Build the rustls client configuration for `config`.
///
/// Roots come from `ca_cert_path` when set, otherwise from the platform
/// store. `insecure` disables server verification entirely.
///
/// # Errors
///
/// Returns [`ConfigError::Read`] for unreadable PEM files and
/// [`ConfigError::Tls`] when rustls rejects the resulting material.
pub fn client_config(config: &ClientConfig) -> Result<rustls::ClientConfig, ConfigError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?;

    let builder = if config.insecure {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerification(provider)))
    } else {
        builder.with_root_certificates(root_store(config.ca_cert_path.as_deref())?)
    };

    match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert), Some(key)) => builder
            .with_client_auth_cert(read_certs(cert)?, read_key(key)?)
            .map_err(|e| ConfigError::Tls(e.to_string())),
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(ConfigError::IncompleteClientCert),
    }
}

/// HTTP/1 + HTTP/2 connector; plain `http://` URIs bypass TLS.
///
/// # Errors
///
/// Same as [`client_config`].
pub fn https_connector(config: &ClientConfig) -> Result<HttpsConnector<HttpConnector>, ConfigError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(crate::config::DEFAULT_CONNECT_TIMEOUT));

    Ok(HttpsConnectorBuilder::new()
        .with_tls_config(client_config(config)?)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http))
}

fn root_store(ca_cert_path: Option<&Path>) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();
    if let Some(path) = ca_cert_path {
        let (added, _) = roots.add_parsable_certificates(read_certs(path)?);
        if added == 0 {
            return Err(ConfigError::Tls(format!(
                "no certificates found in '{}'",
                path.display()
            )));
        }
        return Ok(roots);
    }

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::warn!(error = %err, "failed to load a platform root certificate");
    }
    roots.add_parsable_certificates(native.certs);
    Ok(roots)
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    CertificateDer::pem_file_iter(path)
        .and_then(|certs| certs.collect::<Result<Vec<_>, _>>())
        .map_err(|e| read_error(path, &e))
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| read_error(path, &e))
}

fn read_error(path: &Path, err: &rustls_pki_types::pem::Error) -> ConfigError {
    ConfigError::Read {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

/// Accepts any server certificate; handshake signatures are still checked.
#[derive(Debug)]
struct SkipVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
