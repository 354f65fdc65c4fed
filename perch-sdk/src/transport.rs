//! Transport establishment: one plaintext or TLS connection attempt.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Buffered read half of the server connection.
pub(crate) type Reader = Box<dyn AsyncBufRead + Send + Unpin>;
/// Write half of the server connection.
pub(crate) type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Open one connection to the configured server.
///
/// Errors here are transient: the reconnect loop retries them on a
/// fixed interval.
pub(crate) async fn connect(config: &ClientConfig) -> Result<(Reader, Writer)> {
    let addr = config.addr();
    let tcp = TcpStream::connect(&addr).await?;
    tracing::debug!(%addr, secured = config.secured, "transport connected");

    if config.secured {
        let tls_config = if config.danger_accept_invalid_certs {
            insecure_config()
        } else {
            default_config()
        };
        let connector = TlsConnector::from(Arc::new(tls_config));
        let tls = connector.connect(server_name(&config.server)?, tcp).await?;
        tracing::debug!("TLS handshake complete");
        let (reader, writer) = tokio::io::split(tls);
        Ok((Box::new(BufReader::new(reader)), Box::new(writer)))
    } else {
        let (reader, writer) = tokio::io::split(tcp);
        Ok((Box::new(BufReader::new(reader)), Box::new(writer)))
    }
}

/// Validate the configured host as a TLS server name.
///
/// Also called once at startup so that a host rustls cannot name is a
/// startup error instead of an endless retry.
pub(crate) fn server_name(host: &str) -> Result<rustls::pki_types::ServerName<'static>, ClientError> {
    rustls::pki_types::ServerName::try_from(host.to_string()).map_err(|_| ClientError::ServerName {
        host: host.to_string(),
    })
}

fn install_crypto_provider() {
    // rustls needs an explicit provider selection; ring is the
    // alternative for targets where aws-lc-rs does not build.
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

fn insecure_config() -> rustls::ClientConfig {
    install_crypto_provider();
    rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DisabledVerifier))
        .with_no_client_auth()
}

/// Accepts any server certificate. Only reachable through
/// `danger_accept_invalid_certs`.
#[derive(Debug)]
struct DisabledVerifier;

impl rustls::client::danger::ServerCertVerifier for DisabledVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::CryptoProvider::get_default()
            .map(|p| p.signature_verification_algorithms.supported_schemes())
            .unwrap_or_default()
    }
}
