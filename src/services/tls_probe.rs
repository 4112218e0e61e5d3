//! TLS certificate retrieval for the expiry check.
//!
//! Performs a handshake with server verification disabled (the probe
//! only wants the peer certificate, which is available before any
//! application data flows) and parses `notAfter` out of the DER.

use chrono::{DateTime, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

#[derive(Debug, Error)]
pub enum TlsProbeError {
    #[error("invalid endpoint host name: {0}")]
    InvalidHostName(String),

    #[error("handshake yielded no peer certificate")]
    NoPeerCertificate,

    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate verifier that accepts anything. Only used to *retrieve*
/// the peer chain; no data is exchanged over the session.
#[derive(Debug)]
struct RetrievalOnlyVerifier(CryptoProvider);

impl ServerCertVerifier for RetrievalOnlyVerifier {
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
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Fetch the server certificate of `host:port` and return its `notAfter`.
pub async fn certificate_not_after(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<DateTime<Utc>, TlsProbeError> {
    let provider = rustls::crypto::ring::default_provider();
    let config = ClientConfig::builder_with_provider(Arc::new(provider.clone()))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(RetrievalOnlyVerifier(provider)))
        .with_no_client_auth();

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TlsProbeError::InvalidHostName(host.to_string()))?;

    let handshake = async {
        let stream = TcpStream::connect((host, port)).await?;
        let connector = TlsConnector::from(Arc::new(config));
        let tls = connector.connect(server_name, stream).await?;
        let (_io, session) = tls.get_ref();
        let chain = session
            .peer_certificates()
            .ok_or(TlsProbeError::NoPeerCertificate)?;
        let leaf = chain.first().ok_or(TlsProbeError::NoPeerCertificate)?;
        not_after_from_der(leaf.as_ref())
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| {
            TlsProbeError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "tls handshake timed out",
            ))
        })?
}

/// Parse `notAfter` out of a DER-encoded certificate.
pub fn not_after_from_der(der: &[u8]) -> Result<DateTime<Utc>, TlsProbeError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|err| TlsProbeError::CertificateParse(err.to_string()))?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| TlsProbeError::CertificateParse("notAfter out of range".to_string()))
}

/// Days until expiry, negative when already expired.
pub fn days_until_expiry(not_after: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (not_after - now).num_days()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_days_until_expiry() {
        let now = Utc::now();
        assert_eq!(days_until_expiry(now + ChronoDuration::days(10), now), 10);
        assert_eq!(days_until_expiry(now - ChronoDuration::days(3), now), -3);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_an_io_error() {
        // nothing listens on this port
        let result =
            certificate_not_after("127.0.0.1", 1, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TlsProbeError::Io(_))));
    }
}
