//! QUIC client configuration: `InsecureSkipVerify=true` unless the caller
//! overrides, ALPN `"tunnox-quic"`, idle 30 s, keepalive 10 s.

use std::sync::Arc;
use std::time::Duration;

use quinn::ClientConfig as QuinnClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};

pub const ALPN: &[u8] = b"tunnox-quic";

#[derive(Debug, Clone)]
pub struct QuicConfig {
    pub insecure_skip_verify: bool,
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            insecure_skip_verify: true,
            idle_timeout: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

impl QuicConfig {
    pub fn client_insecure() -> Self {
        Self::default()
    }

    pub fn client_verified() -> Self {
        Self {
            insecure_skip_verify: false,
            ..Self::default()
        }
    }

    pub fn to_quinn_client_config(&self) -> anyhow::Result<QuinnClientConfig> {
        let crypto = if self.insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };
        let mut crypto = crypto;
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)?;
        let mut client_config = QuinnClientConfig::new(Arc::new(quic_crypto));
        let mut transport = quinn::TransportConfig::default();
        transport.max_idle_timeout(Some(self.idle_timeout.try_into()?));
        transport.keep_alive_interval(Some(self.keepalive_interval));
        client_config.transport_config(Arc::new(transport));
        Ok(client_config)
    }
}

/// Accepts any certificate. Only ever used when `insecure_skip_verify` is
/// set, matching `transport_discovery.rs`'s `SkipVerification` verifier.
#[derive(Debug)]
struct SkipServerVerification;

impl ServerCertVerifier for SkipServerVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
