//! Transport configuration for TLS and QUIC.
//!
//! Handles certificate management, certificate pinning and QUIC-specific
//! settings. Peers do not share a certificate authority: every endpoint
//! presents its own certificate and advertises its SHA-256 fingerprint, and
//! inviters accept exactly the fingerprint they discovered.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rcgen::{Certificate, CertificateParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::frame::DEFAULT_MAX_FRAME_SIZE;
use crate::discovery::LanDiscoveryConfig;
use crate::error::{NearbyError, Result};

/// ALPN protocol identifier for nearby sessions.
pub const ALPN_NEARBY: &[u8] = b"nearby/1";

/// Server name presented during TLS; pinning makes it informational.
pub const SERVER_NAME: &str = "nearby";

/// Encryption preference for a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// Every connection is encrypted (the only accepted value)
    #[default]
    Required,
    /// Encrypt when possible
    Optional,
    /// Plaintext
    None,
}

/// Certificate configuration source.
#[derive(Debug, Clone)]
pub enum CertConfig {
    /// Generate a self-signed certificate for this process.
    SelfSigned {
        /// Common name for the certificate.
        common_name: String,
    },
    /// Load certificates from files.
    Files {
        /// Path to PEM certificate file.
        cert_path: PathBuf,
        /// Path to PEM private key file.
        key_path: PathBuf,
    },
    /// Use raw certificate data.
    Raw {
        /// DER-encoded certificate chain.
        cert_der: Vec<Vec<u8>>,
        /// DER-encoded private key (PKCS8).
        key_der: Vec<u8>,
    },
}

impl Default for CertConfig {
    fn default() -> Self {
        Self::SelfSigned {
            common_name: SERVER_NAME.to_string(),
        }
    }
}

impl CertConfig {
    /// Create configuration from PEM files, for a stable fingerprint across restarts.
    pub fn from_files(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self::Files {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Load and return the certificate chain and private key for rustls 0.21.
    pub fn load(&self) -> Result<(Vec<rustls::Certificate>, rustls::PrivateKey)> {
        match self {
            Self::SelfSigned { common_name } => {
                tracing::debug!("Generating self-signed certificate for '{}'", common_name);

                let mut params = CertificateParams::new(vec![common_name.clone()]);
                params.distinguished_name = rcgen::DistinguishedName::new();
                params
                    .distinguished_name
                    .push(rcgen::DnType::CommonName, common_name.clone());

                let cert = Certificate::from_params(params).map_err(|e| {
                    NearbyError::Config(format!("Failed to generate self-signed cert: {}", e))
                })?;

                let cert_der = rustls::Certificate(cert.serialize_der().map_err(|e| {
                    NearbyError::Config(format!("Failed to serialize cert: {}", e))
                })?);
                let key_der = rustls::PrivateKey(cert.serialize_private_key_der());

                Ok((vec![cert_der], key_der))
            }
            Self::Files { cert_path, key_path } => {
                let cert_pem = fs::read(cert_path).map_err(|e| {
                    NearbyError::Config(format!("Failed to read cert file {:?}: {}", cert_path, e))
                })?;

                let key_pem = fs::read(key_path).map_err(|e| {
                    NearbyError::Config(format!("Failed to read key file {:?}: {}", key_path, e))
                })?;

                let certs: Vec<rustls::Certificate> =
                    rustls_pemfile::certs(&mut cert_pem.as_slice())
                        .map_err(|e| {
                            NearbyError::Config(format!("Failed to parse cert PEM: {}", e))
                        })?
                        .into_iter()
                        .map(rustls::Certificate)
                        .collect();

                if certs.is_empty() {
                    return Err(NearbyError::Config(
                        "No certificates found in PEM file".to_string(),
                    ));
                }

                let key = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice())
                    .map_err(|e| NearbyError::Config(format!("Failed to parse key PEM: {}", e)))?
                    .into_iter()
                    .next()
                    .map(rustls::PrivateKey)
                    .ok_or_else(|| {
                        NearbyError::Config("No PKCS8 private key found in PEM file".to_string())
                    })?;

                Ok((certs, key))
            }
            Self::Raw { cert_der, key_der } => {
                if cert_der.is_empty() {
                    return Err(NearbyError::Config("Empty certificate chain".to_string()));
                }
                let certs = cert_der
                    .iter()
                    .map(|c| rustls::Certificate(c.clone()))
                    .collect();
                let key = rustls::PrivateKey(key_der.clone());
                Ok((certs, key))
            }
        }
    }
}

/// SHA-256 digest of a DER certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CertFingerprint([u8; 32]);

impl CertFingerprint {
    /// Fingerprint of a DER-encoded certificate.
    pub fn of(cert_der: &[u8]) -> Self {
        Self(Sha256::digest(cert_der).into())
    }

    /// Base64 form used in beacons.
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse the base64 form.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| NearbyError::Serialization(format!("Bad fingerprint encoding: {e}")))?;
        let digest: [u8; 32] = bytes.try_into().map_err(|_| {
            NearbyError::Serialization("Fingerprint must be 32 bytes".to_string())
        })?;
        Ok(Self(digest))
    }
}

impl std::fmt::Display for CertFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Accepts exactly one server certificate.
struct PinnedCertVerifier {
    expected: CertFingerprint,
}

impl rustls::client::ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        let presented = CertFingerprint::of(&end_entity.0);
        if presented == self.expected {
            Ok(rustls::client::ServerCertVerified::assertion())
        } else {
            tracing::warn!(
                "Certificate fingerprint mismatch: expected {}, got {}",
                self.expected,
                presented
            );
            Err(rustls::Error::General(
                "certificate fingerprint mismatch".to_string(),
            ))
        }
    }
}

/// TLS configuration for the QUIC transport.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Certificate source.
    pub cert: CertConfig,
    /// ALPN protocols to advertise.
    pub alpn_protocols: Vec<Vec<u8>>,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: CertConfig::default(),
            alpn_protocols: vec![ALPN_NEARBY.to_vec()],
        }
    }
}

/// QUIC transport configuration.
#[derive(Debug, Clone)]
pub struct QuicTransportConfig {
    /// Address to listen on (port 0 picks a free port).
    pub listen_addr: SocketAddr,
    /// TLS configuration.
    pub tls: TlsConfig,
    /// Encryption preference; only `Required` is accepted.
    pub encryption: Encryption,
    /// Maximum idle timeout before closing connection.
    pub max_idle_timeout: Duration,
    /// Keep-alive interval, keeping idle peers connected.
    pub keep_alive_interval: Duration,
    /// How long an inbound invitation waits for the local answer.
    pub handshake_timeout: Duration,
    /// Largest accepted frame.
    pub max_frame_size: usize,
    /// LAN discovery settings.
    pub discovery: LanDiscoveryConfig,
}

impl Default for QuicTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            tls: TlsConfig::default(),
            encryption: Encryption::Required,
            max_idle_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(crate::protocol::INVITE_TIMEOUT_SECS),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            discovery: LanDiscoveryConfig::default(),
        }
    }
}

impl QuicTransportConfig {
    /// Loopback configuration without LAN discovery, for tests and static peers.
    pub fn loopback() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            discovery: LanDiscoveryConfig {
                enabled: false,
                ..LanDiscoveryConfig::default()
            },
            ..Default::default()
        }
    }

    /// Set listen address.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set maximum idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.max_idle_timeout = timeout;
        self
    }

    /// Set certificate source.
    pub fn with_cert(mut self, cert: CertConfig) -> Self {
        self.tls.cert = cert;
        self
    }

    fn transport_config(&self) -> Result<quinn::TransportConfig> {
        let idle = quinn::IdleTimeout::try_from(self.max_idle_timeout)
            .map_err(|e| NearbyError::Config(format!("Invalid idle timeout: {}", e)))?;

        let mut transport_config = quinn::TransportConfig::default();
        transport_config.max_idle_timeout(Some(idle));
        transport_config.keep_alive_interval(Some(self.keep_alive_interval));
        Ok(transport_config)
    }

    /// Build quinn ServerConfig from loaded certificate material.
    pub fn build_server_config(
        &self,
        certs: Vec<rustls::Certificate>,
        key: rustls::PrivateKey,
    ) -> Result<quinn::ServerConfig> {
        let mut rustls_config = rustls::ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| NearbyError::Config(format!("Failed to build TLS config: {}", e)))?;
        rustls_config.alpn_protocols = self.tls.alpn_protocols.clone();

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(rustls_config));
        server_config.transport_config(Arc::new(self.transport_config()?));
        Ok(server_config)
    }

    /// Build a quinn ClientConfig that only trusts `expected`.
    pub fn build_client_config(&self, expected: CertFingerprint) -> Result<quinn::ClientConfig> {
        let mut rustls_config = rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_custom_certificate_verifier(Arc::new(PinnedCertVerifier { expected }))
            .with_no_client_auth();
        rustls_config.alpn_protocols = self.tls.alpn_protocols.clone();

        let mut client_config = quinn::ClientConfig::new(Arc::new(rustls_config));
        client_config.transport_config(Arc::new(self.transport_config()?));
        Ok(client_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cert_config_self_signed() {
        let (certs, _key) = CertConfig::default().load().unwrap();
        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn test_self_signed_fingerprints_differ() {
        let (a, _) = CertConfig::default().load().unwrap();
        let (b, _) = CertConfig::default().load().unwrap();
        assert_ne!(CertFingerprint::of(&a[0].0), CertFingerprint::of(&b[0].0));
    }

    #[test]
    fn test_fingerprint_base64() {
        let fingerprint = CertFingerprint::of(b"certificate");
        let parsed = CertFingerprint::from_base64(&fingerprint.to_base64()).unwrap();
        assert_eq!(parsed, fingerprint);
        assert!(CertFingerprint::from_base64("c2hvcnQ=").is_err());
        assert!(CertFingerprint::from_base64("not base64!").is_err());
    }

    #[test]
    fn test_missing_cert_files() {
        let config = CertConfig::from_files("/nonexistent/cert.pem", "/nonexistent/key.pem");
        assert!(matches!(config.load(), Err(NearbyError::Config(_))));
    }

    #[test]
    fn test_quic_config_default() {
        let config = QuicTransportConfig::default();
        assert_eq!(config.listen_addr.port(), 0);
        assert_eq!(config.encryption, Encryption::Required);
        assert_eq!(config.tls.alpn_protocols, vec![ALPN_NEARBY.to_vec()]);
        assert!(config.discovery.enabled);
        assert!(!QuicTransportConfig::loopback().discovery.enabled);
    }

    #[test]
    fn test_builds_quinn_configs() {
        let config = QuicTransportConfig::loopback();
        let (certs, key) = config.tls.cert.load().unwrap();
        let fingerprint = CertFingerprint::of(&certs[0].0);
        assert!(config.build_server_config(certs, key).is_ok());
        assert!(config.build_client_config(fingerprint).is_ok());
    }
}
