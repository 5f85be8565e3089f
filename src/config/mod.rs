//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `nearby` binary)
//!
//! ```toml
//! [session]
//! service_tag = "ar-app-sample"
//! display_name = "alice"
//! invite_timeout_ms = 10000
//! consent_policy = "optimistic"
//!
//! [quic]
//! listen_addr = "0.0.0.0:0"
//!
//! [discovery]
//! port = 47474
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::{LanDiscoveryConfig, ServiceTag};
use crate::error::{NearbyError, Result};
use crate::session::SessionConfig;
use crate::transport::{CertConfig, Encryption, QuicTransportConfig};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Session configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// QUIC endpoint configuration
    #[serde(default)]
    pub quic: QuicSettings,

    /// LAN discovery configuration
    #[serde(default)]
    pub discovery: LanDiscoveryConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| NearbyError::Config(format!("Failed to read config file {path:?}: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| NearbyError::Config(format!("Failed to parse config: {e}")))
    }

    /// Default config file location (`<config dir>/nearby/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nearby").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from a variable lookup; unparsable values are
    /// logged and skipped.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // Session settings
        if let Some(tag) = var("NEARBY_SERVICE_TAG") {
            match ServiceTag::new(tag) {
                Ok(tag) => config.session.service_tag = tag,
                Err(e) => tracing::warn!("Ignoring NEARBY_SERVICE_TAG: {}", e),
            }
        }
        if let Some(name) = var("NEARBY_DISPLAY_NAME") {
            config.session.display_name = Some(name);
        }
        if let Some(secs) = var("NEARBY_INVITE_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => {
                    config.session = config
                        .session
                        .with_invite_timeout(Duration::from_secs(secs));
                }
                Err(e) => tracing::warn!("Ignoring NEARBY_INVITE_TIMEOUT_SECS: {}", e),
            }
        }
        if let Some(policy) = var("NEARBY_CONSENT_POLICY") {
            match policy.parse() {
                Ok(policy) => config.session.consent_policy = policy,
                Err(e) => tracing::warn!("Ignoring NEARBY_CONSENT_POLICY: {}", e),
            }
        }

        // Transport settings
        if let Some(addr) = var("NEARBY_LISTEN_ADDR") {
            match addr.parse() {
                Ok(addr) => config.quic.listen_addr = addr,
                Err(e) => tracing::warn!("Ignoring NEARBY_LISTEN_ADDR: {}", e),
            }
        }
        if let Some(port) = var("NEARBY_DISCOVERY_PORT") {
            match port.parse() {
                Ok(port) => config.discovery.port = port,
                Err(e) => tracing::warn!("Ignoring NEARBY_DISCOVERY_PORT: {}", e),
            }
        }

        config
    }

    /// Default file (when present) overridden by the environment
    pub fn load() -> Result<Self> {
        let base = match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!("Loading config from {:?}", path);
                Self::from_file(path)?
            }
            _ => Self::default(),
        };
        Ok(base.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        let session = SessionConfig::default();
        let quic = QuicSettings::default();
        let discovery = LanDiscoveryConfig::default();

        Self {
            session: SessionConfig {
                service_tag: pick(
                    self.session.service_tag,
                    other.session.service_tag,
                    &session.service_tag,
                ),
                display_name: other.session.display_name.or(self.session.display_name),
                invite_timeout_ms: pick(
                    self.session.invite_timeout_ms,
                    other.session.invite_timeout_ms,
                    &session.invite_timeout_ms,
                ),
                consent_policy: pick(
                    self.session.consent_policy,
                    other.session.consent_policy,
                    &session.consent_policy,
                ),
            },
            quic: QuicSettings {
                listen_addr: pick(self.quic.listen_addr, other.quic.listen_addr, &quic.listen_addr),
                encryption: pick(self.quic.encryption, other.quic.encryption, &quic.encryption),
                idle_timeout_secs: pick(
                    self.quic.idle_timeout_secs,
                    other.quic.idle_timeout_secs,
                    &quic.idle_timeout_secs,
                ),
                max_frame_size: pick(
                    self.quic.max_frame_size,
                    other.quic.max_frame_size,
                    &quic.max_frame_size,
                ),
                cert_path: other.quic.cert_path.or(self.quic.cert_path),
                key_path: other.quic.key_path.or(self.quic.key_path),
            },
            discovery: LanDiscoveryConfig {
                enabled: pick(self.discovery.enabled, other.discovery.enabled, &discovery.enabled),
                port: pick(self.discovery.port, other.discovery.port, &discovery.port),
                announce_interval_ms: pick(
                    self.discovery.announce_interval_ms,
                    other.discovery.announce_interval_ms,
                    &discovery.announce_interval_ms,
                ),
                peer_ttl_ms: pick(
                    self.discovery.peer_ttl_ms,
                    other.discovery.peer_ttl_ms,
                    &discovery.peer_ttl_ms,
                ),
                bind_addr: pick(
                    self.discovery.bind_addr,
                    other.discovery.bind_addr,
                    &discovery.bind_addr,
                ),
                broadcast_addr: pick(
                    self.discovery.broadcast_addr,
                    other.discovery.broadcast_addr,
                    &discovery.broadcast_addr,
                ),
            },
        }
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| NearbyError::Config(format!("Failed to render config: {e}")))
    }

    /// Transport configuration derived from the `quic` and `discovery` sections
    pub fn transport_config(&self) -> Result<QuicTransportConfig> {
        self.quic.to_transport_config(self.discovery.clone())
    }
}

fn pick<T: PartialEq>(base: T, other: T, default: &T) -> T {
    if &other != default {
        other
    } else {
        base
    }
}

/// QUIC endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuicSettings {
    /// Address to listen on
    pub listen_addr: SocketAddr,

    /// Encryption preference (only `required` is accepted)
    pub encryption: Encryption,

    /// Idle timeout in seconds
    pub idle_timeout_secs: u64,

    /// Largest accepted frame in bytes
    pub max_frame_size: usize,

    /// PEM certificate (self-signed when unset)
    pub cert_path: Option<PathBuf>,

    /// PEM PKCS8 private key
    pub key_path: Option<PathBuf>,
}

impl Default for QuicSettings {
    fn default() -> Self {
        let transport = QuicTransportConfig::default();
        Self {
            listen_addr: transport.listen_addr,
            encryption: transport.encryption,
            idle_timeout_secs: transport.max_idle_timeout.as_secs(),
            max_frame_size: transport.max_frame_size,
            cert_path: None,
            key_path: None,
        }
    }
}

impl QuicSettings {
    /// Build the transport configuration
    pub fn to_transport_config(
        &self,
        discovery: LanDiscoveryConfig,
    ) -> Result<QuicTransportConfig> {
        let cert = match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => CertConfig::from_files(cert, key),
            (None, None) => CertConfig::default(),
            _ => {
                return Err(NearbyError::Config(
                    "cert_path and key_path must be set together".to_string(),
                ))
            }
        };

        Ok(QuicTransportConfig {
            listen_addr: self.listen_addr,
            encryption: self.encryption,
            max_idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_frame_size: self.max_frame_size,
            discovery,
            ..QuicTransportConfig::default()
        }
        .with_cert(cert))
    }
}
