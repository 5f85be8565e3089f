//! Nearby session error types.
//!
//! Nothing in this crate is fatal: every error here describes a local
//! failure that is either returned to the caller or logged and reported
//! through a session hook.

use thiserror::Error;

use crate::identity::PeerId;

/// Nearby session errors.
#[derive(Error, Debug)]
pub enum NearbyError {
    /// Service tag does not satisfy the discovery naming rules.
    #[error("Invalid service tag '{tag}': {reason}")]
    InvalidServiceTag {
        /// The rejected tag.
        tag: String,
        /// Which rule it broke.
        reason: &'static str,
    },

    /// Transport cannot guarantee encrypted connections.
    #[error("Transport does not guarantee encryption")]
    EncryptionRequired,

    /// Invitation was not answered before the deadline.
    #[error("Invitation to {0} timed out")]
    InviteTimeout(PeerId),

    /// Remote side declined the invitation at the transport level.
    #[error("Invitation to {0} was rejected")]
    InviteRejected(PeerId),

    /// Peer has never been discovered by this transport.
    #[error("Unknown peer: {0}")]
    UnknownPeer(PeerId),

    /// No open connection to the peer.
    #[error("Not connected to {0}")]
    NotConnected(PeerId),

    /// Delivery to a single peer failed.
    #[error("Send error: {0}")]
    Send(String),

    /// Control payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Frame exceeds the configured maximum size.
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced or actual frame size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Transport-level failure (endpoint, connection, stream).
    #[error("Transport error: {0}")]
    Transport(String),

    /// LAN discovery failure.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for nearby operations
pub type Result<T> = std::result::Result<T, NearbyError>;

impl From<toml::de::Error> for NearbyError {
    fn from(err: toml::de::Error) -> Self {
        NearbyError::Config(err.to_string())
    }
}

impl From<quinn::ConnectionError> for NearbyError {
    fn from(err: quinn::ConnectionError) -> Self {
        NearbyError::Transport(err.to_string())
    }
}

impl From<quinn::WriteError> for NearbyError {
    fn from(err: quinn::WriteError) -> Self {
        NearbyError::Transport(format!("Stream write failed: {err}"))
    }
}
