//! Player records exposed to the session consumer.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Last-known relationship between the local peer and a remote one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerStatus {
    /// Transport connected and consent granted
    Connected,
    /// Transport connection in progress
    Connecting,
    /// Reachable, not connected
    Available,
    /// No longer reachable; a removal signal
    Lost,
}

impl PeerStatus {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Available => "available",
            Self::Lost => "lost",
        }
    }
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A remote participant as seen by the consumer.
///
/// Equality covers `id` and `name` but never `status`, so the same peer
/// compares equal whatever its transient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    /// Stable identity
    pub id: PeerId,
    /// Display name
    pub name: String,
    /// Transient status
    pub status: Option<PeerStatus>,
}

impl Player {
    /// Create a player from a peer identity.
    pub fn new(id: PeerId, status: PeerStatus) -> Self {
        Self {
            name: id.display_name().to_string(),
            id,
            status: Some(status),
        }
    }

    /// Copy of this player with a different status.
    pub fn with_status(&self, status: PeerStatus) -> Self {
        Self {
            status: Some(status),
            ..self.clone()
        }
    }

    /// Check whether the status is `Connected`.
    pub fn is_connected(&self) -> bool {
        self.status == Some(PeerStatus::Connected)
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Eq for Player {}

impl Hash for Player {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
