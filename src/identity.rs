//! Local and remote peer identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback display name when the host name cannot be determined.
pub const DEFAULT_DISPLAY_NAME: &str = "nearby-peer";

/// Stable identity of a participant.
///
/// Two `PeerId`s are equal when their `id` matches; the display name is
/// carried for humans only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerId {
    id: Uuid,
    display_name: String,
}

impl PeerId {
    /// Create a fresh identity with the given display name.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
        }
    }

    /// Rebuild an identity from known parts (e.g. read from a beacon).
    pub fn from_parts(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }

    /// Create the local identity, named after this host.
    pub fn local() -> Self {
        Self::new(host_name())
    }

    /// Unique identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Human-readable name.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

impl PartialEq for PeerId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerId {}

impl Hash for PeerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name, short_id(&self.id))
    }
}

fn short_id(id: &Uuid) -> String {
    id.simple().to_string().chars().take(8).collect()
}

/// Best-effort host name from the environment.
fn host_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string())
}
