//! Peer discovery: service scoping and the nearby-peer list.
//!
//! Discovery is split in two layers:
//!
//! - **Wire** ([`beacon`], [`lan`]): how a transport announces itself and
//!   observes other peers on the local network.
//! - **Bookkeeping** ([`NearbyPeers`]): the ordered, duplicate-free list of
//!   peers the session currently considers nearby.
//!
//! ```text
//!   PeerFound(P) ──> NearbyPeers::found ──> Some(Player{Available}) ──> nearby hook
//!   PeerLost(P)  ──> NearbyPeers::lost  ──> Player{Lost}             ──> nearby hook
//! ```

pub mod beacon;
pub mod lan;

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{NearbyError, Result};
use crate::identity::PeerId;
use crate::peer::{PeerStatus, Player};

pub use beacon::{Beacon, BEACON_MAGIC, BEACON_VERSION};
pub use lan::{AddressBook, LanDiscovery, LanDiscoveryConfig, DEFAULT_DISCOVERY_PORT};

/// Maximum service tag length.
pub const MAX_SERVICE_TAG_LEN: usize = 15;

/// Service tag used when none is configured.
pub const DEFAULT_SERVICE_TAG: &str = "ar-app-sample";

const SERVICE_TAG_PATTERN: &str = r"^[a-z0-9]+(-[a-z0-9]+)*$";

lazy_static! {
    static ref SERVICE_TAG_REGEX: Option<Regex> = Regex::new(SERVICE_TAG_PATTERN).ok();
}

/// Validated discovery scope.
///
/// 1-15 characters of lowercase ASCII letters, digits and single hyphens,
/// containing at least one letter and neither starting nor ending with a
/// hyphen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceTag(String);

impl ServiceTag {
    /// Validate and wrap a tag.
    pub fn new(tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        let invalid = |reason| NearbyError::InvalidServiceTag {
            tag: tag.clone(),
            reason,
        };

        if tag.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if tag.len() > MAX_SERVICE_TAG_LEN {
            return Err(invalid("must be at most 15 characters"));
        }
        let well_formed = SERVICE_TAG_REGEX
            .as_ref()
            .is_some_and(|re| re.is_match(&tag));
        if !well_formed {
            return Err(invalid(
                "only lowercase letters, digits and single inner hyphens are allowed",
            ));
        }
        if !tag.chars().any(|c| c.is_ascii_lowercase()) {
            return Err(invalid("must contain at least one letter"));
        }

        Ok(Self(tag))
    }

    /// Tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ServiceTag {
    fn default() -> Self {
        Self(DEFAULT_SERVICE_TAG.to_string())
    }
}

impl fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceTag {
    type Err = NearbyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ServiceTag {
    type Error = NearbyError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ServiceTag> for String {
    fn from(tag: ServiceTag) -> Self {
        tag.0
    }
}

/// Ordered list of nearby players, at most one entry per identity.
#[derive(Debug, Clone, Default)]
pub struct NearbyPeers {
    players: Vec<Player>,
}

impl NearbyPeers {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a discovered peer.
    ///
    /// Returns the new `Available` player, or `None` when the peer is
    /// already listed.
    pub fn found(&mut self, peer: PeerId) -> Option<Player> {
        if self.contains(&peer) {
            return None;
        }
        let player = Player::new(peer, PeerStatus::Available);
        self.players.push(player.clone());
        Some(player)
    }

    /// Remove a peer and return it with status `Lost`.
    ///
    /// The `Lost` player is returned even when nothing was listed.
    pub fn lost(&mut self, peer: &PeerId) -> Player {
        self.players.retain(|player| &player.id != peer);
        Player::new(peer.clone(), PeerStatus::Lost)
    }

    /// Update the status of a listed peer in place.
    ///
    /// Returns `false` when the peer is not listed.
    pub fn set_status(&mut self, peer: &PeerId, status: PeerStatus) -> bool {
        match self.players.iter_mut().find(|player| &player.id == peer) {
            Some(player) => {
                player.status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Look up a listed peer.
    pub fn get(&self, peer: &PeerId) -> Option<&Player> {
        self.players.iter().find(|player| &player.id == peer)
    }

    /// Check whether a peer is listed.
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.get(peer).is_some()
    }

    /// Copy of the list in insertion order.
    pub fn snapshot(&self) -> Vec<Player> {
        self.players.clone()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    /// Number of listed peers.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// Check whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
