//! LAN beacon packet format.
//!
//! A beacon is the magic header followed by a JSON body. Packets without
//! the header, with an unknown version or a malformed body are ignored by
//! the browser.

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Protocol magic identifying nearby beacons.
pub const BEACON_MAGIC: &[u8; 4] = b"NRBY";

/// Beacon format version.
pub const BEACON_VERSION: u8 = 1;

/// Maximum beacon size that fits a single UDP datagram on most links.
pub const MAX_BEACON_SIZE: usize = 1400;

/// Presence announcement broadcast by an advertiser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    /// Format version.
    pub version: u8,
    /// Service tag the peer advertises under.
    pub service: String,
    /// Announcing peer.
    pub peer: PeerId,
    /// QUIC port accepting invitations.
    pub port: u16,
    /// Base64 SHA-256 of the peer's certificate.
    pub fingerprint: String,
    /// Set on the final beacon when advertising stops.
    #[serde(default)]
    pub leaving: bool,
}

impl Beacon {
    /// Create a presence beacon.
    pub fn new(service: &str, peer: PeerId, port: u16, fingerprint: &str) -> Self {
        Self {
            version: BEACON_VERSION,
            service: service.to_string(),
            peer,
            port,
            fingerprint: fingerprint.to_string(),
            leaving: false,
        }
    }

    /// Copy of this beacon announcing departure.
    pub fn leaving(&self) -> Self {
        Self {
            leaving: true,
            ..self.clone()
        }
    }

    /// Serialize with magic header.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        let json = serde_json::to_vec(self).ok()?;
        let mut bytes = Vec::with_capacity(BEACON_MAGIC.len() + json.len());
        bytes.extend_from_slice(BEACON_MAGIC);
        bytes.extend(json);
        if bytes.len() > MAX_BEACON_SIZE {
            return None;
        }
        Some(bytes)
    }

    /// Deserialize, validating magic header and version.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let body = bytes.strip_prefix(BEACON_MAGIC.as_slice())?;
        let beacon: Beacon = serde_json::from_slice(body).ok()?;
        if beacon.version != BEACON_VERSION {
            return None;
        }
        Some(beacon)
    }
}
