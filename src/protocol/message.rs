//! Control payloads exchanged over an open connection.
//!
//! Consent decisions travel as a small tagged JSON record on the same
//! channel as application data:
//!
//! ```text
//! {"accepted invitation": {"id": "...", "display_name": "alice"}}
//! {"denied invitation":   {"id": "...", "display_name": "alice"}}
//! ```
//!
//! Anything that does not decode as one of these is application data.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{NearbyError, Result};
use crate::identity::PeerId;

/// Accept/deny decision, carrying the identity of the peer that decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Sender accepted the invitation
    #[serde(rename = "accepted invitation")]
    AcceptedInvitation(PeerId),
    /// Sender denied the invitation
    #[serde(rename = "denied invitation")]
    DeniedInvitation(PeerId),
}

impl ControlMessage {
    /// Build the reply for a local decision.
    pub fn response(sender: PeerId, accept: bool) -> Self {
        if accept {
            Self::AcceptedInvitation(sender)
        } else {
            Self::DeniedInvitation(sender)
        }
    }

    /// Identity of the deciding peer.
    pub fn sender(&self) -> &PeerId {
        match self {
            Self::AcceptedInvitation(peer) | Self::DeniedInvitation(peer) => peer,
        }
    }

    /// Check whether this is an acceptance.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::AcceptedInvitation(_))
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| {
                NearbyError::Serialization(format!("Failed to encode control message: {e}"))
            })
    }

    /// Decode wire bytes; `None` means the payload is application data.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_roundtrip() {
        let alice = PeerId::new("alice");
        let bytes = ControlMessage::response(alice.clone(), true).encode().unwrap();
        let decoded = ControlMessage::decode(&bytes).unwrap();

        assert!(decoded.is_accepted());
        assert_eq!(decoded.sender(), &alice);
        assert_eq!(decoded.sender().display_name(), "alice");
    }

    #[test]
    fn test_denied_roundtrip() {
        let bob = PeerId::new("bob");
        let bytes = ControlMessage::response(bob.clone(), false).encode().unwrap();
        let decoded = ControlMessage::decode(&bytes).unwrap();

        assert_eq!(decoded, ControlMessage::DeniedInvitation(bob));
    }

    #[test]
    fn test_wire_tag() {
        let bytes = ControlMessage::AcceptedInvitation(PeerId::new("carol"))
            .encode()
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("accepted invitation").is_some());
    }

    #[test]
    fn test_application_data_is_not_control() {
        assert!(ControlMessage::decode(b"\x00\x01world-map").is_none());
        assert!(ControlMessage::decode(br#"{"anchor": [1, 2, 3]}"#).is_none());
        assert!(ControlMessage::decode(b"").is_none());
    }
}
