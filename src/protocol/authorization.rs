//! Per-peer consent tracking.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::identity::PeerId;

/// Consent state of one remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsentState {
    /// No decision yet
    #[default]
    Unknown,
    /// Invitation in flight, waiting for a decision
    PendingLocalConsent,
    /// Data may be exchanged
    Authorized,
    /// Invitation was denied
    Denied,
}

impl ConsentState {
    /// Only `Authorized` lets data through.
    pub fn is_authorized(&self) -> bool {
        *self == Self::Authorized
    }
}

/// How inbound invitations affect the table before the local user decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsentPolicy {
    /// Trust the inviter as soon as the invitation arrives. Data sent
    /// between invitation and the local decision is relayed.
    #[default]
    Optimistic,
    /// Trust the inviter only after the local user accepts; data from
    /// peers without consent is dropped.
    Strict,
}

impl ConsentPolicy {
    /// Get descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Optimistic => "optimistic",
            Self::Strict => "strict",
        }
    }
}

impl std::fmt::Display for ConsentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ConsentPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "optimistic" => Ok(Self::Optimistic),
            "strict" => Ok(Self::Strict),
            _ => Err(format!("Unknown consent policy: {}", s)),
        }
    }
}

/// Consent flags keyed by peer. A missing entry means `Unknown`.
#[derive(Debug, Clone, Default)]
pub struct AuthorizationTable {
    entries: HashMap<PeerId, ConsentState>,
}

impl AuthorizationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a peer.
    pub fn state(&self, peer: &PeerId) -> ConsentState {
        self.entries.get(peer).copied().unwrap_or_default()
    }

    /// Check whether data from/to this peer is trusted.
    pub fn is_authorized(&self, peer: &PeerId) -> bool {
        self.state(peer).is_authorized()
    }

    /// Overwrite a peer's state.
    pub fn set(&mut self, peer: PeerId, state: ConsentState) {
        self.entries.insert(peer, state);
    }

    /// Mark a peer as unauthorized until explicitly granted.
    pub fn reset(&mut self, peer: PeerId) {
        self.set(peer, ConsentState::Unknown);
    }

    /// Grant consent.
    pub fn authorize(&mut self, peer: PeerId) {
        self.set(peer, ConsentState::Authorized);
    }

    /// Record a denial.
    pub fn deny(&mut self, peer: PeerId) {
        self.set(peer, ConsentState::Denied);
    }

    /// Mark an invitation as in flight. Authorized peers stay authorized.
    pub fn mark_pending(&mut self, peer: PeerId) {
        let state = self.entries.entry(peer).or_default();
        if !state.is_authorized() {
            *state = ConsentState::PendingLocalConsent;
        }
    }

    /// Keep only the peers that are authorized, in the given order.
    pub fn filter_authorized(&self, peers: Vec<PeerId>) -> Vec<PeerId> {
        peers
            .into_iter()
            .filter(|peer| self.is_authorized(peer))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_is_unauthorized() {
        let table = AuthorizationTable::new();
        let peer = PeerId::new("alice");
        assert_eq!(table.state(&peer), ConsentState::Unknown);
        assert!(!table.is_authorized(&peer));
    }

    #[test]
    fn test_transitions() {
        let mut table = AuthorizationTable::new();
        let peer = PeerId::new("alice");

        table.mark_pending(peer.clone());
        assert_eq!(table.state(&peer), ConsentState::PendingLocalConsent);
        assert!(!table.is_authorized(&peer));

        table.authorize(peer.clone());
        assert!(table.is_authorized(&peer));

        // A new invitation does not revoke existing consent
        table.mark_pending(peer.clone());
        assert!(table.is_authorized(&peer));

        table.deny(peer.clone());
        assert_eq!(table.state(&peer), ConsentState::Denied);

        table.reset(peer.clone());
        assert_eq!(table.state(&peer), ConsentState::Unknown);
    }

    #[test]
    fn test_filter_authorized_keeps_order() {
        let mut table = AuthorizationTable::new();
        let peers: Vec<PeerId> = ["a", "b", "c"].iter().map(|n| PeerId::new(*n)).collect();
        table.authorize(peers[2].clone());
        table.authorize(peers[0].clone());
        table.deny(peers[1].clone());

        let allowed = table.filter_authorized(peers.clone());
        assert_eq!(allowed, vec![peers[0].clone(), peers[2].clone()]);
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("strict".parse::<ConsentPolicy>().unwrap(), ConsentPolicy::Strict);
        assert_eq!(
            "Optimistic".parse::<ConsentPolicy>().unwrap(),
            ConsentPolicy::Optimistic
        );
        assert!("paranoid".parse::<ConsentPolicy>().is_err());
        assert_eq!(ConsentPolicy::default(), ConsentPolicy::Optimistic);
    }
}
