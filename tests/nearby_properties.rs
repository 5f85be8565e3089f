//! Property-based tests for discovery bookkeeping and wire parsing.
//!
//! ## Properties Verified
//!
//! - The nearby list never holds two entries for one identity
//! - The nearby list keeps first-discovery order
//! - Authorization filtering is an order-preserving subset
//! - Fan-out sends report every target exactly once
//! - Service tag validation agrees with the documented grammar
//! - Beacon and control parsing never panic on arbitrary input

use std::time::Duration;

use bytes::Bytes;
use nearby::discovery::beacon::Beacon;
use nearby::{
    AuthorizationTable, ControlMessage, MemoryNetwork, NearbyPeers, PeerId, PeerStatus,
    ServiceTag, Transport, TransportEvent,
};
use proptest::prelude::*;

const POOL: usize = 6;

#[derive(Debug, Clone)]
enum Op {
    Found(usize),
    Lost(usize),
    Status(usize, PeerStatus),
}

fn arb_status() -> impl Strategy<Value = PeerStatus> {
    prop_oneof![
        Just(PeerStatus::Available),
        Just(PeerStatus::Connecting),
        Just(PeerStatus::Connected),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..POOL).prop_map(Op::Found),
        1 => (0..POOL).prop_map(Op::Lost),
        1 => (0..POOL, arb_status()).prop_map(|(i, s)| Op::Status(i, s)),
    ]
}

fn pool() -> Vec<PeerId> {
    (0..POOL).map(|i| PeerId::new(format!("peer-{i}"))).collect()
}

// ============================================================================
// Nearby list
// ============================================================================

proptest! {
    /// Property: every identity appears at most once
    #[test]
    fn prop_nearby_has_no_duplicates(ops in prop::collection::vec(arb_op(), 0..64)) {
        let peers = pool();
        let mut nearby = NearbyPeers::new();

        for op in ops {
            match op {
                Op::Found(i) => { nearby.found(peers[i].clone()); }
                Op::Lost(i) => { nearby.lost(&peers[i]); }
                Op::Status(i, status) => { nearby.set_status(&peers[i], status); }
            }

            let ids: Vec<_> = nearby.iter().map(|player| player.id.id()).collect();
            let mut unique = ids.clone();
            unique.sort();
            unique.dedup();
            prop_assert_eq!(ids.len(), unique.len(), "nearby list must be duplicate-free");
        }
    }

    /// Property: the list matches a simple ordered model
    #[test]
    fn prop_nearby_matches_model(ops in prop::collection::vec(arb_op(), 0..64)) {
        let peers = pool();
        let mut nearby = NearbyPeers::new();
        let mut model: Vec<usize> = Vec::new();

        for op in ops {
            match op {
                Op::Found(i) => {
                    let added = nearby.found(peers[i].clone());
                    prop_assert_eq!(added.is_some(), !model.contains(&i));
                    if !model.contains(&i) {
                        model.push(i);
                    }
                }
                Op::Lost(i) => {
                    let lost = nearby.lost(&peers[i]);
                    prop_assert_eq!(lost.status, Some(PeerStatus::Lost));
                    model.retain(|j| *j != i);
                }
                Op::Status(i, status) => {
                    let updated = nearby.set_status(&peers[i], status);
                    prop_assert_eq!(updated, model.contains(&i));
                    if updated {
                        prop_assert_eq!(nearby.get(&peers[i]).and_then(|p| p.status), Some(status));
                    }
                }
            }
        }

        let listed: Vec<PeerId> = nearby.iter().map(|player| player.id.clone()).collect();
        let expected: Vec<PeerId> = model.iter().map(|i| peers[*i].clone()).collect();
        prop_assert_eq!(listed, expected);
    }
}

// ============================================================================
// Authorization table
// ============================================================================

proptest! {
    /// Property: filtering keeps exactly the authorized peers, in order
    #[test]
    fn prop_filter_authorized_is_ordered_subset(
        grants in prop::collection::vec(0..3u8, POOL),
        order in Just((0..POOL).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let peers = pool();
        let mut table = AuthorizationTable::new();
        for (peer, grant) in peers.iter().zip(&grants) {
            match grant {
                0 => table.authorize(peer.clone()),
                1 => table.deny(peer.clone()),
                _ => table.mark_pending(peer.clone()),
            }
        }

        let input: Vec<PeerId> = order.iter().map(|i| peers[*i].clone()).collect();
        let filtered = table.filter_authorized(input);
        let expected: Vec<PeerId> = order
            .iter()
            .filter(|i| grants[**i] == 0)
            .map(|i| peers[*i].clone())
            .collect();
        prop_assert_eq!(filtered, expected);
    }

    /// Property: pending never downgrades an authorized peer
    #[test]
    fn prop_mark_pending_keeps_authorization(repeats in 1..5usize) {
        let peer = PeerId::new("alice");
        let mut table = AuthorizationTable::new();
        table.authorize(peer.clone());
        for _ in 0..repeats {
            table.mark_pending(peer.clone());
        }
        prop_assert!(table.is_authorized(&peer));
    }
}

// ============================================================================
// Fan-out
// ============================================================================

proptest! {
    /// Property: linked targets are delivered, the rest fail, none are skipped
    #[test]
    fn prop_send_report_covers_every_target(linked in prop::collection::vec(any::<bool>(), 1..5)) {
        tokio_test::block_on(async {
            let network = MemoryNetwork::new();
            let (hub, _hub_rx) = network.join(PeerId::new("hub")).unwrap();

            let mut peers = Vec::new();
            let mut expected = Vec::new();
            for (i, link) in linked.iter().enumerate() {
                let (peer, mut rx) = network.join(PeerId::new(format!("peer-{i}"))).unwrap();
                let id = peer.local_peer().clone();
                if *link {
                    let answer = async {
                        while let Some(event) = rx.recv().await {
                            if let TransportEvent::InvitationReceived { responder, .. } = event {
                                responder.accept();
                                return;
                            }
                        }
                    };
                    let (invited, ()) =
                        tokio::join!(hub.invite(&id, None, Duration::from_secs(1)), answer);
                    invited.unwrap();
                    expected.push(id.clone());
                }
                peers.push((peer, rx, id));
            }

            let targets: Vec<PeerId> = peers.iter().map(|(_, _, id)| id.clone()).collect();
            let report = hub.send(Bytes::from_static(b"tick"), &targets).await;

            assert_eq!(report.attempted(), targets.len());
            assert_eq!(report.delivered, expected);
            assert_eq!(report.failed.len(), targets.len() - expected.len());
            assert_eq!(report.is_complete(), expected.len() == targets.len());
        });
    }
}

// ============================================================================
// Service tags
// ============================================================================

proptest! {
    /// Property: well-formed tags are accepted and round-trip
    #[test]
    fn prop_valid_tags_accepted(tag in "[a-z][a-z0-9]{0,6}(-[a-z0-9]{1,3})?") {
        let parsed = ServiceTag::new(tag.clone());
        prop_assert!(parsed.is_ok(), "{} should be valid", tag);
        let parsed = parsed.unwrap();
        prop_assert_eq!(parsed.as_str(), tag.as_str());
    }

    /// Property: anything with a character outside the grammar is rejected
    #[test]
    fn prop_invalid_characters_rejected(
        prefix in "[a-z]{0,5}",
        bad in "[A-Z_ .!/]",
        suffix in "[a-z]{0,5}",
    ) {
        let tag = format!("{prefix}{bad}{suffix}");
        prop_assert!(ServiceTag::new(tag).is_err());
    }

    /// Property: overlong tags are rejected
    #[test]
    fn prop_long_tags_rejected(tag in "[a-z]{16,40}") {
        prop_assert!(ServiceTag::new(tag).is_err());
    }
}

// ============================================================================
// Wire parsing
// ============================================================================

proptest! {
    /// Property: beacon parsing tolerates arbitrary datagrams
    #[test]
    fn prop_beacon_parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = Beacon::from_bytes(&bytes);
    }

    /// Property: arbitrary payloads are either data or a well-formed control message
    #[test]
    fn prop_control_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        if let Some(control) = ControlMessage::decode(&bytes) {
            let reencoded = control.encode().unwrap();
            prop_assert_eq!(ControlMessage::decode(&reencoded), Some(control));
        }
    }
}
