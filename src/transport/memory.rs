//! In-process transport.
//!
//! Peers joined to the same [`MemoryNetwork`] discover and connect to each
//! other through channels; nothing leaves the process, so the network is
//! considered confidential. Used by the test-suite and by applications
//! that host several participants in one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use super::{
    event_channel, ConnectionState, EventReceiver, EventSender, InvitationResponder, SendReport,
    Transport, TransportEvent, TransportFuture,
};
use crate::discovery::ServiceTag;
use crate::error::{NearbyError, Result};
use crate::identity::PeerId;

/// Shared registry of in-process peers.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    registry: Arc<Mutex<Registry>>,
    encrypted: bool,
}

#[derive(Debug, Default)]
struct Registry {
    nodes: HashMap<PeerId, Node>,
}

#[derive(Debug)]
struct Node {
    events: EventSender,
    advertising: Option<ServiceTag>,
    browsing: Option<ServiceTag>,
    /// Linked peers in connection order
    links: Vec<PeerId>,
}

impl Registry {
    fn emit(&self, to: &PeerId, event: TransportEvent) {
        if let Some(node) = self.nodes.get(to) {
            // Receiver gone means the session shut down
            let _ = node.events.send(event);
        }
    }

    fn browsers_of(&self, tag: &ServiceTag, except: &PeerId) -> Vec<PeerId> {
        self.nodes
            .iter()
            .filter(|(peer, node)| *peer != except && node.browsing.as_ref() == Some(tag))
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    fn announce(&self, peer: &PeerId, tag: &ServiceTag, found: bool) {
        for browser in self.browsers_of(tag, peer) {
            let event = if found {
                TransportEvent::PeerFound(peer.clone())
            } else {
                TransportEvent::PeerLost(peer.clone())
            };
            self.emit(&browser, event);
        }
    }

    fn is_linked(&self, a: &PeerId, b: &PeerId) -> bool {
        self.nodes.get(a).is_some_and(|node| node.links.contains(b))
    }

    fn link(&mut self, a: &PeerId, b: &PeerId) -> bool {
        if !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return false;
        }
        for (from, to) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get_mut(from) {
                if !node.links.contains(to) {
                    node.links.push(to.clone());
                }
            }
        }
        true
    }

    fn unlink(&mut self, a: &PeerId, b: &PeerId) -> bool {
        let mut removed = false;
        for (from, to) in [(a, b), (b, a)] {
            if let Some(node) = self.nodes.get_mut(from) {
                let before = node.links.len();
                node.links.retain(|peer| peer != to);
                removed |= node.links.len() != before;
            }
        }
        removed
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            encrypted: true,
        }
    }

    /// Create a network whose transports do not claim encryption.
    ///
    /// Sessions refuse these; useful to exercise that check.
    pub fn insecure() -> Self {
        Self {
            encrypted: false,
            ..Self::new()
        }
    }

    /// Attach a peer to the network.
    pub fn join(&self, peer: PeerId) -> Result<(MemoryTransport, EventReceiver)> {
        let (events, rx) = event_channel();
        let mut registry = self.registry();
        if registry.nodes.contains_key(&peer) {
            return Err(NearbyError::Transport(format!(
                "Peer {} already joined this network",
                peer
            )));
        }
        registry.nodes.insert(
            peer.clone(),
            Node {
                events,
                advertising: None,
                browsing: None,
                links: Vec::new(),
            },
        );
        tracing::debug!("{} joined memory network", peer);

        let transport = MemoryTransport {
            network: self.clone(),
            peer,
        };
        Ok((transport, rx))
    }

    /// Number of attached peers.
    pub fn len(&self) -> usize {
        self.registry().nodes.len()
    }

    /// Check whether no peer is attached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A peer attached to a [`MemoryNetwork`]. Leaves the network on drop.
#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    peer: PeerId,
}

impl MemoryTransport {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.network.registry()
    }

    fn set_advertising(&self, tag: Option<&ServiceTag>) {
        let mut registry = self.registry();
        let Some(node) = registry.nodes.get_mut(&self.peer) else {
            return;
        };
        if node.advertising.as_ref() == tag {
            return;
        }
        let previous = std::mem::replace(&mut node.advertising, tag.cloned());

        // Old advertisement ends before the new one starts
        if let Some(old) = previous {
            registry.announce(&self.peer, &old, false);
        }
        if let Some(new) = tag {
            registry.announce(&self.peer, new, true);
            tracing::debug!("{} advertising under '{}'", self.peer, new);
        }
    }

    fn set_browsing(&self, tag: Option<&ServiceTag>) {
        let mut registry = self.registry();
        let Some(node) = registry.nodes.get_mut(&self.peer) else {
            return;
        };
        if node.browsing.as_ref() == tag {
            return;
        }
        node.browsing = tag.cloned();

        if let Some(tag) = tag {
            let advertisers: Vec<PeerId> = registry
                .nodes
                .iter()
                .filter(|(peer, node)| {
                    **peer != self.peer && node.advertising.as_ref() == Some(tag)
                })
                .map(|(peer, _)| peer.clone())
                .collect();
            for peer in advertisers {
                registry.emit(&self.peer, TransportEvent::PeerFound(peer));
            }
            tracing::debug!("{} browsing '{}'", self.peer, tag);
        }
    }

    fn emit_both(&self, registry: &Registry, other: &PeerId, state: ConnectionState) {
        registry.emit(
            &self.peer,
            TransportEvent::ConnectionStateChanged(other.clone(), state),
        );
        registry.emit(
            other,
            TransportEvent::ConnectionStateChanged(self.peer.clone(), state),
        );
    }

    async fn invite_peer(
        &self,
        peer: &PeerId,
        context: Option<Bytes>,
        timeout: Duration,
    ) -> Result<()> {
        let answer = {
            let registry = self.registry();
            if !registry.nodes.contains_key(peer) {
                return Err(NearbyError::UnknownPeer(peer.clone()));
            }
            if registry.is_linked(&self.peer, peer) {
                return Ok(());
            }

            let (responder, answer) = InvitationResponder::new();
            self.emit_both(&registry, peer, ConnectionState::Connecting);
            registry.emit(
                peer,
                TransportEvent::InvitationReceived {
                    from: self.peer.clone(),
                    context,
                    responder,
                },
            );
            answer
        };

        let outcome = tokio::time::timeout(timeout, answer).await;

        let mut registry = self.registry();
        let result = match outcome {
            Ok(Ok(true)) => {
                if registry.link(&self.peer, peer) {
                    self.emit_both(&registry, peer, ConnectionState::Connected);
                    return Ok(());
                }
                // Invitee left while answering
                Err(NearbyError::NotConnected(peer.clone()))
            }
            Ok(Ok(false) | Err(_)) => Err(NearbyError::InviteRejected(peer.clone())),
            Err(_) => Err(NearbyError::InviteTimeout(peer.clone())),
        };
        registry.emit(
            peer,
            TransportEvent::ConnectionStateChanged(
                self.peer.clone(),
                ConnectionState::NotConnected,
            ),
        );
        result
    }

    fn leave(&self) {
        let mut registry = self.registry();
        let Some(node) = registry.nodes.remove(&self.peer) else {
            return;
        };
        if let Some(tag) = &node.advertising {
            registry.announce(&self.peer, tag, false);
        }
        for linked in &node.links {
            registry.unlink(&self.peer, linked);
            registry.emit(
                linked,
                TransportEvent::ConnectionStateChanged(
                    self.peer.clone(),
                    ConnectionState::NotConnected,
                ),
            );
        }
        tracing::debug!("{} left memory network", self.peer);
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.leave();
    }
}

impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn local_peer(&self) -> &PeerId {
        &self.peer
    }

    fn guarantees_encryption(&self) -> bool {
        self.network.encrypted
    }

    fn advertise<'a>(&'a self, tag: &'a ServiceTag) -> TransportFuture<'a, Result<()>> {
        Box::pin(async move {
            self.set_advertising(Some(tag));
            Ok(())
        })
    }

    fn stop_advertising(&self) -> TransportFuture<'_, Result<()>> {
        Box::pin(async move {
            self.set_advertising(None);
            Ok(())
        })
    }

    fn browse<'a>(&'a self, tag: &'a ServiceTag) -> TransportFuture<'a, Result<()>> {
        Box::pin(async move {
            self.set_browsing(Some(tag));
            Ok(())
        })
    }

    fn stop_browsing(&self) -> TransportFuture<'_, Result<()>> {
        Box::pin(async move {
            self.set_browsing(None);
            Ok(())
        })
    }

    fn invite<'a>(
        &'a self,
        peer: &'a PeerId,
        context: Option<Bytes>,
        timeout: Duration,
    ) -> TransportFuture<'a, Result<()>> {
        Box::pin(self.invite_peer(peer, context, timeout))
    }

    fn send<'a>(&'a self, data: Bytes, peers: &'a [PeerId]) -> TransportFuture<'a, SendReport> {
        Box::pin(async move {
            let registry = self.registry();
            let mut report = SendReport::new();
            for peer in peers {
                let outcome = if registry.is_linked(&self.peer, peer) {
                    registry.emit(
                        peer,
                        TransportEvent::DataReceived(self.peer.clone(), data.clone()),
                    );
                    Ok(())
                } else {
                    Err(NearbyError::NotConnected(peer.clone()))
                };
                report.record(peer.clone(), outcome);
            }
            report
        })
    }

    fn disconnect<'a>(&'a self, peer: &'a PeerId) -> TransportFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut registry = self.registry();
            if !registry.unlink(&self.peer, peer) {
                return Err(NearbyError::NotConnected(peer.clone()));
            }
            self.emit_both(&registry, peer, ConnectionState::NotConnected);
            Ok(())
        })
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.registry()
            .nodes
            .get(&self.peer)
            .map(|node| node.links.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(s: &str) -> ServiceTag {
        ServiceTag::new(s).unwrap()
    }

    fn drain(rx: &mut EventReceiver) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_browse_reports_existing_advertisers() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.join(PeerId::new("a")).unwrap();
        let (b, mut b_rx) = network.join(PeerId::new("b")).unwrap();

        a.advertise(&tag("demo")).await.unwrap();
        b.browse(&tag("demo")).await.unwrap();

        let events = drain(&mut b_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], TransportEvent::PeerFound(p) if p == a.local_peer()));
    }

    #[tokio::test]
    async fn test_tag_change_stops_old_advertisement_first() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.join(PeerId::new("a")).unwrap();
        let (b, mut b_rx) = network.join(PeerId::new("b")).unwrap();

        b.browse(&tag("demo")).await.unwrap();
        a.advertise(&tag("demo")).await.unwrap();
        a.advertise(&tag("demo")).await.unwrap();
        a.advertise(&tag("other")).await.unwrap();

        let events = drain(&mut b_rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TransportEvent::PeerFound(_)));
        assert!(matches!(events[1], TransportEvent::PeerLost(_)));
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let network = MemoryNetwork::new();
        let peer = PeerId::new("a");
        let (_a, _rx) = network.join(peer.clone()).unwrap();
        assert!(network.join(peer).is_err());
    }

    #[tokio::test]
    async fn test_invite_accept_links_both() {
        let network = MemoryNetwork::new();
        let (a, mut a_rx) = network.join(PeerId::new("a")).unwrap();
        let (b, _b_rx) = network.join(PeerId::new("b")).unwrap();

        let responder_task = tokio::spawn(async move {
            while let Some(event) = a_rx.recv().await {
                if let TransportEvent::InvitationReceived { responder, .. } = event {
                    responder.accept();
                    break;
                }
            }
            a_rx
        });

        b.invite(a.local_peer(), None, Duration::from_secs(1))
            .await
            .unwrap();
        let _ = responder_task.await.unwrap();

        assert_eq!(b.connected_peers(), vec![a.local_peer().clone()]);
        assert_eq!(a.connected_peers(), vec![b.local_peer().clone()]);
    }

    #[tokio::test]
    async fn test_invite_timeout() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.join(PeerId::new("a")).unwrap();
        let (b, _b_rx) = network.join(PeerId::new("b")).unwrap();

        let result = b
            .invite(a.local_peer(), None, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(NearbyError::InviteTimeout(_))));
        assert!(b.connected_peers().is_empty());
    }

    #[tokio::test]
    async fn test_invite_unknown_peer() {
        let network = MemoryNetwork::new();
        let (b, _b_rx) = network.join(PeerId::new("b")).unwrap();
        let result = b
            .invite(&PeerId::new("ghost"), None, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(NearbyError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn test_send_fans_out_independently() {
        let network = MemoryNetwork::new();
        let (a, mut a_rx) = network.join(PeerId::new("a")).unwrap();
        let (b, _b_rx) = network.join(PeerId::new("b")).unwrap();
        let stranger = PeerId::new("stranger");

        {
            let mut registry = network.registry();
            registry.link(a.local_peer(), b.local_peer());
        }

        let targets = vec![stranger.clone(), a.local_peer().clone()];
        let report = b.send(Bytes::from_static(b"map"), &targets).await;

        assert_eq!(report.delivered, vec![a.local_peer().clone()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, stranger);

        let events = drain(&mut a_rx);
        assert!(events.iter().any(|e| matches!(
            e,
            TransportEvent::DataReceived(_, data) if data.as_ref() == b"map"
        )));
    }

    #[tokio::test]
    async fn test_drop_leaves_network() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.join(PeerId::new("a")).unwrap();
        let (b, mut b_rx) = network.join(PeerId::new("b")).unwrap();
        b.browse(&tag("demo")).await.unwrap();
        a.advertise(&tag("demo")).await.unwrap();

        drop(a);
        assert_eq!(network.len(), 1);
        let events = drain(&mut b_rx);
        assert!(matches!(events.last(), Some(TransportEvent::PeerLost(_))));
    }
}
