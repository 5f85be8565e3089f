//! QUIC transport for nearby sessions.
//!
//! Each process runs one quinn endpoint acting as both server and client:
//! - **Mandatory TLS 1.3**: construction fails unless encryption is required
//! - **Certificate pinning**: inviters only accept the fingerprint a peer
//!   advertised in its beacon (or was registered with)
//! - **Ordered delivery**: one bidirectional stream per link carries
//!   length-prefixed frames in both directions
//!
//! # Connection setup
//!
//! ```text
//!   inviter                                   invitee
//!     │  QUIC + TLS (pinned fingerprint)         │
//!     │─────────────────────────────────────────>│
//!     │  open_bi: Hello{peer, context}           │
//!     │─────────────────────────────────────────>│ InvitationReceived
//!     │                                          │ (responder answers)
//!     │  Reply{accepted, peer}                   │
//!     │<─────────────────────────────────────────│
//!     │  data frames (both directions)           │
//!     │<════════════════════════════════════════>│
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use super::config::{CertFingerprint, Encryption, QuicTransportConfig, SERVER_NAME};
use super::frame::{read_frame, read_handshake, write_frame, write_handshake, Handshake};
use super::{
    event_channel, ConnectionState, EventReceiver, EventSender, InvitationResponder, SendReport,
    Transport, TransportEvent, TransportFuture,
};
use crate::discovery::{LanDiscovery, ServiceTag};
use crate::error::{NearbyError, Result};
use crate::identity::PeerId;

/// Where and how to reach a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Peer identity.
    pub peer: PeerId,
    /// QUIC endpoint address.
    pub addr: SocketAddr,
    /// Base64 SHA-256 fingerprint of the peer's certificate.
    pub fingerprint: String,
}

type SharedSend = Arc<tokio::sync::Mutex<quinn::SendStream>>;

struct Link {
    connection: quinn::Connection,
    send: SharedSend,
}

struct Shared {
    local: PeerId,
    config: QuicTransportConfig,
    endpoint: quinn::Endpoint,
    events: EventSender,
    links: Mutex<HashMap<PeerId, Link>>,
}

impl Shared {
    fn links(&self) -> MutexGuard<'_, HashMap<PeerId, Link>> {
        self.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransportEvent) {
        // Receiver gone means the session shut down
        let _ = self.events.send(event);
    }

    fn emit_state(&self, peer: &PeerId, state: ConnectionState) {
        self.emit(TransportEvent::ConnectionStateChanged(peer.clone(), state));
    }

    fn is_linked(&self, peer: &PeerId) -> bool {
        self.links().contains_key(peer)
    }

    /// Install a link and start reading its frames.
    fn register(
        self: &Arc<Self>,
        peer: PeerId,
        connection: quinn::Connection,
        send: quinn::SendStream,
        recv: quinn::RecvStream,
    ) {
        let link = Link {
            connection: connection.clone(),
            send: Arc::new(tokio::sync::Mutex::new(send)),
        };
        if let Some(previous) = self.links().insert(peer.clone(), link) {
            previous
                .connection
                .close(quinn::VarInt::from_u32(0), b"replaced");
        }

        tokio::spawn(Arc::clone(self).read_loop(peer.clone(), connection, recv));
        self.emit_state(&peer, ConnectionState::Connected);
        tracing::info!("Connected to {}", peer);
    }

    /// Remove the link if it still belongs to `connection`.
    fn unlink(&self, peer: &PeerId, connection: &quinn::Connection) -> bool {
        let mut links = self.links();
        let current = links
            .get(peer)
            .is_some_and(|link| link.connection.stable_id() == connection.stable_id());
        if current {
            links.remove(peer);
        }
        current
    }

    async fn read_loop(
        self: Arc<Self>,
        peer: PeerId,
        connection: quinn::Connection,
        mut recv: quinn::RecvStream,
    ) {
        loop {
            match read_frame(&mut recv, self.config.max_frame_size).await {
                Ok(Some(data)) => self.emit(TransportEvent::DataReceived(peer.clone(), data)),
                Ok(None) => {
                    tracing::debug!("{} closed its stream", peer);
                    break;
                }
                Err(e) => {
                    tracing::debug!("Read from {} ended: {}", peer, e);
                    break;
                }
            }
        }

        if self.unlink(&peer, &connection) {
            connection.close(quinn::VarInt::from_u32(0), b"stream closed");
            self.emit_state(&peer, ConnectionState::NotConnected);
            tracing::info!("Disconnected from {}", peer);
        }
    }

    async fn accept_loop(self: Arc<Self>) {
        while let Some(connecting) = self.endpoint.accept().await {
            let shared = Arc::clone(&self);
            tokio::spawn(async move {
                let remote = connecting.remote_address();
                if let Err(e) = shared.handle_incoming(connecting).await {
                    tracing::warn!("Inbound connection from {} failed: {}", remote, e);
                }
            });
        }
        tracing::debug!("Endpoint closed, accept loop exiting");
    }

    async fn handle_incoming(self: Arc<Self>, connecting: quinn::Connecting) -> Result<()> {
        let connection = connecting.await?;
        let (mut send, mut recv) = connection.accept_bi().await?;

        let hello = tokio::time::timeout(self.config.handshake_timeout, read_handshake(&mut recv))
            .await
            .map_err(|_| NearbyError::Transport("Timed out waiting for hello".to_string()))??;
        let context = hello.context()?;
        let Handshake::Hello { peer: from, .. } = hello else {
            connection.close(quinn::VarInt::from_u32(1), b"expected hello");
            return Err(NearbyError::Transport("Expected hello frame".to_string()));
        };

        tracing::debug!("Invitation from {} at {}", from, connection.remote_address());
        self.emit_state(&from, ConnectionState::Connecting);

        let (responder, answer) = InvitationResponder::new();
        self.emit(TransportEvent::InvitationReceived {
            from: from.clone(),
            context,
            responder,
        });

        // Dropped responder or no answer in time declines
        let accepted = matches!(
            tokio::time::timeout(self.config.handshake_timeout, answer).await,
            Ok(Ok(true))
        );

        let reply = Handshake::reply(self.local.clone(), accepted);
        let replied = write_handshake(&mut send, &reply).await;
        if accepted && replied.is_ok() {
            self.register(from, connection, send, recv);
            return Ok(());
        }

        if replied.is_ok() {
            let _ = send.finish().await;
        }
        connection.close(quinn::VarInt::from_u32(0), b"declined");
        self.emit_state(&from, ConnectionState::NotConnected);
        replied
    }

    async fn dial(self: &Arc<Self>, address: &PeerAddress, context: Option<&[u8]>) -> Result<()> {
        let fingerprint = CertFingerprint::from_base64(&address.fingerprint)?;
        let client_config = self.config.build_client_config(fingerprint)?;

        let connection = self
            .endpoint
            .connect_with(client_config, address.addr, SERVER_NAME)
            .map_err(|e| {
                NearbyError::Transport(format!("Connect to {} failed: {}", address.addr, e))
            })?
            .await?;

        let (mut send, mut recv) = connection.open_bi().await?;
        write_handshake(&mut send, &Handshake::hello(self.local.clone(), context)).await?;

        match read_handshake(&mut recv).await {
            Ok(Handshake::Reply { accepted: true, peer }) if peer == address.peer => {
                self.register(peer, connection, send, recv);
                Ok(())
            }
            Ok(Handshake::Reply { accepted: false, .. }) => {
                connection.close(quinn::VarInt::from_u32(0), b"rejected");
                Err(NearbyError::InviteRejected(address.peer.clone()))
            }
            Ok(other) => {
                connection.close(quinn::VarInt::from_u32(1), b"unexpected reply");
                Err(NearbyError::Transport(format!(
                    "Unexpected handshake from {}: {:?}",
                    address.peer, other
                )))
            }
            Err(e) => {
                connection.close(quinn::VarInt::from_u32(1), b"handshake failed");
                Err(e)
            }
        }
    }

    async fn send_to(&self, peer: &PeerId, data: &[u8]) -> Result<()> {
        let send = self
            .links()
            .get(peer)
            .map(|link| Arc::clone(&link.send))
            .ok_or_else(|| NearbyError::NotConnected(peer.clone()))?;

        let mut stream = send.lock().await;
        write_frame(&mut *stream, data, self.config.max_frame_size)
            .await
            .map_err(|e| match e {
                NearbyError::FrameTooLarge { .. } => e,
                other => NearbyError::Send(format!("{}: {}", peer, other)),
            })
    }
}

/// QUIC transport with LAN discovery.
pub struct QuicTransport {
    shared: Arc<Shared>,
    discovery: LanDiscovery,
    fingerprint: CertFingerprint,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl QuicTransport {
    /// Bind the endpoint and start accepting invitations.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(local: PeerId, config: QuicTransportConfig) -> Result<(Self, EventReceiver)> {
        if config.encryption != Encryption::Required {
            return Err(NearbyError::EncryptionRequired);
        }

        let (certs, key) = config.tls.cert.load()?;
        let fingerprint = certs
            .first()
            .map(|cert| CertFingerprint::of(&cert.0))
            .ok_or_else(|| NearbyError::Config("Empty certificate chain".to_string()))?;
        let server_config = config.build_server_config(certs, key)?;

        let endpoint = quinn::Endpoint::server(server_config, config.listen_addr)?;
        let local_addr = endpoint.local_addr()?;
        tracing::info!("QUIC endpoint for {} listening on {}", local, local_addr);

        let (events, rx) = event_channel();
        let discovery = LanDiscovery::new(
            config.discovery.clone(),
            local.clone(),
            local_addr.port(),
            fingerprint.to_base64(),
            events.clone(),
        );

        let shared = Arc::new(Shared {
            local,
            config,
            endpoint,
            events,
            links: Mutex::new(HashMap::new()),
        });
        let accept_task = tokio::spawn(Arc::clone(&shared).accept_loop());

        let transport = Self {
            shared,
            discovery,
            fingerprint,
            local_addr,
            accept_task,
        };
        Ok((transport, rx))
    }

    /// This endpoint's own address, for registering it with other peers.
    ///
    /// When bound to an unspecified address the IP is not dialable as is.
    pub fn peer_address(&self) -> PeerAddress {
        PeerAddress {
            peer: self.shared.local.clone(),
            addr: self.local_addr,
            fingerprint: self.fingerprint.to_base64(),
        }
    }

    /// Register a peer without LAN discovery; emits `PeerFound` when new.
    pub fn add_known_peer(&self, address: PeerAddress) {
        let peer = address.peer.clone();
        if self.discovery.addresses().insert(address) {
            tracing::debug!("Added known peer {}", peer);
            self.shared.emit(TransportEvent::PeerFound(peer));
        }
    }

    /// Certificate fingerprint presented by this endpoint.
    pub fn fingerprint(&self) -> CertFingerprint {
        self.fingerprint
    }

    async fn invite_peer(
        &self,
        peer: &PeerId,
        context: Option<Bytes>,
        timeout: Duration,
    ) -> Result<()> {
        let address = self
            .discovery
            .addresses()
            .get(peer)
            .ok_or_else(|| NearbyError::UnknownPeer(peer.clone()))?;
        if self.shared.is_linked(peer) {
            return Ok(());
        }

        self.shared.emit_state(peer, ConnectionState::Connecting);
        tracing::debug!("Inviting {} at {}", peer, address.addr);

        match tokio::time::timeout(timeout, self.shared.dial(&address, context.as_deref())).await {
            Ok(result) => result,
            Err(_) => Err(NearbyError::InviteTimeout(peer.clone())),
        }
    }
}

impl Drop for QuicTransport {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.shared
            .endpoint
            .close(quinn::VarInt::from_u32(0), b"shutdown");
    }
}

impl Transport for QuicTransport {
    fn name(&self) -> &'static str {
        "quic"
    }

    fn local_peer(&self) -> &PeerId {
        &self.shared.local
    }

    fn guarantees_encryption(&self) -> bool {
        true
    }

    fn advertise<'a>(&'a self, tag: &'a ServiceTag) -> TransportFuture<'a, Result<()>> {
        Box::pin(self.discovery.advertise(tag))
    }

    fn stop_advertising(&self) -> TransportFuture<'_, Result<()>> {
        Box::pin(self.discovery.stop_advertising())
    }

    fn browse<'a>(&'a self, tag: &'a ServiceTag) -> TransportFuture<'a, Result<()>> {
        Box::pin(self.discovery.browse(tag))
    }

    fn stop_browsing(&self) -> TransportFuture<'_, Result<()>> {
        Box::pin(self.discovery.stop_browsing())
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
            let outcomes =
                join_all(peers.iter().map(|peer| self.shared.send_to(peer, &data))).await;

            let mut report = SendReport::new();
            for (peer, outcome) in peers.iter().zip(outcomes) {
                report.record(peer.clone(), outcome);
            }
            report
        })
    }

    fn disconnect<'a>(&'a self, peer: &'a PeerId) -> TransportFuture<'a, Result<()>> {
        Box::pin(async move {
            let link = self
                .shared
                .links()
                .remove(peer)
                .ok_or_else(|| NearbyError::NotConnected(peer.clone()))?;

            link.connection
                .close(quinn::VarInt::from_u32(0), b"disconnect");
            self.shared.emit_state(peer, ConnectionState::NotConnected);
            tracing::info!("Disconnected from {}", peer);
            Ok(())
        })
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.shared.links().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_requires_encryption() {
        let config = QuicTransportConfig {
            encryption: Encryption::Optional,
            ..QuicTransportConfig::loopback()
        };
        let result = QuicTransport::bind(PeerId::new("a"), config);
        assert!(matches!(result, Err(NearbyError::EncryptionRequired)));
    }

    #[tokio::test]
    async fn test_peer_address_matches_endpoint() {
        let (transport, _rx) =
            QuicTransport::bind(PeerId::new("a"), QuicTransportConfig::loopback()).unwrap();
        let address = transport.peer_address();

        assert_eq!(&address.peer, transport.local_peer());
        assert_ne!(address.addr.port(), 0);
        assert_eq!(address.fingerprint, transport.fingerprint().to_base64());
        assert!(transport.guarantees_encryption());
    }

    #[tokio::test]
    async fn test_add_known_peer_emits_found_once() {
        let (transport, mut rx) =
            QuicTransport::bind(PeerId::new("a"), QuicTransportConfig::loopback()).unwrap();
        let (other, _other_rx) =
            QuicTransport::bind(PeerId::new("b"), QuicTransportConfig::loopback()).unwrap();

        transport.add_known_peer(other.peer_address());
        transport.add_known_peer(other.peer_address());

        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::PeerFound(p)) if &p == other.local_peer()
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invite_unknown_peer() {
        let (transport, _rx) =
            QuicTransport::bind(PeerId::new("a"), QuicTransportConfig::loopback()).unwrap();
        let result = transport
            .invite(&PeerId::new("ghost"), None, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(NearbyError::UnknownPeer(_))));
    }

    #[tokio::test]
    async fn test_send_without_link_fails_per_peer() {
        let (transport, _rx) =
            QuicTransport::bind(PeerId::new("a"), QuicTransportConfig::loopback()).unwrap();
        let ghost = PeerId::new("ghost");
        let report = transport.send(Bytes::from_static(b"x"), &[ghost.clone()]).await;
        assert!(report.delivered.is_empty());
        assert!(matches!(&report.failed[0], (p, NearbyError::NotConnected(_)) if *p == ghost));
    }
}
