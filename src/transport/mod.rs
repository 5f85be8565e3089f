//! Transport layer abstraction for nearby sessions.
//!
//! A transport announces the local peer, observes other peers, opens
//! encrypted connections on invitation and moves opaque byte payloads.
//! Everything it observes is reported as a [`TransportEvent`] on the
//! channel returned by its constructor.
//!
//! # Backends
//!
//! - **Memory** ([`MemoryNetwork`]): in-process peers linked by channels
//! - **QUIC** ([`QuicTransport`]): TLS 1.3 over UDP with LAN beacon discovery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             SessionManager               │
//! │         (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ Transport trait / TransportEvent
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │ MemoryTransport │ │  QuicTransport  │
//! │  (in-process)   │ │ (quinn + LAN)   │
//! └─────────────────┘ └─────────────────┘
//! ```
//!
//! # Failed invitations
//!
//! A failed [`Transport::invite`] does not emit `NotConnected` on the
//! inviting side; the returned error is the signal. The invited side does
//! get `NotConnected` for a connection that never completed.

mod config;
pub mod frame;
mod memory;
mod quic;

pub use config::{
    CertConfig, CertFingerprint, Encryption, QuicTransportConfig, TlsConfig, ALPN_NEARBY,
};
pub use memory::{MemoryNetwork, MemoryTransport};
pub use quic::{PeerAddress, QuicTransport};

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::discovery::ServiceTag;
use crate::error::{NearbyError, Result};
use crate::identity::PeerId;

/// Boxed future returned by transport methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sending half of a transport event channel.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a transport event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a transport event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Transport-level connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, or the connection ended
    NotConnected,
    /// Handshake in progress
    Connecting,
    /// Encrypted channel open
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotConnected => "not-connected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// One-shot answer to an inbound invitation.
///
/// Dropping the responder without answering declines the invitation.
#[derive(Debug)]
pub struct InvitationResponder {
    tx: oneshot::Sender<bool>,
}

impl InvitationResponder {
    /// Create a responder and the receiver the transport waits on.
    pub fn new() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Answer the invitation.
    pub fn respond(self, accept: bool) {
        // Inviter may have timed out already
        let _ = self.tx.send(accept);
    }

    /// Accept the invitation.
    pub fn accept(self) {
        self.respond(true);
    }

    /// Decline the invitation.
    pub fn decline(self) {
        self.respond(false);
    }
}

/// Event observed by a transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer advertising the browsed tag appeared.
    PeerFound(PeerId),
    /// A previously found peer disappeared.
    PeerLost(PeerId),
    /// Connection state with a peer changed.
    ConnectionStateChanged(PeerId, ConnectionState),
    /// Payload received from a connected peer.
    DataReceived(PeerId, Bytes),
    /// A peer wants to open a connection.
    InvitationReceived {
        /// Inviting peer
        from: PeerId,
        /// Optional context supplied by the inviter
        context: Option<Bytes>,
        /// Transport-level answer
        responder: InvitationResponder,
    },
}

/// Per-peer outcome of a fan-out send.
#[derive(Debug, Default)]
pub struct SendReport {
    /// Peers the payload was handed to.
    pub delivered: Vec<PeerId>,
    /// Peers that could not be reached, with the reason.
    pub failed: Vec<(PeerId, NearbyError)>,
}

impl SendReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome for one peer.
    pub fn record(&mut self, peer: PeerId, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.delivered.push(peer),
            Err(e) => {
                tracing::warn!("Send to {} failed: {}", peer, e);
                self.failed.push((peer, e));
            }
        }
    }

    /// Check whether every target received the payload.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of attempted targets.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

/// Transport trait for pluggable peer-to-peer backends.
///
/// Implementations must only open encrypted connections; the session
/// refuses any transport whose [`guarantees_encryption`] is `false`.
///
/// [`guarantees_encryption`]: Transport::guarantees_encryption
pub trait Transport: Send + Sync {
    /// Get the transport name for logging.
    fn name(&self) -> &'static str;

    /// Identity this transport announces.
    fn local_peer(&self) -> &PeerId;

    /// Whether every connection is encrypted.
    fn guarantees_encryption(&self) -> bool;

    /// Start announcing under `tag`.
    ///
    /// A running advertisement under another tag is stopped first; the
    /// same tag is a no-op.
    fn advertise<'a>(&'a self, tag: &'a ServiceTag) -> TransportFuture<'a, Result<()>>;

    /// Stop announcing.
    fn stop_advertising(&self) -> TransportFuture<'_, Result<()>>;

    /// Start looking for peers advertising `tag`, with the same restart rule.
    fn browse<'a>(&'a self, tag: &'a ServiceTag) -> TransportFuture<'a, Result<()>>;

    /// Stop looking for peers.
    fn stop_browsing(&self) -> TransportFuture<'_, Result<()>>;

    /// Open an encrypted connection to `peer`, bounded by `timeout`.
    fn invite<'a>(
        &'a self,
        peer: &'a PeerId,
        context: Option<Bytes>,
        timeout: Duration,
    ) -> TransportFuture<'a, Result<()>>;

    /// Deliver `data` reliably and in order to each of `peers`.
    ///
    /// Outcomes are independent: one unreachable peer never blocks the rest.
    fn send<'a>(&'a self, data: Bytes, peers: &'a [PeerId]) -> TransportFuture<'a, SendReport>;

    /// Close the connection to `peer`.
    fn disconnect<'a>(&'a self, peer: &'a PeerId) -> TransportFuture<'a, Result<()>>;

    /// Peers with an open connection.
    fn connected_peers(&self) -> Vec<PeerId>;
}
