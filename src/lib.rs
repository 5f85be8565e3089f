//! # Nearby - Peer Sessions for Shared Experiences
//!
//! A peer-to-peer session layer that discovers nearby participants,
//! negotiates pairwise connection consent and relays opaque payloads among
//! an ad-hoc group of connected peers.
//!
//! ## Features
//!
//! - **Scoped discovery**: peers only see others advertising the same service tag
//! - **Two-layer consent**: an encrypted transport link plus an explicit accept/deny
//! - **Authorization table**: broadcasts only reach peers that consented
//! - **Pluggable transports**: QUIC with LAN beacons, or in-process channels
//! - **Mandatory encryption**: sessions refuse transports that cannot guarantee it
//!
//! ## Protocol Overview
//!
//! ```text
//! Peer B (inviter)                                  Peer A (invitee)
//!    |                                                    |
//!    |<============ beacons (service tag) ===============>|  nearby hook
//!    |                                                    |
//!    |------ invite (encrypted link) -------------------->|  invitation hook
//!    |<----- link accepted ------------------------------|
//!    |                                                    |
//!    |<----- {"accepted invitation": A} -----------------|  respond_to_invitation
//!    |  connect-result hook (Connected)                   |
//!    |                                                    |
//!    |<=================== opaque data =================>|  data hook
//! ```
//!
//! ### Player Status
//!
//! | Status       | Meaning                                         |
//! |--------------|-------------------------------------------------|
//! | `Available`  | Discovered, or a connection attempt ended       |
//! | `Connecting` | Transport handshake in progress                 |
//! | `Connected`  | Peer accepted; data flows                       |
//! | `Lost`       | Peer stopped advertising or went out of range   |
//!
//! ## Quick Start
//!
//! ### In-Process Peers
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use nearby::{MemoryNetwork, PeerId, SessionConfig, SessionManager};
//!
//! let network = MemoryNetwork::new();
//! let (transport, events) = network.join(PeerId::new("alice"))?;
//! let alice = SessionManager::start(Arc::new(transport), events, SessionConfig::default()).await?;
//!
//! alice.on_invitation_received(|player| println!("{} wants to play", player.name));
//! alice.send_data(Bytes::from_static(b"world map"), None).await;
//! ```
//!
//! ### LAN Peers over QUIC
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nearby::{Config, QuicTransport, SessionManager};
//!
//! let config = Config::load()?;
//! let (transport, events) = QuicTransport::bind(config.session.local_peer(), config.transport_config()?)?;
//! let session = SessionManager::start(Arc::new(transport), events, config.session).await?;
//!
//! session.on_nearby_update(|player| {
//!     println!("{} is {:?}", player.name, player.status);
//! });
//! ```
//!
//! ## Modules
//!
//! - [`session`]: Session manager, hooks and event loop
//! - [`discovery`]: Service tags, the nearby list and LAN beacons
//! - [`protocol`]: Authorization table and control messages
//! - [`transport`]: Transport trait, QUIC and in-memory backends
//! - [`identity`]: Peer identities
//! - [`peer`]: Player records
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::{Config, QuicSettings};
pub use discovery::{LanDiscoveryConfig, NearbyPeers, ServiceTag};
pub use error::{NearbyError, Result};
pub use identity::PeerId;
pub use peer::{PeerStatus, Player};
pub use protocol::{AuthorizationTable, ConsentPolicy, ConsentState, ControlMessage};
pub use session::{SessionConfig, SessionManager};
pub use transport::{
    ConnectionState, MemoryNetwork, MemoryTransport, PeerAddress, QuicTransport,
    QuicTransportConfig, SendReport, Transport, TransportEvent,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use protocol::PROTOCOL_VERSION;
