//! UDP broadcast discovery on the local network.
//!
//! The advertiser periodically broadcasts a [`Beacon`]; the browser listens
//! on the discovery port, reports each matching peer once and reports it
//! lost when it says goodbye or stays silent longer than the TTL.
//!
//! Every peer found here is also recorded in an address book so the QUIC
//! transport can dial it and pin its certificate.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::beacon::{Beacon, MAX_BEACON_SIZE};
use super::ServiceTag;
use crate::error::{NearbyError, Result};
use crate::identity::PeerId;
use crate::transport::{EventSender, PeerAddress, TransportEvent};

/// Default UDP port for LAN discovery.
pub const DEFAULT_DISCOVERY_PORT: u16 = 47_474;

/// Default interval between beacons.
pub const DEFAULT_ANNOUNCE_INTERVAL_MS: u64 = 1000;

/// Default silence after which a peer counts as lost.
pub const DEFAULT_PEER_TTL_MS: u64 = 5000;

/// Configuration for LAN discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanDiscoveryConfig {
    /// Whether beacons are sent and received at all.
    pub enabled: bool,
    /// UDP port for discovery.
    pub port: u16,
    /// Interval between announcements in milliseconds.
    pub announce_interval_ms: u64,
    /// Silence in milliseconds before a peer is reported lost.
    pub peer_ttl_ms: u64,
    /// Bind address for the browser (e.g. "0.0.0.0").
    pub bind_addr: String,
    /// Broadcast address (e.g. "255.255.255.255").
    pub broadcast_addr: String,
}

impl Default for LanDiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_DISCOVERY_PORT,
            announce_interval_ms: DEFAULT_ANNOUNCE_INTERVAL_MS,
            peer_ttl_ms: DEFAULT_PEER_TTL_MS,
            bind_addr: "0.0.0.0".to_string(),
            broadcast_addr: "255.255.255.255".to_string(),
        }
    }
}

impl LanDiscoveryConfig {
    fn announce_interval(&self) -> Duration {
        Duration::from_millis(self.announce_interval_ms.max(1))
    }

    fn peer_ttl(&self) -> Duration {
        Duration::from_millis(self.peer_ttl_ms.max(1))
    }

    fn bind_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind_addr.parse().map_err(|e| {
            NearbyError::Config(format!(
                "Invalid discovery bind address '{}': {}",
                self.bind_addr, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn broadcast_socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.broadcast_addr.parse().map_err(|e| {
            NearbyError::Config(format!(
                "Invalid broadcast address '{}': {}",
                self.broadcast_addr, e
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Peers that can be dialled, keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    entries: Arc<Mutex<HashMap<PeerId, PeerAddress>>>,
}

impl AddressBook {
    fn entries(&self) -> MutexGuard<'_, HashMap<PeerId, PeerAddress>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record or refresh a peer's address. Returns `true` if it was new.
    pub fn insert(&self, address: PeerAddress) -> bool {
        self.entries()
            .insert(address.peer.clone(), address)
            .is_none()
    }

    /// Forget a peer.
    pub fn remove(&self, peer: &PeerId) -> Option<PeerAddress> {
        self.entries().remove(peer)
    }

    /// Look up a peer's address.
    pub fn get(&self, peer: &PeerId) -> Option<PeerAddress> {
        self.entries().get(peer).cloned()
    }
}

struct Advertisement {
    tag: ServiceTag,
    task: JoinHandle<()>,
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    goodbye: Vec<u8>,
}

struct Browsing {
    tag: ServiceTag,
    task: JoinHandle<()>,
}

/// LAN advertiser and browser for one local peer.
pub struct LanDiscovery {
    config: LanDiscoveryConfig,
    local: PeerId,
    service_port: u16,
    fingerprint: String,
    events: EventSender,
    addresses: AddressBook,
    advertisement: tokio::sync::Mutex<Option<Advertisement>>,
    browsing: tokio::sync::Mutex<Option<Browsing>>,
}

impl LanDiscovery {
    /// Create discovery for a peer accepting connections on `service_port`.
    pub fn new(
        config: LanDiscoveryConfig,
        local: PeerId,
        service_port: u16,
        fingerprint: String,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            local,
            service_port,
            fingerprint,
            events,
            addresses: AddressBook::default(),
            advertisement: tokio::sync::Mutex::new(None),
            browsing: tokio::sync::Mutex::new(None),
        }
    }

    /// Addresses learnt so far.
    pub fn addresses(&self) -> &AddressBook {
        &self.addresses
    }

    /// Start broadcasting beacons under `tag`.
    pub async fn advertise(&self, tag: &ServiceTag) -> Result<()> {
        if !self.config.enabled {
            tracing::debug!("LAN discovery disabled, not advertising '{}'", tag);
            return Ok(());
        }

        let mut current = self.advertisement.lock().await;
        if current.as_ref().is_some_and(|ad| &ad.tag == tag) {
            return Ok(());
        }
        if let Some(previous) = current.take() {
            Self::end_advertisement(previous).await;
        }

        let beacon = Beacon::new(
            tag.as_str(),
            self.local.clone(),
            self.service_port,
            &self.fingerprint,
        );
        let packet = beacon
            .to_bytes()
            .ok_or_else(|| NearbyError::Discovery("Beacon exceeds datagram size".to_string()))?;
        let goodbye = beacon
            .leaving()
            .to_bytes()
            .ok_or_else(|| NearbyError::Discovery("Beacon exceeds datagram size".to_string()))?;

        let target = self.config.broadcast_socket_addr()?;
        let socket = Arc::new(broadcast_socket()?);
        let task = tokio::spawn(run_advertiser(
            Arc::clone(&socket),
            target,
            packet,
            self.config.announce_interval(),
        ));

        tracing::info!("Advertising '{}' on {}", tag, target);
        *current = Some(Advertisement {
            tag: tag.clone(),
            task,
            socket,
            target,
            goodbye,
        });
        Ok(())
    }

    /// Stop broadcasting and say goodbye.
    pub async fn stop_advertising(&self) -> Result<()> {
        if let Some(previous) = self.advertisement.lock().await.take() {
            Self::end_advertisement(previous).await;
        }
        Ok(())
    }

    async fn end_advertisement(ad: Advertisement) {
        ad.task.abort();
        if let Err(e) = ad.socket.send_to(&ad.goodbye, ad.target).await {
            tracing::debug!("Failed to send leaving beacon: {}", e);
        }
        tracing::debug!("Stopped advertising '{}'", ad.tag);
    }

    /// Start listening for beacons advertising `tag`.
    pub async fn browse(&self, tag: &ServiceTag) -> Result<()> {
        if !self.config.enabled {
            tracing::debug!("LAN discovery disabled, not browsing '{}'", tag);
            return Ok(());
        }

        let mut current = self.browsing.lock().await;
        if current.as_ref().is_some_and(|b| &b.tag == tag) {
            return Ok(());
        }
        if let Some(previous) = current.take() {
            previous.task.abort();
        }

        let bind = self.config.bind_socket_addr()?;
        let socket = reusable_socket(bind)
            .map_err(|e| NearbyError::Discovery(format!("Failed to bind {}: {}", bind, e)))?;

        let state = BrowseState::new(
            tag.clone(),
            self.local.clone(),
            self.config.peer_ttl(),
            self.addresses.clone(),
        );
        let task = tokio::spawn(run_browser(
            socket,
            state,
            self.events.clone(),
            self.config.announce_interval(),
        ));

        tracing::info!("Browsing for '{}' on {}", tag, bind);
        *current = Some(Browsing {
            tag: tag.clone(),
            task,
        });
        Ok(())
    }

    /// Stop listening for beacons.
    pub async fn stop_browsing(&self) -> Result<()> {
        if let Some(previous) = self.browsing.lock().await.take() {
            previous.task.abort();
            tracing::debug!("Stopped browsing '{}'", previous.tag);
        }
        Ok(())
    }
}

impl Drop for LanDiscovery {
    fn drop(&mut self) {
        if let Some(ad) = self.advertisement.get_mut().take() {
            ad.task.abort();
        }
        if let Some(browsing) = self.browsing.get_mut().take() {
            browsing.task.abort();
        }
    }
}

fn broadcast_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from(([0, 0, 0, 0], 0)).into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Several peers on one host share the discovery port.
fn reusable_socket(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

async fn run_advertiser(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    packet: Vec<u8>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = socket.send_to(&packet, target).await {
            tracing::warn!("Beacon send to {} failed: {}", target, e);
        }
    }
}

async fn run_browser(
    socket: UdpSocket,
    mut state: BrowseState,
    events: EventSender,
    sweep_interval: Duration,
) {
    let mut buf = vec![0u8; MAX_BEACON_SIZE];
    let mut sweep = tokio::time::interval(sweep_interval);

    loop {
        let emitted: Vec<TransportEvent> = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => state
                    .on_packet(&buf[..len], from, Instant::now())
                    .into_iter()
                    .collect(),
                Err(e) => {
                    tracing::warn!("Discovery receive failed: {}", e);
                    Vec::new()
                }
            },
            _ = sweep.tick() => state.expire(Instant::now()),
        };

        for event in emitted {
            if events.send(event).is_err() {
                tracing::debug!("Event receiver closed, browser exiting");
                return;
            }
        }
    }
}

/// Beacon bookkeeping for one browse session.
#[derive(Debug)]
struct BrowseState {
    tag: ServiceTag,
    local: PeerId,
    ttl: Duration,
    last_seen: HashMap<PeerId, Instant>,
    addresses: AddressBook,
}

impl BrowseState {
    fn new(tag: ServiceTag, local: PeerId, ttl: Duration, addresses: AddressBook) -> Self {
        Self {
            tag,
            local,
            ttl,
            last_seen: HashMap::new(),
            addresses,
        }
    }

    fn on_packet(
        &mut self,
        bytes: &[u8],
        from: SocketAddr,
        now: Instant,
    ) -> Option<TransportEvent> {
        let beacon = Beacon::from_bytes(bytes)?;
        if beacon.service != self.tag.as_str() || beacon.peer == self.local {
            return None;
        }

        if beacon.leaving {
            self.last_seen.remove(&beacon.peer)?;
            self.addresses.remove(&beacon.peer);
            tracing::debug!("{} left '{}'", beacon.peer, self.tag);
            return Some(TransportEvent::PeerLost(beacon.peer));
        }

        self.addresses.insert(PeerAddress {
            peer: beacon.peer.clone(),
            addr: SocketAddr::new(from.ip(), beacon.port),
            fingerprint: beacon.fingerprint,
        });
        if self.last_seen.insert(beacon.peer.clone(), now).is_some() {
            return None;
        }
        tracing::debug!("Found {} at {}", beacon.peer, from.ip());
        Some(TransportEvent::PeerFound(beacon.peer))
    }

    fn expire(&mut self, now: Instant) -> Vec<TransportEvent> {
        let ttl = self.ttl;
        let silent: Vec<PeerId> = self
            .last_seen
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) > ttl)
            .map(|(peer, _)| peer.clone())
            .collect();

        silent
            .into_iter()
            .map(|peer| {
                self.last_seen.remove(&peer);
                self.addresses.remove(&peer);
                tracing::debug!("{} timed out", peer);
                TransportEvent::PeerLost(peer)
            })
            .collect()
    }
}
