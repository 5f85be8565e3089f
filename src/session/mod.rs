//! Session orchestration.
//!
//! [`SessionManager`] ties a [`Transport`] to the consumer: it keeps the
//! nearby list and the authorization table, runs the invitation handshake
//! and relays payloads.
//!
//! All transport events are handled by one event-loop task, one at a time
//! and in arrival order. Failed invitations are reported through the same
//! loop, after any transport events already queued. Hooks run on that task.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use nearby::{MemoryNetwork, PeerId, SessionConfig, SessionManager};
//!
//! let network = MemoryNetwork::new();
//! let (transport, events) = network.join(PeerId::new("alice"))?;
//! let session = SessionManager::start(Arc::new(transport), events, SessionConfig::default()).await?;
//!
//! session.on_nearby_update(|player| println!("{} is {:?}", player.name, player.status));
//! session.on_data_received(|data, from| println!("{} bytes from {}", data.len(), from.name));
//! ```

mod config;
mod hooks;

pub use config::SessionConfig;
pub use hooks::{DataHook, PlayerHook};

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;

use self::hooks::Hooks;
use crate::discovery::{NearbyPeers, ServiceTag};
use crate::error::{NearbyError, Result};
use crate::identity::PeerId;
use crate::peer::{PeerStatus, Player};
use crate::protocol::{AuthorizationTable, ConsentPolicy, ControlMessage};
use crate::transport::{
    ConnectionState, EventReceiver, InvitationResponder, SendReport, Transport, TransportEvent,
};

/// Mutable session state
#[derive(Debug)]
struct State {
    service_tag: ServiceTag,
    nearby: NearbyPeers,
    table: AuthorizationTable,
}

/// Outcomes produced inside the session, ordered after transport events.
#[derive(Debug)]
enum SessionEvent {
    InviteFailed(PeerId),
}

struct Inner {
    transport: Arc<dyn Transport>,
    session_events: mpsc::UnboundedSender<SessionEvent>,
    config: SessionConfig,
    state: RwLock<State>,
    hooks: Hooks,
    /// Signalled whenever the transport reports a new connection
    linked: Notify,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let handle = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Inner {
    fn local(&self) -> &PeerId {
        self.transport.local_peer()
    }

    async fn connected_ids(&self) -> Vec<PeerId> {
        let linked = self.transport.connected_peers();
        self.state.read().await.table.filter_authorized(linked)
    }

    async fn set_status(&self, peer: &PeerId, status: PeerStatus) {
        self.state.write().await.nearby.set_status(peer, status);
    }

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::PeerFound(peer) => self.on_peer_found(peer).await,
            TransportEvent::PeerLost(peer) => self.on_peer_lost(peer).await,
            TransportEvent::ConnectionStateChanged(peer, state) => {
                self.on_connection_state(peer, state).await;
            }
            TransportEvent::DataReceived(from, data) => self.on_data(from, data).await,
            TransportEvent::InvitationReceived {
                from,
                context,
                responder,
            } => self.on_invitation(from, context, responder).await,
        }
    }

    async fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::InviteFailed(peer) => {
                self.set_status(&peer, PeerStatus::Available).await;
                self.hooks.connect(Player::new(peer, PeerStatus::Available));
            }
        }
    }

    async fn on_peer_found(&self, peer: PeerId) {
        let added = {
            let mut state = self.state.write().await;
            let added = state.nearby.found(peer.clone());
            if added.is_some() {
                state.table.reset(peer);
            }
            added
        };
        if let Some(player) = added {
            tracing::info!("Found {}", player.id);
            self.hooks.nearby(player);
        }
    }

    async fn on_peer_lost(&self, peer: PeerId) {
        let lost = self.state.write().await.nearby.lost(&peer);
        tracing::info!("Lost {}", lost.id);
        self.hooks.nearby(lost);
    }

    async fn on_connection_state(&self, peer: PeerId, state: ConnectionState) {
        tracing::debug!("{} is {}", peer, state);
        let status = match state {
            ConnectionState::NotConnected => PeerStatus::Available,
            ConnectionState::Connecting => PeerStatus::Connecting,
            ConnectionState::Connected => {
                self.set_status(&peer, PeerStatus::Connected).await;
                self.linked.notify_waiters();
                return;
            }
        };
        self.set_status(&peer, status).await;
        self.hooks.connect(Player::new(peer, status));
    }

    async fn on_invitation(
        &self,
        from: PeerId,
        context: Option<Bytes>,
        responder: InvitationResponder,
    ) {
        tracing::info!(
            "Invitation from {} ({} context bytes)",
            from,
            context.as_ref().map_or(0, Bytes::len)
        );
        {
            let mut state = self.state.write().await;
            match self.config.consent_policy {
                ConsentPolicy::Optimistic => state.table.authorize(from.clone()),
                ConsentPolicy::Strict => state.table.mark_pending(from.clone()),
            }
        }

        self.hooks.invitation(Player::new(from, PeerStatus::Available));

        // Transport link is always accepted; consent travels as a control message
        responder.accept();
    }

    async fn on_data(&self, from: PeerId, data: Bytes) {
        if let Some(control) = ControlMessage::decode(&data) {
            self.on_control(from, control).await;
            return;
        }

        if self.config.consent_policy == ConsentPolicy::Strict
            && !self.state.read().await.table.is_authorized(&from)
        {
            tracing::debug!("Dropping {} bytes from unauthorized {}", data.len(), from);
            return;
        }

        self.hooks.data(data, Player::new(from, PeerStatus::Connected));
    }

    async fn on_control(&self, from: PeerId, control: ControlMessage) {
        if control.sender() != &from {
            tracing::warn!(
                "Ignoring control message from {} claiming to be {}",
                from,
                control.sender()
            );
            return;
        }

        let status = {
            let mut state = self.state.write().await;
            let status = if control.is_accepted() {
                state.table.authorize(from.clone());
                PeerStatus::Connected
            } else {
                state.table.deny(from.clone());
                PeerStatus::Available
            };
            state.nearby.set_status(&from, status);
            status
        };

        let answer = if control.is_accepted() {
            "accepted"
        } else {
            "denied"
        };
        tracing::info!("{} answered: {}", from, answer);
        self.hooks.connect(Player::new(from, status));
    }

    /// Wait until the transport has a link to `peer`, up to `timeout`.
    async fn await_link(&self, peer: &PeerId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let linked = self.linked.notified();
            if self.transport.connected_peers().contains(peer) {
                return true;
            }
            if tokio::time::timeout_at(deadline, linked).await.is_err() {
                return false;
            }
        }
    }
}

/// Transport events queued before a session event are always handled first.
async fn run_event_loop(
    session: Weak<Inner>,
    mut events: EventReceiver,
    mut session_events: mpsc::UnboundedReceiver<SessionEvent>,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let Some(inner) = session.upgrade() else {
                    break;
                };
                inner.handle_event(event).await;
            }
            Some(event) = session_events.recv() => {
                let Some(inner) = session.upgrade() else {
                    break;
                };
                inner.handle_session_event(event).await;
            }
        }
    }
    tracing::debug!("Session event loop stopped");
}

/// Peer session over a [`Transport`].
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("local", self.inner.local())
            .field("transport", &self.inner.transport.name())
            .field("hooks", &self.inner.hooks)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Start a session: spawn the event loop, then advertise and browse
    /// under the configured service tag.
    ///
    /// Fails with [`NearbyError::EncryptionRequired`] when the transport
    /// does not guarantee encryption.
    pub async fn start(
        transport: Arc<dyn Transport>,
        events: EventReceiver,
        config: SessionConfig,
    ) -> Result<Self> {
        if !transport.guarantees_encryption() {
            tracing::error!("Refusing {} transport without encryption", transport.name());
            return Err(NearbyError::EncryptionRequired);
        }

        let tag = config.service_tag.clone();
        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            transport,
            session_events: session_tx,
            state: RwLock::new(State {
                service_tag: tag.clone(),
                nearby: NearbyPeers::new(),
                table: AuthorizationTable::new(),
            }),
            config,
            hooks: Hooks::new(),
            linked: Notify::new(),
            event_loop: Mutex::new(None),
        });

        let handle = tokio::spawn(run_event_loop(
            Arc::downgrade(&inner),
            events,
            session_rx,
        ));
        *inner
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        inner.transport.advertise(&tag).await?;
        inner.transport.browse(&tag).await?;
        tracing::info!(
            "Session for {} started on {} transport under '{}' ({} consent)",
            inner.local(),
            inner.transport.name(),
            tag,
            inner.config.consent_policy
        );

        Ok(Self { inner })
    }

    /// Identity this session announces.
    pub fn local_peer(&self) -> &PeerId {
        self.inner.local()
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current service tag.
    pub async fn service_tag(&self) -> ServiceTag {
        self.inner.state.read().await.service_tag.clone()
    }

    /// Invite `player`; `on_progress` becomes the connect-result hook.
    ///
    /// The connect-result hook has a single slot: a later call (or
    /// [`on_connect_result`](Self::on_connect_result)) replaces the handler
    /// for every pending connection. A failed invitation is reported once
    /// with status `Available`, after any transport events already queued.
    pub fn connect_to_player<F>(&self, player: &Player, on_progress: F) -> JoinHandle<()>
    where
        F: Fn(Player) + Send + Sync + 'static,
    {
        self.inner.hooks.set_connect(Arc::new(on_progress));

        let inner = Arc::clone(&self.inner);
        let peer = player.id.clone();
        tokio::spawn(async move {
            inner.state.write().await.table.mark_pending(peer.clone());

            let timeout = inner.config.invite_timeout();
            match inner.transport.invite(&peer, None, timeout).await {
                Ok(()) => tracing::debug!("Link to {} open, awaiting consent", peer),
                Err(e) => {
                    tracing::warn!("Invitation to {} failed: {}", peer, e);
                    if inner
                        .session_events
                        .send(SessionEvent::InviteFailed(peer))
                        .is_err()
                    {
                        tracing::debug!("Event loop gone, invite failure not reported");
                    }
                }
            }
        })
    }

    /// Send `data` to `peers`, or to every connected player when `None`.
    ///
    /// Explicit targets are not checked against the authorization table.
    pub async fn send_data(&self, data: Bytes, peers: Option<&[PeerId]>) -> SendReport {
        let targets = match peers {
            Some(peers) => peers.to_vec(),
            None => self.inner.connected_ids().await,
        };
        if targets.is_empty() {
            tracing::debug!("No recipients for {} bytes", data.len());
            return SendReport::new();
        }
        self.inner.transport.send(data, &targets).await
    }

    /// Answer an invitation from `player`.
    ///
    /// Waits up to the invite timeout for the transport link, then sends
    /// the decision. Under [`ConsentPolicy::Strict`] the decision is also
    /// recorded locally.
    pub async fn respond_to_invitation(&self, player: &Player, accept: bool) -> Result<SendReport> {
        let payload = ControlMessage::response(self.local_peer().clone(), accept)
            .encode()
            .map_err(|e| {
                tracing::error!("Cannot answer {}: {}", player.id, e);
                e
            })?;

        if self.inner.config.consent_policy == ConsentPolicy::Strict {
            let mut state = self.inner.state.write().await;
            if accept {
                state.table.authorize(player.id.clone());
            } else {
                state.table.deny(player.id.clone());
            }
        }

        if !self
            .inner
            .await_link(&player.id, self.inner.config.invite_timeout())
            .await
        {
            tracing::warn!("No link to {} yet, sending answer anyway", player.id);
        }

        tracing::info!(
            "{} invitation from {}",
            if accept { "Accepting" } else { "Denying" },
            player.id
        );
        Ok(self
            .inner
            .transport
            .send(payload, std::slice::from_ref(&player.id))
            .await)
    }

    /// Nearby players, excluding connected ones.
    pub async fn nearby_players(&self) -> Vec<Player> {
        let connected = self.inner.connected_ids().await;
        self.inner
            .state
            .read()
            .await
            .nearby
            .iter()
            .filter(|player| !connected.contains(&player.id))
            .cloned()
            .collect()
    }

    /// Players that are both linked and authorized.
    pub async fn connected_players(&self) -> Vec<Player> {
        self.inner
            .connected_ids()
            .await
            .into_iter()
            .map(|peer| Player::new(peer, PeerStatus::Connected))
            .collect()
    }

    /// Check whether `peer` is authorized.
    pub async fn is_authorized(&self, peer: &PeerId) -> bool {
        self.inner.state.read().await.table.is_authorized(peer)
    }

    /// Switch discovery to another service tag; the same tag is a no-op.
    pub async fn set_service_tag(&self, tag: ServiceTag) -> Result<()> {
        {
            let mut state = self.inner.state.write().await;
            if state.service_tag == tag {
                return Ok(());
            }
            state.service_tag = tag.clone();
        }

        let transport = &self.inner.transport;
        transport.stop_advertising().await?;
        transport.stop_browsing().await?;
        transport.advertise(&tag).await?;
        transport.browse(&tag).await?;
        tracing::info!("Service tag changed to '{}'", tag);
        Ok(())
    }

    /// Close the link to `player`.
    pub async fn disconnect(&self, player: &Player) -> Result<()> {
        self.inner.transport.disconnect(&player.id).await
    }

    /// Register the nearby-update hook, replacing any previous one.
    pub fn on_nearby_update<F>(&self, hook: F)
    where
        F: Fn(Player) + Send + Sync + 'static,
    {
        self.inner.hooks.set_nearby(Arc::new(hook));
    }

    /// Register the invitation hook, replacing any previous one.
    pub fn on_invitation_received<F>(&self, hook: F)
    where
        F: Fn(Player) + Send + Sync + 'static,
    {
        self.inner.hooks.set_invitation(Arc::new(hook));
    }

    /// Register the data hook, replacing any previous one.
    pub fn on_data_received<F>(&self, hook: F)
    where
        F: Fn(Bytes, Player) + Send + Sync + 'static,
    {
        self.inner.hooks.set_data(Arc::new(hook));
    }

    /// Register the connect-result hook, replacing any previous one.
    pub fn on_connect_result<F>(&self, hook: F)
    where
        F: Fn(Player) + Send + Sync + 'static,
    {
        self.inner.hooks.set_connect(Arc::new(hook));
    }

    /// Stop advertising and browsing and stop the event loop.
    pub async fn shutdown(&self) {
        if let Err(e) = self.inner.transport.stop_advertising().await {
            tracing::warn!("Failed to stop advertising: {}", e);
        }
        if let Err(e) = self.inner.transport.stop_browsing().await {
            tracing::warn!("Failed to stop browsing: {}", e);
        }

        let handle = self
            .inner
            .event_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        tracing::info!("Session for {} shut down", self.local_peer());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use crate::transport::{event_channel, EventSender, MemoryNetwork};

    /// Session whose events are fed by hand instead of by the transport.
    async fn manual_session(policy: ConsentPolicy) -> (SessionManager, EventSender, MemoryNetwork) {
        let network = MemoryNetwork::new();
        let (transport, _transport_events) = network.join(PeerId::new("local")).unwrap();
        let (tx, rx) = event_channel();
        let config = SessionConfig::default().with_consent_policy(policy);
        let session = SessionManager::start(Arc::new(transport), rx, config)
            .await
            .unwrap();
        (session, tx, network)
    }

    fn recorder() -> (Arc<StdMutex<Vec<Player>>>, impl Fn(Player) + Send + Sync + 'static) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |player| sink.lock().unwrap().push(player))
    }

    #[tokio::test]
    async fn test_found_resets_authorization() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let alice = PeerId::new("alice");
        let (seen, hook) = recorder();
        session.on_nearby_update(hook);

        session.inner.state.write().await.table.authorize(alice.clone());
        session
            .inner
            .handle_event(TransportEvent::PeerFound(alice.clone()))
            .await;
        session
            .inner
            .handle_event(TransportEvent::PeerFound(alice.clone()))
            .await;

        assert!(!session.is_authorized(&alice).await);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(session.nearby_players().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lost_always_notifies() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let (seen, hook) = recorder();
        session.on_nearby_update(hook);

        session
            .inner
            .handle_event(TransportEvent::PeerLost(PeerId::new("ghost")))
            .await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].status, Some(PeerStatus::Lost));
    }

    #[tokio::test]
    async fn test_optimistic_invitation_authorizes_before_hook() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let bob = PeerId::new("bob");

        let probe = session.clone();
        let authorized_in_hook = Arc::new(StdMutex::new(None));
        let slot = Arc::clone(&authorized_in_hook);
        session.on_invitation_received(move |player| {
            let state = probe.inner.state.try_read().map(|s| s.table.is_authorized(&player.id));
            *slot.lock().unwrap() = state.ok();
        });

        let (responder, answer) = InvitationResponder::new();
        session
            .inner
            .handle_event(TransportEvent::InvitationReceived {
                from: bob.clone(),
                context: None,
                responder,
            })
            .await;

        assert_eq!(*authorized_in_hook.lock().unwrap(), Some(true));
        assert!(answer.await.unwrap());
        assert!(session.is_authorized(&bob).await);
    }

    #[tokio::test]
    async fn test_strict_invitation_is_pending() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Strict).await;
        let bob = PeerId::new("bob");
        let (responder, _answer) = InvitationResponder::new();

        session
            .inner
            .handle_event(TransportEvent::InvitationReceived {
                from: bob.clone(),
                context: None,
                responder,
            })
            .await;

        assert!(!session.is_authorized(&bob).await);
    }

    #[tokio::test]
    async fn test_control_messages_update_table() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let (seen, hook) = recorder();
        session.on_connect_result(hook);
        let alice = PeerId::new("alice");

        let accepted = ControlMessage::response(alice.clone(), true).encode().unwrap();
        session
            .inner
            .handle_event(TransportEvent::DataReceived(alice.clone(), accepted))
            .await;
        assert!(session.is_authorized(&alice).await);

        let denied = ControlMessage::response(alice.clone(), false).encode().unwrap();
        session
            .inner
            .handle_event(TransportEvent::DataReceived(alice.clone(), denied))
            .await;
        assert!(!session.is_authorized(&alice).await);

        let statuses: Vec<_> = seen.lock().unwrap().iter().map(|p| p.status).collect();
        assert_eq!(statuses, vec![Some(PeerStatus::Connected), Some(PeerStatus::Available)]);
    }

    #[tokio::test]
    async fn test_spoofed_control_message_ignored() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let (seen, hook) = recorder();
        session.on_connect_result(hook);
        let mallory = PeerId::new("mallory");
        let alice = PeerId::new("alice");

        let forged = ControlMessage::response(alice.clone(), true).encode().unwrap();
        session
            .inner
            .handle_event(TransportEvent::DataReceived(mallory, forged))
            .await;

        assert!(!session.is_authorized(&alice).await);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_states_drive_connect_hook() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let (seen, hook) = recorder();
        session.on_connect_result(hook);
        let alice = PeerId::new("alice");

        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::NotConnected,
        ] {
            session
                .inner
                .handle_event(TransportEvent::ConnectionStateChanged(alice.clone(), state))
                .await;
        }

        let statuses: Vec<_> = seen.lock().unwrap().iter().map(|p| p.status).collect();
        assert_eq!(statuses, vec![Some(PeerStatus::Connecting), Some(PeerStatus::Available)]);
    }

    #[tokio::test]
    async fn test_failed_invite_reported_after_queued_connecting() {
        let (session, tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let (seen, hook) = recorder();
        let ghost = PeerId::new("ghost");
        session
            .inner
            .handle_event(TransportEvent::PeerFound(ghost.clone()))
            .await;

        // The invite task is scheduled ahead of the event loop, so its
        // failure lands while Connecting is still queued
        let player = Player::new(ghost.clone(), PeerStatus::Available);
        let invite = session.connect_to_player(&player, hook);
        tx.send(TransportEvent::ConnectionStateChanged(
            ghost.clone(),
            ConnectionState::Connecting,
        ))
        .unwrap();
        invite.await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let statuses: Vec<_> = seen.lock().unwrap().iter().map(|p| p.status).collect();
        assert_eq!(statuses, vec![Some(PeerStatus::Connecting), Some(PeerStatus::Available)]);
        let nearby = session.nearby_players().await;
        assert_eq!(nearby[0].status, Some(PeerStatus::Available));
    }

    #[tokio::test]
    async fn test_opaque_data_relayed_as_connected() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let received = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        session.on_data_received(move |data, player| sink.lock().unwrap().push((data, player)));

        let alice = PeerId::new("alice");
        session
            .inner
            .handle_event(TransportEvent::DataReceived(
                alice.clone(),
                Bytes::from_static(b"{\"anchor\": 1}"),
            ))
            .await;

        let received = received.lock().unwrap();
        assert_eq!(received[0].0.as_ref(), b"{\"anchor\": 1}");
        assert_eq!(received[0].1.id, alice);
        assert!(received[0].1.is_connected());
    }

    #[tokio::test]
    async fn test_strict_drops_unauthorized_data() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Strict).await;
        let count = Arc::new(StdMutex::new(0usize));
        let sink = Arc::clone(&count);
        session.on_data_received(move |_, _| *sink.lock().unwrap() += 1);

        session
            .inner
            .handle_event(TransportEvent::DataReceived(
                PeerId::new("stranger"),
                Bytes::from_static(b"payload"),
            ))
            .await;

        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_without_connections_is_noop() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let report = session.send_data(Bytes::from_static(b"x"), None).await;
        assert_eq!(report.attempted(), 0);

        let report = session.send_data(Bytes::from_static(b"x"), Some(&[])).await;
        assert_eq!(report.attempted(), 0);
    }

    #[tokio::test]
    async fn test_same_tag_is_noop() {
        let (session, _tx, _network) = manual_session(ConsentPolicy::Optimistic).await;
        let tag = session.service_tag().await;
        session.set_service_tag(tag.clone()).await.unwrap();
        assert_eq!(session.service_tag().await, tag);

        let other = ServiceTag::new("other").unwrap();
        session.set_service_tag(other.clone()).await.unwrap();
        assert_eq!(session.service_tag().await, other);
    }

    #[tokio::test]
    async fn test_refuses_insecure_transport() {
        let network = MemoryNetwork::insecure();
        let (transport, events) = network.join(PeerId::new("local")).unwrap();
        let result =
            SessionManager::start(Arc::new(transport), events, SessionConfig::default()).await;
        assert!(matches!(result, Err(NearbyError::EncryptionRequired)));
    }
}
