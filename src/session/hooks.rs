//! Consumer callbacks.
//!
//! Each hook has a single slot: registering a handler replaces whatever was
//! registered before. Handlers are cloned out of the lock before they run,
//! so a handler may call back into the session.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use crate::peer::Player;

/// Handler receiving a player update.
pub type PlayerHook = Arc<dyn Fn(Player) + Send + Sync>;

/// Handler receiving an application payload and its sender.
pub type DataHook = Arc<dyn Fn(Bytes, Player) + Send + Sync>;

#[derive(Default, Clone)]
struct Slots {
    nearby: Option<PlayerHook>,
    invitation: Option<PlayerHook>,
    data: Option<DataHook>,
    connect: Option<PlayerHook>,
}

/// Registered consumer callbacks.
#[derive(Default)]
pub struct Hooks {
    slots: RwLock<Slots>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.read();
        f.debug_struct("Hooks")
            .field("nearby", &slots.nearby.is_some())
            .field("invitation", &slots.invitation.is_some())
            .field("data", &slots.data.is_some())
            .field("connect", &slots.connect.is_some())
            .finish()
    }
}

impl Hooks {
    /// Create with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_nearby(&self, hook: PlayerHook) {
        self.write().nearby = Some(hook);
    }

    pub(crate) fn set_invitation(&self, hook: PlayerHook) {
        self.write().invitation = Some(hook);
    }

    pub(crate) fn set_data(&self, hook: DataHook) {
        self.write().data = Some(hook);
    }

    pub(crate) fn set_connect(&self, hook: PlayerHook) {
        self.write().connect = Some(hook);
    }

    /// Fire the nearby-update hook.
    pub(crate) fn nearby(&self, player: Player) {
        let hook = self.read().nearby.clone();
        if let Some(hook) = hook {
            hook(player);
        }
    }

    /// Fire the invitation hook.
    pub(crate) fn invitation(&self, player: Player) {
        let hook = self.read().invitation.clone();
        match hook {
            Some(hook) => hook(player),
            None => tracing::debug!("No invitation handler for {}", player.id),
        }
    }

    /// Fire the data hook.
    pub(crate) fn data(&self, data: Bytes, player: Player) {
        let hook = self.read().data.clone();
        match hook {
            Some(hook) => hook(data, player),
            None => tracing::debug!(
                "Dropping {} bytes from {}: no data handler",
                data.len(),
                player.id
            ),
        }
    }

    /// Fire the connect-result hook.
    pub(crate) fn connect(&self, player: Player) {
        let hook = self.read().connect.clone();
        if let Some(hook) = hook {
            hook(player);
        }
    }
}
