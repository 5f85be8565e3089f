//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::ServiceTag;
use crate::identity::PeerId;
use crate::protocol::{ConsentPolicy, INVITE_TIMEOUT_SECS};

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Discovery scope shared by all peers of one application
    pub service_tag: ServiceTag,
    /// Name shown to other peers (host name when unset)
    pub display_name: Option<String>,
    /// Outbound invitation timeout in milliseconds
    pub invite_timeout_ms: u64,
    /// Effect of an inbound invitation on the authorization table
    pub consent_policy: ConsentPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            service_tag: ServiceTag::default(),
            display_name: None,
            invite_timeout_ms: INVITE_TIMEOUT_SECS * 1000,
            consent_policy: ConsentPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Set the service tag
    pub fn with_service_tag(mut self, tag: ServiceTag) -> Self {
        self.service_tag = tag;
        self
    }

    /// Set the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the invitation timeout
    pub fn with_invite_timeout(mut self, timeout: Duration) -> Self {
        self.invite_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the consent policy
    pub fn with_consent_policy(mut self, policy: ConsentPolicy) -> Self {
        self.consent_policy = policy;
        self
    }

    /// Invitation timeout as a duration
    pub fn invite_timeout(&self) -> Duration {
        Duration::from_millis(self.invite_timeout_ms)
    }

    /// Fresh identity for this process.
    pub fn local_peer(&self) -> PeerId {
        match &self.display_name {
            Some(name) => PeerId::new(name.clone()),
            None => PeerId::local(),
        }
    }
}
