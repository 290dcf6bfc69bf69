//! Presence tracking derived from connection-registry transitions.
//!
//! Presence is per-identity, not per-connection: an identity goes offline
//! only when its last live connection disappears. Transitions are pushed to
//! the rooms the identity belongs to and persisted through the store
//! best-effort — presence is advisory, so a failed write is logged, never
//! fatal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::ChatStore;

use super::registry::ConnectionRegistry;

/// An online/offline transition to broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceUpdate {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn ChatStore>) -> Self {
        Self { registry, store }
    }

    /// Register a connection coming online. Returns a transition to
    /// broadcast when this was the identity's first live connection.
    pub async fn connected(&self, user_id: &str, connection_id: &str) -> Option<PresenceUpdate> {
        let first = self.registry.register(user_id, connection_id);
        let now = Utc::now();

        if let Err(err) = self.store.update_user_status(user_id, true, now).await {
            tracing::warn!(%user_id, %err, "failed to persist online status");
        }

        first.then(|| PresenceUpdate {
            user_id: user_id.to_string(),
            is_online: true,
            last_seen: now,
        })
    }

    /// Register a connection going away. Returns a transition to broadcast
    /// when this was the identity's last live connection.
    pub async fn disconnected(&self, user_id: &str, connection_id: &str) -> Option<PresenceUpdate> {
        let last = self.registry.unregister(user_id, connection_id);
        if !last {
            return None;
        }
        let now = Utc::now();

        if let Err(err) = self.store.update_user_status(user_id, false, now).await {
            tracing::warn!(%user_id, %err, "failed to persist offline status");
        }

        Some(PresenceUpdate {
            user_id: user_id.to_string(),
            is_online: false,
            last_seen: now,
        })
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.registry.is_online(user_id)
    }
}
