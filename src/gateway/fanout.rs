//! Broadcast router for dispatching events to connected sessions.
//!
//! One `tokio::sync::broadcast` channel fans events out to every session
//! task, which filters locally against the payload's scope. Each session
//! delivers on its own socket, so a slow connection never blocks the rest,
//! and an event scoped to a room structurally cannot reach a connection that
//! is not subscribed to it.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast;

use super::session::GatewaySession;

/// Capacity of the broadcast channel. Slow receivers that fall behind will
/// skip messages (RecvError::Lagged) and reconcile over REST on reconnect.
const BROADCAST_CAPACITY: usize = 4096;

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastScope {
    /// Every connection subscribed to the room.
    Room(String),
    /// Every live connection owned by the identity.
    User(String),
}

/// A payload broadcast to connected gateway sessions.
#[derive(Debug, Clone)]
pub struct BroadcastPayload {
    pub scope: BroadcastScope,
    /// Connection excluded from delivery (the originator of typing events).
    pub except: Option<String>,
    /// The dispatch event name (e.g. "new-message").
    pub event_name: String,
    /// Serialized event data.
    pub data: Value,
}

impl BroadcastPayload {
    pub fn room(room_id: &str, event_name: &str, data: Value) -> Self {
        Self {
            scope: BroadcastScope::Room(room_id.to_string()),
            except: None,
            event_name: event_name.to_string(),
            data,
        }
    }

    pub fn room_except(room_id: &str, except: &str, event_name: &str, data: Value) -> Self {
        Self {
            scope: BroadcastScope::Room(room_id.to_string()),
            except: Some(except.to_string()),
            event_name: event_name.to_string(),
            data,
        }
    }

    pub fn user(user_id: &str, event_name: &str, data: Value) -> Self {
        Self {
            scope: BroadcastScope::User(user_id.to_string()),
            except: None,
            event_name: event_name.to_string(),
            data,
        }
    }

    /// Whether this payload should be delivered on the given session.
    pub fn targets(&self, session: &GatewaySession) -> bool {
        if self.except.as_deref() == Some(session.connection_id.as_str()) {
            return false;
        }
        match &self.scope {
            BroadcastScope::Room(room_id) => session.is_subscribed(room_id),
            BroadcastScope::User(user_id) => session.user_id == *user_id,
        }
    }
}

/// The global broadcast router. Cloneable — stored in AppState.
#[derive(Clone)]
pub struct RoomBroadcast {
    sender: broadcast::Sender<Arc<BroadcastPayload>>,
}

impl RoomBroadcast {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    /// Subscribe to the broadcast channel. Each gateway session calls this
    /// once to get its own receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<BroadcastPayload>> {
        self.sender.subscribe()
    }

    /// Dispatch an event to all connected sessions.
    pub fn dispatch(&self, payload: BroadcastPayload) {
        // send() returns Err if there are no receivers — that's fine.
        let _ = self.sender.send(Arc::new(payload));
    }
}

impl Default for RoomBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn session(conn_id: &str, user_id: &str, rooms: &[&str]) -> GatewaySession {
        GatewaySession::new(
            conn_id.to_string(),
            user_id.to_string(),
            user_id.to_string(),
            rooms.iter().map(|s| s.to_string()).collect::<HashSet<_>>(),
        )
    }

    #[test]
    fn room_scope_targets_only_subscribed_connections() {
        let subscribed = session("conn_1", "usr_a", &["room_1"]);
        let outsider = session("conn_2", "usr_b", &["room_2"]);

        let payload = BroadcastPayload::room("room_1", "new-message", serde_json::json!({}));
        assert!(payload.targets(&subscribed));
        assert!(!payload.targets(&outsider));
    }

    #[test]
    fn user_scope_targets_every_connection_of_the_identity() {
        let phone = session("conn_1", "usr_a", &["room_1"]);
        let laptop = session("conn_2", "usr_a", &[]);
        let other = session("conn_3", "usr_b", &["room_1"]);

        let payload = BroadcastPayload::user("usr_a", "room-updated", serde_json::json!({}));
        assert!(payload.targets(&phone));
        assert!(payload.targets(&laptop));
        assert!(!payload.targets(&other));
    }

    #[test]
    fn except_skips_the_originator_only() {
        let originator = session("conn_1", "usr_a", &["room_1"]);
        let peer = session("conn_2", "usr_b", &["room_1"]);

        let payload =
            BroadcastPayload::room_except("room_1", "conn_1", "user-typing", serde_json::json!({}));
        assert!(!payload.targets(&originator));
        assert!(payload.targets(&peer));
    }

    #[tokio::test]
    async fn dispatch_reaches_all_subscribers_in_order() {
        let hub = RoomBroadcast::new();
        let mut rx_a = hub.subscribe();
        let mut rx_b = hub.subscribe();

        hub.dispatch(BroadcastPayload::room("room_1", "first", serde_json::json!({})));
        hub.dispatch(BroadcastPayload::room("room_1", "second", serde_json::json!({})));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await.unwrap().event_name, "first");
            assert_eq!(rx.recv().await.unwrap().event_name, "second");
        }
    }
}
