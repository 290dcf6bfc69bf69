//! Per-connection gateway session state.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// State for a single WebSocket connection.
///
/// The subscribed-room set is always a subset of the rooms the owning
/// identity participates in: it starts from the membership loaded at
/// IDENTIFY and changes only through verified subscribe/unsubscribe calls.
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Authenticated user ID.
    pub user_id: String,
    /// Display name cached at IDENTIFY time, inlined into typing events.
    pub name: String,
    /// Room IDs this connection currently receives events for.
    rooms: RwLock<HashSet<String>>,
    /// Monotonically increasing sequence number for dispatch events.
    seq: AtomicU64,
}

impl GatewaySession {
    pub fn new(
        connection_id: String,
        user_id: String,
        name: String,
        rooms: HashSet<String>,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            name,
            rooms: RwLock::new(rooms),
            seq: AtomicU64::new(0),
        }
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Check whether this connection should receive events for a room.
    pub fn is_subscribed(&self, room_id: &str) -> bool {
        self.rooms.read().contains(room_id)
    }

    /// Add a room to the subscription set. Returns false if already present.
    pub fn subscribe(&self, room_id: &str) -> bool {
        self.rooms.write().insert(room_id.to_string())
    }

    /// Remove a room from the subscription set. Returns false if absent.
    pub fn unsubscribe(&self, room_id: &str) -> bool {
        self.rooms.write().remove(room_id)
    }

    /// Snapshot of the subscribed rooms, for teardown broadcasts.
    pub fn subscribed_rooms(&self) -> Vec<String> {
        self.rooms.read().iter().cloned().collect()
    }
}
