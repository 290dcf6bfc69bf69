use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::models::message::Message;
use crate::models::room::Room;
use crate::models::user::User;
use crate::store::StoreError;

/// The document-store collaborator the real-time core persists through.
///
/// All returned values are snapshots: callers compute a new value and pass it
/// to the matching `save_*` call rather than mutating shared state in place.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn save_user(&self, user: User) -> Result<User, StoreError>;
    /// Record an online/offline transition. Fails with `Missing` for unknown
    /// identities; callers treat presence persistence as best-effort.
    async fn update_user_status(
        &self,
        id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn find_room(&self, id: &str) -> Result<Option<Room>, StoreError>;
    async fn save_room(&self, room: Room) -> Result<Room, StoreError>;
    /// Rooms the identity participates in, most recently active first.
    async fn rooms_for(&self, user_id: &str) -> Result<Vec<Room>, StoreError>;

    async fn find_message(&self, id: &str) -> Result<Option<Message>, StoreError>;
    async fn save_message(&self, message: Message) -> Result<Message, StoreError>;
    async fn delete_message(&self, id: &str) -> Result<(), StoreError>;
    /// A chronological window of a room's messages: the `limit` newest
    /// messages older than `before` (or the newest overall), oldest first.
    async fn messages_for(
        &self,
        room_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryChatStore {
    users: Mutex<HashMap<String, User>>,
    rooms: Mutex<HashMap<String, Room>>,
    messages: Mutex<HashMap<String, Message>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().get(id).cloned())
    }

    async fn save_user(&self, user: User) -> Result<User, StoreError> {
        self.users.lock().insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn update_user_status(
        &self,
        id: &str,
        is_online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut users = self.users.lock();
        let user = users.get_mut(id).ok_or(StoreError::Missing("user"))?;
        user.is_online = is_online;
        user.last_seen = last_seen;
        Ok(())
    }

    async fn find_room(&self, id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.lock().get(id).cloned())
    }

    async fn save_room(&self, room: Room) -> Result<Room, StoreError> {
        self.rooms.lock().insert(room.id.clone(), room.clone());
        Ok(room)
    }

    async fn rooms_for(&self, user_id: &str) -> Result<Vec<Room>, StoreError> {
        let mut rooms: Vec<Room> = self
            .rooms
            .lock()
            .values()
            .filter(|r| r.is_participant(user_id))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(rooms)
    }

    async fn find_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.lock().get(id).cloned())
    }

    async fn save_message(&self, message: Message) -> Result<Message, StoreError> {
        self.messages
            .lock()
            .insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn delete_message(&self, id: &str) -> Result<(), StoreError> {
        self.messages.lock().remove(id);
        Ok(())
    }

    async fn messages_for(
        &self,
        room_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        // Message IDs are ULIDs, so lexicographic order is creation order.
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .values()
            .filter(|m| m.room_id == room_id)
            .filter(|m| before.map_or(true, |b| m.id.as_str() < b))
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }
}
