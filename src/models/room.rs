use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id;
use crate::models::message::ResolvedMessage;
use crate::models::user::User;

/// A named set of participant identities sharing a message stream.
///
/// Store snapshots are immutable: every mutation computes a new value and
/// hands it to an explicit `save_room` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub participants: Vec<String>,
    pub is_private: bool,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn new(
        name: String,
        description: Option<String>,
        is_private: bool,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id::prefixed_ulid(id::prefix::ROOM),
            name,
            description,
            participants: vec![created_by.clone()],
            is_private,
            created_by,
            last_message: None,
            last_activity: now,
            created_at: now,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }

    /// A copy of this room with `user_id` added to the participant set.
    pub fn with_participant(&self, user_id: &str) -> Room {
        let mut next = self.clone();
        if !next.is_participant(user_id) {
            next.participants.push(user_id.to_string());
        }
        next
    }

    /// A copy of this room with `user_id` removed from the participant set.
    pub fn without_participant(&self, user_id: &str) -> Room {
        let mut next = self.clone();
        next.participants.retain(|p| p != user_id);
        next
    }

    /// A copy of this room with the last-message pointer and activity
    /// timestamp advanced to a newly committed message.
    pub fn with_last_message(&self, message_id: &str, at: DateTime<Utc>) -> Room {
        let mut next = self.clone();
        next.last_message = Some(message_id.to_string());
        next.last_activity = at;
        next
    }

    /// A copy of this room with the last-message pointer cleared if it
    /// references `message_id`.
    pub fn without_last_message(&self, message_id: &str) -> Room {
        let mut next = self.clone();
        if next.last_message.as_deref() == Some(message_id) {
            next.last_message = None;
        }
        next
    }
}

/// Wire view of a room with participant profiles and the last message
/// inlined, for room lists and `room-updated` events.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedRoom {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub participants: Vec<User>,
    pub is_private: bool,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<ResolvedMessage>,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
