use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::user::Profile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    File,
    Image,
}

/// Opaque file metadata handed in by the client for file/image messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// One emoji with the set of identities that reacted with it. A user appears
/// at most once per emoji.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub users: Vec<String>,
}

/// A committed chat message. Identity, room and sender are immutable once
/// created; content and reactions change only through the defined operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileMeta>,
    pub reactions: Vec<Reaction>,
    pub edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Toggle `user_id`'s reaction for `emoji`, returning the new snapshot.
    ///
    /// If the user already reacted with this emoji, the reaction is removed
    /// (and the emoji entry dropped once its reactor set empties); otherwise
    /// it is added. Applying the toggle twice returns to the prior state.
    pub fn with_reaction_toggled(&self, user_id: &str, emoji: &str) -> Message {
        let mut next = self.clone();
        if let Some(pos) = next.reactions.iter().position(|r| r.emoji == emoji) {
            let users = &mut next.reactions[pos].users;
            if let Some(idx) = users.iter().position(|u| u == user_id) {
                users.remove(idx);
                let empty = users.is_empty();
                if empty {
                    next.reactions.remove(pos);
                }
            } else {
                users.push(user_id.to_string());
            }
        } else {
            next.reactions.push(Reaction {
                emoji: emoji.to_string(),
                users: vec![user_id.to_string()],
            });
        }
        next
    }

    /// A copy of this message with new content and the edited marker set.
    pub fn with_content(&self, content: String, at: DateTime<Utc>) -> Message {
        let mut next = self.clone();
        next.content = content;
        next.edited = true;
        next.edited_at = Some(at);
        next
    }

    /// Inline the sender profile for broadcast.
    pub fn resolve(self, sender: Profile) -> ResolvedMessage {
        ResolvedMessage {
            message: self,
            sender,
        }
    }
}

/// Wire view of a message with the sender profile inlined.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Profile,
}
