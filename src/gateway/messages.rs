//! Message fan-out engine: validated mutations, commit, then broadcast.
//!
//! Every operation commits through the store before anything is dispatched;
//! a persistence failure aborts the operation with no broadcast. Mutations
//! of one message (reaction toggles, edits, deletes) run under a per-message
//! critical section so interleaved read-modify-write cycles cannot lose
//! updates.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::id;
use crate::models::message::{FileMeta, Message, MessageKind, ResolvedMessage};
use crate::models::user::Profile;
use crate::store::ChatStore;

use super::events::{EventName, SendMessagePayload};
use super::fanout::{BroadcastPayload, RoomBroadcast};
use super::rooms::{resolve_room, RoomIndex};

pub struct MessageFanout {
    store: Arc<dyn ChatStore>,
    index: Arc<RoomIndex>,
    broadcast: Arc<RoomBroadcast>,
    /// Per-message mutation locks, keyed by message ID.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MessageFanout {
    pub fn new(
        store: Arc<dyn ChatStore>,
        index: Arc<RoomIndex>,
        broadcast: Arc<RoomBroadcast>,
    ) -> Self {
        Self {
            store,
            index,
            broadcast,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, message_id: &str) -> Arc<Mutex<()>> {
        let entry = self.locks.entry(message_id.to_string()).or_default();
        Arc::clone(entry.value())
    }

    async fn sender_profile(&self, user_id: &str) -> Result<Profile, GatewayError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(GatewayError::NotFound("User"))?;
        Ok(user.profile())
    }

    /// Validate, persist and fan out a new message.
    ///
    /// The committed message goes to every connection subscribed to the
    /// room; a room summary additionally goes to every connection of each
    /// participant, so room lists stay current without a room subscription.
    pub async fn submit(
        &self,
        sender_id: &str,
        payload: SendMessagePayload,
    ) -> Result<ResolvedMessage, GatewayError> {
        // Room-level critical section: held through dispatch so a submit
        // that commits second cannot broadcast first, and the room's
        // last-message pointer cannot regress to a stale snapshot.
        let room_lock = self.index.lock_for(&payload.room_id);
        let _room_guard = room_lock.lock().await;

        let room = self
            .index
            .verify_participant(&payload.room_id, sender_id)
            .await?;

        let content = payload.content.as_deref().unwrap_or("").trim().to_string();
        let file = match payload.kind {
            MessageKind::Text => {
                if content.is_empty() {
                    return Err(GatewayError::Validation(
                        "Message content is required".to_string(),
                    ));
                }
                None
            }
            MessageKind::File | MessageKind::Image => {
                let url = payload.file_url.clone().ok_or_else(|| {
                    GatewayError::Validation("File URL is required".to_string())
                })?;
                Some(FileMeta {
                    url,
                    name: payload.file_name.clone(),
                    size: payload.file_size,
                })
            }
        };

        let sender = self.sender_profile(sender_id).await?;

        let now = Utc::now();
        let message = Message {
            id: id::prefixed_ulid(id::prefix::MESSAGE),
            room_id: room.id.clone(),
            sender_id: sender_id.to_string(),
            content,
            kind: payload.kind,
            file,
            reactions: Vec::new(),
            edited: false,
            edited_at: None,
            created_at: now,
        };

        let message = self.store.save_message(message).await?;
        let room = self
            .store
            .save_room(room.with_last_message(&message.id, now))
            .await?;

        let resolved = message.resolve(sender);
        self.broadcast.dispatch(BroadcastPayload::room(
            &room.id,
            EventName::NEW_MESSAGE,
            serde_json::to_value(&resolved)
                .map_err(|e| GatewayError::Transport(e.to_string()))?,
        ));

        // Room summaries are delivered per participant identity; failure to
        // resolve here cannot un-commit the message, so it is only logged.
        match resolve_room(self.store.as_ref(), &room).await {
            Ok(resolved_room) => {
                let data = serde_json::to_value(&resolved_room)
                    .map_err(|e| GatewayError::Transport(e.to_string()))?;
                for participant in &room.participants {
                    self.broadcast.dispatch(BroadcastPayload::user(
                        participant,
                        EventName::ROOM_UPDATED,
                        data.clone(),
                    ));
                }
            }
            Err(err) => {
                tracing::warn!(room_id = %room.id, %err, "failed to resolve room summary");
            }
        }

        Ok(resolved)
    }

    /// Toggle `user_id`'s reaction on a message and fan out the new state.
    pub async fn react(
        &self,
        user_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<ResolvedMessage, GatewayError> {
        let lock = self.lock_for(message_id);
        let _guard = lock.lock().await;

        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or(GatewayError::NotFound("Message"))?;
        self.index
            .verify_participant(&message.room_id, user_id)
            .await?;

        let message = self
            .store
            .save_message(message.with_reaction_toggled(user_id, emoji))
            .await?;

        let sender = self.sender_profile(&message.sender_id).await?;
        let resolved = message.resolve(sender);
        self.broadcast.dispatch(BroadcastPayload::room(
            &resolved.message.room_id,
            EventName::MESSAGE_REACTION_UPDATED,
            serde_json::to_value(&resolved)
                .map_err(|e| GatewayError::Transport(e.to_string()))?,
        ));
        Ok(resolved)
    }

    /// Replace a message's content. Only the original sender may edit.
    pub async fn edit(
        &self,
        user_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<ResolvedMessage, GatewayError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(GatewayError::Validation(
                "Message content is required".to_string(),
            ));
        }

        let lock = self.lock_for(message_id);
        let _guard = lock.lock().await;

        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or(GatewayError::NotFound("Message"))?;
        if message.sender_id != user_id {
            return Err(GatewayError::AccessDenied);
        }

        let message = self
            .store
            .save_message(message.with_content(content.to_string(), Utc::now()))
            .await?;

        let sender = self.sender_profile(&message.sender_id).await?;
        let resolved = message.resolve(sender);
        self.broadcast.dispatch(BroadcastPayload::room(
            &resolved.message.room_id,
            EventName::MESSAGE_UPDATED,
            serde_json::to_value(&resolved)
                .map_err(|e| GatewayError::Transport(e.to_string()))?,
        ));
        Ok(resolved)
    }

    /// Remove a message. Only the original sender may delete.
    pub async fn delete(&self, user_id: &str, message_id: &str) -> Result<(), GatewayError> {
        let lock = self.lock_for(message_id);
        let _guard = lock.lock().await;

        let message = self
            .store
            .find_message(message_id)
            .await?
            .ok_or(GatewayError::NotFound("Message"))?;
        if message.sender_id != user_id {
            return Err(GatewayError::AccessDenied);
        }

        // The room document is written here too, so take its lock (always
        // after the message lock) for the commit-and-dispatch span.
        let room_lock = self.index.lock_for(&message.room_id);
        let _room_guard = room_lock.lock().await;

        self.store.delete_message(message_id).await?;

        // Clear the room's last-message pointer if it referenced this one.
        if let Some(room) = self.store.find_room(&message.room_id).await? {
            if room.last_message.as_deref() == Some(message_id) {
                self.store
                    .save_room(room.without_last_message(message_id))
                    .await?;
            }
        }

        self.broadcast.dispatch(BroadcastPayload::room(
            &message.room_id,
            EventName::MESSAGE_DELETED,
            serde_json::json!({
                "id": message.id,
                "room_id": message.room_id,
            }),
        ));

        drop(_guard);
        self.locks.remove(message_id);
        Ok(())
    }
}
