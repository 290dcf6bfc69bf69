//! Room membership index: store-authoritative participant checks and
//! per-connection subscription management.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::models::room::{ResolvedRoom, Room};
use crate::models::user::User;
use crate::store::{ChatStore, StoreError};

use super::session::GatewaySession;

pub struct RoomIndex {
    store: Arc<dyn ChatStore>,
    /// Per-room mutation locks, keyed by room ID. Writers of the room
    /// document and ordered fan-out paths hold the lock from commit through
    /// dispatch, so broadcast order cannot diverge from commit order and
    /// concurrent read-modify-write cycles on the same room cannot lose
    /// updates.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RoomIndex {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// The mutation lock for a room.
    pub fn lock_for(&self, room_id: &str) -> Arc<Mutex<()>> {
        let entry = self.locks.entry(room_id.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Rooms the identity participates in, most recently active first.
    pub async fn rooms_for(&self, user_id: &str) -> Result<Vec<Room>, GatewayError> {
        Ok(self.store.rooms_for(user_id).await?)
    }

    /// Participant identity set of a room.
    pub async fn participants_of(&self, room_id: &str) -> Result<Vec<String>, GatewayError> {
        let room = self
            .store
            .find_room(room_id)
            .await?
            .ok_or(GatewayError::NotFound("Room"))?;
        Ok(room.participants)
    }

    /// Confirm the identity is currently in the room's participant set,
    /// returning the room snapshot. The check always goes to the store so a
    /// revoked membership cannot linger in a cached view.
    pub async fn verify_participant(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<Room, GatewayError> {
        let room = self
            .store
            .find_room(room_id)
            .await?
            .ok_or(GatewayError::NotFound("Room"))?;
        if !room.is_participant(user_id) {
            return Err(GatewayError::AccessDenied);
        }
        Ok(room)
    }

    /// Subscribe a connection to a room's broadcast group. Membership is
    /// re-verified at call time; non-participants are rejected.
    pub async fn subscribe(
        &self,
        session: &GatewaySession,
        room_id: &str,
    ) -> Result<Room, GatewayError> {
        let room = self.verify_participant(room_id, &session.user_id).await?;
        session.subscribe(room_id);
        Ok(room)
    }

    pub fn unsubscribe(&self, session: &GatewaySession, room_id: &str) {
        session.unsubscribe(room_id);
    }
}

/// Inline participant profiles and the last message into a room view (the
/// wire shape of room lists and `room-updated` events).
pub async fn resolve_room(store: &dyn ChatStore, room: &Room) -> Result<ResolvedRoom, StoreError> {
    let mut participants: Vec<User> = Vec::with_capacity(room.participants.len());
    for user_id in &room.participants {
        if let Some(user) = store.find_user(user_id).await? {
            participants.push(user);
        }
    }

    let last_message = match &room.last_message {
        Some(message_id) => match store.find_message(message_id).await? {
            Some(message) => {
                let sender = store
                    .find_user(&message.sender_id)
                    .await?
                    .ok_or(StoreError::Missing("user"))?;
                Some(message.resolve(sender.profile()))
            }
            None => None,
        },
        None => None,
    };

    Ok(ResolvedRoom {
        id: room.id.clone(),
        name: room.name.clone(),
        description: room.description.clone(),
        participants,
        is_private: room.is_private,
        created_by: room.created_by.clone(),
        last_message,
        last_activity: room.last_activity,
        created_at: room.created_at,
    })
}
