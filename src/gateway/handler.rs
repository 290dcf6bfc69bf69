//! IDENTIFY processing: token verification and session bootstrap.

use std::collections::HashSet;

use serde_json::Value;

use crate::auth::tokens;
use crate::id;
use crate::AppState;

use super::events::{EventName, GatewayMessage, IdentifyPayload};
use super::rooms::resolve_room;
use super::session::GatewaySession;

/// Heartbeat interval sent to clients in the READY payload (ms).
pub const HEARTBEAT_INTERVAL_MS: u64 = 41250;

/// Process an IDENTIFY opcode. Returns a (`GatewaySession`, READY message)
/// on success. The session starts subscribed to every room the identity
/// participates in.
pub async fn handle_identify(
    state: &AppState,
    payload: IdentifyPayload,
) -> Result<(GatewaySession, GatewayMessage), &'static str> {
    let token_data = tokens::verify_access_token(state.kv.as_ref(), &payload.token)
        .await
        .map_err(|_| "Token lookup failed")?
        .ok_or("Invalid or expired token")?;

    let user = state
        .store
        .find_user(&token_data.user_id)
        .await
        .map_err(|_| "Store unavailable")?
        .ok_or("User not found")?;

    let rooms = state
        .store
        .rooms_for(&user.id)
        .await
        .map_err(|_| "Failed to load rooms")?;
    let room_ids: HashSet<String> = rooms.iter().map(|r| r.id.clone()).collect();

    let mut room_data: Vec<Value> = Vec::with_capacity(rooms.len());
    for room in &rooms {
        let resolved = resolve_room(state.store.as_ref(), room)
            .await
            .map_err(|_| "Failed to load rooms")?;
        room_data.push(serde_json::to_value(&resolved).unwrap_or_default());
    }

    let connection_id = id::prefixed_ulid(id::prefix::CONNECTION);

    let ready_data = serde_json::json!({
        "connection_id": connection_id,
        "user": {
            "id": user.id,
            "name": user.name,
            "email": user.email,
            "avatar": user.avatar,
        },
        "rooms": room_data,
        "heartbeat_interval": HEARTBEAT_INTERVAL_MS,
    });

    let session = GatewaySession::new(connection_id, user.id, user.name, room_ids);
    let seq = session.next_seq();
    let ready_msg = GatewayMessage::dispatch(EventName::READY, seq, ready_data);

    Ok((session, ready_msg))
}
