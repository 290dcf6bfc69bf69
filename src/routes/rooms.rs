//! Room CRUD endpoints. Membership mutations made here are pushed to live
//! gateway connections through the broadcast router.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, FieldError};
use crate::gateway::events::EventName;
use crate::gateway::fanout::BroadcastPayload;
use crate::gateway::rooms::resolve_room;
use crate::models::room::{ResolvedRoom, Room};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{room_id}", get(get_room).put(update_room))
        .route("/rooms/{room_id}/join", post(join_room))
        .route("/rooms/{room_id}/leave", post(leave_room))
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms
// ---------------------------------------------------------------------------

async fn list_rooms(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let rooms = state.store.rooms_for(&user_id).await?;

    let mut resolved: Vec<ResolvedRoom> = Vec::with_capacity(rooms.len());
    for room in &rooms {
        resolved.push(resolve_room(state.store.as_ref(), room).await?);
    }

    Ok(Json(json!({ "rooms": resolved })))
}

// ---------------------------------------------------------------------------
// POST /api/v1/rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

async fn create_room(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let name = body.name.as_deref().map(str::trim).unwrap_or("");
    if name.is_empty() {
        return Err(ApiError::validation(vec![FieldError {
            field: "name".to_string(),
            message: "Room name is required".to_string(),
        }]));
    }

    let room = Room::new(
        name.to_string(),
        body.description.filter(|d| !d.is_empty()),
        body.is_private,
        user_id.clone(),
    );
    let room = state.store.save_room(room).await?;
    let resolved = resolve_room(state.store.as_ref(), &room).await?;

    // Live connections of the creator subscribe to the new room.
    state.broadcast.dispatch(BroadcastPayload::user(
        &user_id,
        EventName::ROOM_JOINED,
        json!({ "room_id": room.id, "room": resolved }),
    ));

    Ok((StatusCode::CREATED, Json(json!({ "room": resolved }))))
}

// ---------------------------------------------------------------------------
// GET /api/v1/rooms/{room_id}
// ---------------------------------------------------------------------------

async fn get_room(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let room = state.rooms.verify_participant(&room_id, &user_id).await?;
    let resolved = resolve_room(state.store.as_ref(), &room).await?;
    Ok(Json(json!({ "room": resolved })))
}

// ---------------------------------------------------------------------------
// PUT /api/v1/rooms/{room_id}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UpdateRoomRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

async fn update_room(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(body): Json<UpdateRoomRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let lock = state.rooms.lock_for(&room_id);
    let _guard = lock.lock().await;

    let room = state
        .store
        .find_room(&room_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Room not found"))?;

    if room.created_by != user_id {
        return Err(ApiError::forbidden("Only the room creator can update the room"));
    }

    let mut next = room;
    if let Some(name) = body.name.as_deref().map(str::trim) {
        if name.is_empty() {
            return Err(ApiError::validation(vec![FieldError {
                field: "name".to_string(),
                message: "Room name cannot be empty".to_string(),
            }]));
        }
        next.name = name.to_string();
    }
    if let Some(description) = body.description {
        next.description = Some(description).filter(|d| !d.is_empty());
    }

    let room = state.store.save_room(next).await?;
    let resolved = resolve_room(state.store.as_ref(), &room).await?;
    let room_data = serde_json::to_value(&resolved)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    for participant in &room.participants {
        state.broadcast.dispatch(BroadcastPayload::user(
            participant,
            EventName::ROOM_UPDATED,
            room_data.clone(),
        ));
    }

    Ok(Json(json!({
        "message": "Room updated successfully",
        "room": resolved,
    })))
}

// ---------------------------------------------------------------------------
// POST /api/v1/rooms/{room_id}/join
// ---------------------------------------------------------------------------

async fn join_room(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Serialize membership writes per room: two concurrent joins must not
    // save from the same stale snapshot and erase each other.
    let lock = state.rooms.lock_for(&room_id);
    let _guard = lock.lock().await;

    let room = state
        .store
        .find_room(&room_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Room not found"))?;

    if room.is_participant(&user_id) {
        return Err(ApiError::bad_request("Already a member of this room"));
    }

    let room = state.store.save_room(room.with_participant(&user_id)).await?;
    let resolved = resolve_room(state.store.as_ref(), &room).await?;
    let room_data = serde_json::to_value(&resolved)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    // Subscribe the joiner's live connections, then update everyone's lists.
    state.broadcast.dispatch(BroadcastPayload::user(
        &user_id,
        EventName::ROOM_JOINED,
        json!({ "room_id": room.id, "room": room_data }),
    ));
    for participant in &room.participants {
        state.broadcast.dispatch(BroadcastPayload::user(
            participant,
            EventName::ROOM_UPDATED,
            room_data.clone(),
        ));
    }

    Ok(Json(json!({ "room": resolved })))
}

// ---------------------------------------------------------------------------
// POST /api/v1/rooms/{room_id}/leave
// ---------------------------------------------------------------------------

async fn leave_room(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let lock = state.rooms.lock_for(&room_id);
    let _guard = lock.lock().await;

    let room = state
        .store
        .find_room(&room_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Room not found"))?;

    if !room.is_participant(&user_id) {
        return Err(ApiError::bad_request("Not a member of this room"));
    }

    let room = state
        .store
        .save_room(room.without_participant(&user_id))
        .await?;

    // Unsubscribe the leaver's live connections, then update the remaining
    // participants' lists.
    state.broadcast.dispatch(BroadcastPayload::user(
        &user_id,
        EventName::ROOM_LEFT,
        json!({ "room_id": room.id }),
    ));
    let resolved = resolve_room(state.store.as_ref(), &room).await?;
    let room_data = serde_json::to_value(&resolved)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    for participant in &room.participants {
        state.broadcast.dispatch(BroadcastPayload::user(
            participant,
            EventName::ROOM_UPDATED,
            room_data.clone(),
        ));
    }

    Ok(Json(json!({ "message": "Left room successfully" })))
}
