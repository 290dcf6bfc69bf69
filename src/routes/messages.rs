//! Message history endpoint: how clients reconcile after missing broadcasts
//! (offline targets are never queued or retried).

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use crate::auth::middleware::AuthUser;
use crate::error::ApiError;
use crate::models::message::ResolvedMessage;
use crate::models::user::Profile;
use crate::AppState;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 100;

pub fn router() -> Router<AppState> {
    Router::new().route("/rooms/{room_id}/messages", get(list_messages))
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesParams {
    pub before: Option<String>,
    pub limit: Option<usize>,
}

async fn list_messages(
    AuthUser { user_id }: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<ListMessagesParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.rooms.verify_participant(&room_id, &user_id).await?;

    // Clamp so limit=0 cannot produce an empty page claiming more history.
    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let messages = state
        .store
        .messages_for(&room_id, params.before.as_deref(), limit)
        .await?;

    // Inline sender profiles, fetching each sender once.
    let mut profiles: HashMap<String, Profile> = HashMap::new();
    let mut resolved: Vec<ResolvedMessage> = Vec::with_capacity(messages.len());
    for message in messages {
        let profile = match profiles.get(&message.sender_id) {
            Some(p) => p.clone(),
            None => {
                let user = state
                    .store
                    .find_user(&message.sender_id)
                    .await?
                    .ok_or_else(|| ApiError::internal("Message sender missing"))?;
                let p = user.profile();
                profiles.insert(message.sender_id.clone(), p.clone());
                p
            }
        };
        resolved.push(message.resolve(profile));
    }

    let has_more = resolved.len() == limit;
    Ok(Json(json!({ "messages": resolved, "has_more": has_more })))
}
