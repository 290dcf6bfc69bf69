#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;

use parley_api::auth::tokens::{self, TokenData};
use parley_api::config::Config;
use parley_api::id;
use parley_api::models::room::Room;
use parley_api::models::user::User;
use parley_api::store::{ChatStore, MemoryChatStore, MemoryStore};
use parley_api::AppState;

/// Build an `AppState` backed by in-memory stores, suitable for both
/// `TestServer` REST tests and real-socket gateway tests.
pub fn test_state() -> AppState {
    let store = Arc::new(MemoryChatStore::new());
    let kv = Arc::new(MemoryStore::new());
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
    };
    AppState::new(store, kv, config)
}

/// Seed a user and mint an access token for them.
/// Returns (user_id, token).
pub async fn seed_user(state: &AppState, name: &str) -> (String, String) {
    let user = User {
        id: id::prefixed_ulid(id::prefix::USER),
        name: name.to_string(),
        email: format!("{name}@example.com"),
        avatar: None,
        is_online: false,
        last_seen: Utc::now(),
    };
    let user = state.store.save_user(user).await.expect("save user");

    let token = tokens::generate_access_token();
    tokens::store_access_token(
        state.kv.as_ref(),
        &token,
        &TokenData {
            user_id: user.id.clone(),
        },
    )
    .await
    .expect("store token");

    (user.id, token)
}

/// Seed a room. The first member is the creator; the rest join it.
pub async fn seed_room(state: &AppState, name: &str, members: &[&str]) -> Room {
    let mut room = Room::new(name.to_string(), None, false, members[0].to_string());
    for member in &members[1..] {
        room = room.with_participant(member);
    }
    state.store.save_room(room).await.expect("save room")
}
