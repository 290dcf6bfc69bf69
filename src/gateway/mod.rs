//! The real-time core: room fan-out, presence and typing coordination.

pub mod events;
pub mod fanout;
pub mod handler;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod server;
pub mod session;
pub mod typing;

use std::time::Duration;

use crate::AppState;

/// How often the server-authoritative typing sweeper runs.
const TYPING_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Spawn the background task that expires typing marks whose owners never
/// sent a stop signal (lost packets, dropped transports).
pub fn spawn_typing_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(TYPING_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            for mark in state.typing.sweep_expired() {
                tracing::debug!(user_id = %mark.user_id, room_id = %mark.room_id, "typing mark expired");
                state.broadcast.dispatch(fanout::BroadcastPayload::room(
                    &mark.room_id,
                    events::EventName::USER_STOPPED_TYPING,
                    serde_json::json!({
                        "user_id": mark.user_id,
                        "room_id": mark.room_id,
                    }),
                ));
            }
        }
    });
}
