pub mod health;
pub mod messages;
pub mod rooms;

use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest("/api/v1", rooms::router().merge(messages::router()))
}
