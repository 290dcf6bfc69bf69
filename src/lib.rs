pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod id;
pub mod models;
pub mod routes;
pub mod store;

use std::sync::Arc;

use config::Config;
use gateway::fanout::RoomBroadcast;
use gateway::messages::MessageFanout;
use gateway::presence::PresenceTracker;
use gateway::registry::ConnectionRegistry;
use gateway::rooms::RoomIndex;
use gateway::typing::TypingTracker;
use store::{ChatStore, KeyValueStore};

/// Shared application state available to all route handlers and sessions.
///
/// Registries live here, owned by the process and handed to components
/// explicitly; their lifecycle is the server's lifecycle.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub config: Arc<Config>,
    pub broadcast: Arc<RoomBroadcast>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub typing: Arc<TypingTracker>,
    pub rooms: Arc<RoomIndex>,
    pub messages: Arc<MessageFanout>,
}

impl AppState {
    pub fn new(store: Arc<dyn ChatStore>, kv: Arc<dyn KeyValueStore>, config: Config) -> Self {
        let broadcast = Arc::new(RoomBroadcast::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(registry.clone(), store.clone()));
        let typing = Arc::new(TypingTracker::new());
        let rooms = Arc::new(RoomIndex::new(store.clone()));
        let messages = Arc::new(MessageFanout::new(
            store.clone(),
            rooms.clone(),
            broadcast.clone(),
        ));

        Self {
            store,
            kv,
            config: Arc::new(config),
            broadcast,
            registry,
            presence,
            typing,
            rooms,
            messages,
        }
    }
}
