//! Persistence collaborator interfaces.
//!
//! The real-time core never talks to a database directly: it calls these
//! traits and treats every returned value as an immutable snapshot. The
//! in-memory implementations back tests and single-process deployments.

pub mod chat;
pub mod kv;

pub use chat::{ChatStore, MemoryChatStore};
pub use kv::{KeyValueStore, MemoryStore};

/// Failure of a persistence-collaborator call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{0} not found")]
    Missing(&'static str),
}
