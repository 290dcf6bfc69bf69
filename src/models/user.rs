use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated identity, independent of any particular connection.
///
/// The store owns this record; the gateway only caches profile fields per
/// session and treats the connection registry as authoritative for liveness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Profile fields inlined into resolved messages and rooms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            avatar: self.avatar.clone(),
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }
}
