//! Connection registry: live connections per identity, reference-counted.

use dashmap::DashMap;
use std::collections::HashSet;

/// Maps each identity to the set of its live connection IDs.
///
/// One identity may own many concurrent connections (multi-device);
/// unregistering one must not report the identity offline while another
/// remains live.
pub struct ConnectionRegistry {
    users: DashMap<String, HashSet<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Record a new live connection. Returns true when this is the
    /// identity's first live connection (it just came online).
    pub fn register(&self, user_id: &str, connection_id: &str) -> bool {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        let first = entry.is_empty();
        entry.insert(connection_id.to_string());
        first
    }

    /// Remove a connection. Returns true when it was the identity's last
    /// live connection (it just went offline).
    pub fn unregister(&self, user_id: &str, connection_id: &str) -> bool {
        let last = match self.users.get_mut(user_id) {
            Some(mut entry) => {
                entry.remove(connection_id);
                entry.is_empty()
            }
            None => return false,
        };
        if last {
            self.users.remove_if(user_id, |_, conns| conns.is_empty());
        }
        last
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|conns| !conns.is_empty())
    }

    pub fn connection_count(&self, user_id: &str) -> usize {
        self.users.get(user_id).map_or(0, |conns| conns.len())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
