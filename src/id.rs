//! Prefixed ULID identifiers used across the API and the gateway.

use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// ULIDs are lexicographically sortable by creation time, which the message
/// store relies on for chronological paging.
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const USER: &str = "usr";
    pub const ROOM: &str = "room";
    pub const MESSAGE: &str = "msg";
    pub const CONNECTION: &str = "conn";
}
