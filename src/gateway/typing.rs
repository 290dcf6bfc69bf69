//! Ephemeral per-(identity, room) typing marks with timeout-based expiry.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// How long a typing mark stays alive without a refresh. The timeout is
/// authoritative: a lost stop signal must not strand an indicator.
pub const TYPING_TTL: Duration = Duration::from_secs(1);

/// A typing mark drained by the sweeper or a disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingMark {
    pub user_id: String,
    pub room_id: String,
}

/// Tracks which identities are composing in which rooms. Marks are never
/// persisted; they live only in this map.
pub struct TypingTracker {
    marks: DashMap<(String, String), Instant>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self {
            marks: DashMap::new(),
        }
    }

    /// Create or refresh a mark. Returns true only when the mark is new, so
    /// a repeated start for an already-active pair is a broadcast no-op.
    pub fn start(&self, user_id: &str, room_id: &str) -> bool {
        let deadline = Instant::now() + TYPING_TTL;
        self.marks
            .insert((user_id.to_string(), room_id.to_string()), deadline)
            .is_none()
    }

    /// Remove a mark. Returns true if one existed.
    pub fn stop(&self, user_id: &str, room_id: &str) -> bool {
        self.marks
            .remove(&(user_id.to_string(), room_id.to_string()))
            .is_some()
    }

    pub fn is_typing(&self, user_id: &str, room_id: &str) -> bool {
        self.marks
            .get(&(user_id.to_string(), room_id.to_string()))
            .is_some_and(|deadline| *deadline > Instant::now())
    }

    /// Drain every mark past its deadline.
    pub fn sweep_expired(&self) -> Vec<TypingMark> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.marks.retain(|(user_id, room_id), deadline| {
            if *deadline <= now {
                expired.push(TypingMark {
                    user_id: user_id.clone(),
                    room_id: room_id.clone(),
                });
                false
            } else {
                true
            }
        });
        expired
    }

    /// Drain every mark owned by a disconnecting identity, returning the
    /// affected room IDs.
    pub fn remove_user(&self, user_id: &str) -> Vec<String> {
        let mut rooms = Vec::new();
        self.marks.retain(|(owner, room_id), _| {
            if owner == user_id {
                rooms.push(room_id.clone());
                false
            } else {
                true
            }
        });
        rooms
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_reports_new_marks_only() {
        let tracker = TypingTracker::new();
        assert!(tracker.start("usr_a", "room_1"));
        // Refresh of an active pair: dedup, no broadcast.
        assert!(!tracker.start("usr_a", "room_1"));
        // Same identity in a different room is a distinct mark.
        assert!(tracker.start("usr_a", "room_2"));
        assert!(tracker.is_typing("usr_a", "room_1"));
    }

    #[test]
    fn stop_removes_the_mark() {
        let tracker = TypingTracker::new();
        tracker.start("usr_a", "room_1");
        assert!(tracker.stop("usr_a", "room_1"));
        assert!(!tracker.stop("usr_a", "room_1"));
        assert!(!tracker.is_typing("usr_a", "room_1"));
    }

    #[test]
    fn sweep_drains_only_expired_marks() {
        let tracker = TypingTracker::new();
        tracker.start("usr_a", "room_1");
        tracker.start("usr_b", "room_1");

        // Backdate one mark past its deadline.
        tracker.marks.insert(
            ("usr_a".to_string(), "room_1".to_string()),
            Instant::now() - Duration::from_millis(10),
        );

        let expired = tracker.sweep_expired();
        assert_eq!(
            expired,
            vec![TypingMark {
                user_id: "usr_a".to_string(),
                room_id: "room_1".to_string(),
            }]
        );
        assert!(!tracker.is_typing("usr_a", "room_1"));
        assert!(tracker.is_typing("usr_b", "room_1"));

        // Already drained: a second sweep finds nothing.
        assert!(tracker.sweep_expired().is_empty());
    }

    #[test]
    fn refresh_extends_the_deadline() {
        let tracker = TypingTracker::new();
        tracker.start("usr_a", "room_1");
        tracker.marks.insert(
            ("usr_a".to_string(), "room_1".to_string()),
            Instant::now() - Duration::from_millis(10),
        );

        // A refresh before the sweep keeps the mark alive.
        tracker.start("usr_a", "room_1");
        assert!(tracker.sweep_expired().is_empty());
        assert!(tracker.is_typing("usr_a", "room_1"));
    }

    #[test]
    fn remove_user_drains_all_their_marks() {
        let tracker = TypingTracker::new();
        tracker.start("usr_a", "room_1");
        tracker.start("usr_a", "room_2");
        tracker.start("usr_b", "room_1");

        let mut rooms = tracker.remove_user("usr_a");
        rooms.sort();
        assert_eq!(rooms, vec!["room_1", "room_2"]);
        assert!(!tracker.is_typing("usr_a", "room_1"));
        assert!(tracker.is_typing("usr_b", "room_1"));
    }
}
