//! Online-presence tracking.
//!
//! Consumes `PresenceChanged` events from the coordinator and keeps the
//! set of currently-online users. Nothing persists across sessions; the
//! set is cleared on disconnect and rebuilt from the events the server
//! replays after (re-)connecting.

use std::collections::HashSet;

use parking_lot::RwLock;

use chatsync_proto::ids::UserId;

/// Set of users currently online, per the event stream.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: RwLock<HashSet<UserId>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a presence change. Duplicate events are harmless; a user is
    /// in the set at most once.
    pub fn apply(&self, user_id: UserId, online: bool) {
        let mut set = self.online.write();
        if online {
            set.insert(user_id);
        } else {
            set.remove(&user_id);
        }
    }

    /// Whether `user_id` is currently online.
    #[must_use]
    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.online.read().contains(user_id)
    }

    /// Snapshot of all online user ids.
    #[must_use]
    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.online.read().iter().cloned().collect()
    }

    /// Forget all presence state (call on disconnect).
    pub fn clear(&self) {
        self.online.write().clear();
    }
}
