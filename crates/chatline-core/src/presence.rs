//! Presence broadcasting.
//!
//! Presence is global rather than room scoped: every open connection hears
//! every online/offline transition. The broadcaster keeps the audience (all
//! open connections) and the time each user came online, and derives its
//! events from session registry changes.

use crate::connection::ConnectionId;
use crate::delivery::{broadcast, Delivery};
use chatline_protocol::{OnlineUser, ServerEvent, UserId};
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Most users listed in one `presence:snapshot` event.
///
/// Keeps each snapshot well under the frame limit even with the longest
/// user ids.
pub const SNAPSHOT_CHUNK_SIZE: usize = 1000;

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Global presence broadcaster.
#[derive(Debug, Default)]
pub struct Presence {
    /// Every open connection, announced or not.
    audience: HashSet<ConnectionId>,
    /// When each online user came online.
    online_since: HashMap<UserId, u64>,
}

impl Presence {
    /// Create an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open connection to the audience.
    ///
    /// Returns `true` if it was not already attached.
    pub fn attach(&mut self, connection_id: ConnectionId) -> bool {
        self.audience.insert(connection_id)
    }

    /// Remove a closed connection from the audience.
    pub fn detach(&mut self, connection_id: &str) -> bool {
        self.audience.remove(connection_id)
    }

    /// Check whether a connection is attached.
    #[must_use]
    pub fn is_attached(&self, connection_id: &str) -> bool {
        self.audience.contains(connection_id)
    }

    /// Number of attached connections.
    #[must_use]
    pub fn audience_size(&self) -> usize {
        self.audience.len()
    }

    /// Record `user_id` as online and tell everyone.
    pub fn online(&mut self, user_id: &str, at: u64) -> Vec<Delivery> {
        self.online_since.insert(user_id.to_string(), at);
        debug!(user = %user_id, audience = self.audience.len(), "Presence: online");
        broadcast(&self.audience, ServerEvent::UserOnline(user_id.to_string()))
    }

    /// Record `user_id` as offline and tell everyone.
    pub fn offline(&mut self, user_id: &str) -> Vec<Delivery> {
        self.online_since.remove(user_id);
        debug!(user = %user_id, audience = self.audience.len(), "Presence: offline");
        broadcast(&self.audience, ServerEvent::UserOffline(user_id.to_string()))
    }

    /// Everyone currently online, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .online_since
            .iter()
            .map(|(user_id, since)| OnlineUser {
                user_id: user_id.clone(),
                online_since: *since,
            })
            .collect();
        users.sort_by(|a, b| {
            a.online_since
                .cmp(&b.online_since)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        users
    }

    /// The snapshot split into chunks of at most `size` users.
    ///
    /// Always yields at least one chunk, so an empty server still answers
    /// with an empty snapshot.
    #[must_use]
    pub fn snapshot_chunks(&self, size: usize) -> Vec<Vec<OnlineUser>> {
        let users = self.snapshot();
        if users.is_empty() {
            return vec![Vec::new()];
        }
        users.chunks(size.max(1)).map(<[OnlineUser]>::to_vec).collect()
    }

    /// When a user came online.
    #[must_use]
    pub fn online_since(&self, user_id: &str) -> Option<u64> {
        self.online_since.get(user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_reaches_whole_audience() {
        let mut presence = Presence::new();
        presence.attach("c1".into());
        presence.attach("c2".into());

        let deliveries = presence.online("alice", 10);
        assert_eq!(deliveries.len(), 2);
        assert!(deliveries
            .iter()
            .all(|d| *d.event == ServerEvent::UserOnline("alice".into())));
        assert_eq!(presence.online_since("alice"), Some(10));
    }

    #[test]
    fn test_offline_skips_detached() {
        let mut presence = Presence::new();
        presence.attach("c1".into());
        presence.attach("c2".into());
        presence.online("alice", 10);

        assert!(presence.detach("c1"));
        let deliveries = presence.offline("alice");
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].target.as_str(), "c2");
        assert_eq!(presence.online_since("alice"), None);
    }

    #[test]
    fn test_snapshot_chunks() {
        let mut presence = Presence::new();
        assert_eq!(presence.snapshot_chunks(2), vec![Vec::new()]);

        for (i, user) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            presence.online(user, i as u64);
        }
        let chunks = presence.snapshot_chunks(2);
        let sizes: Vec<_> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(chunks.concat(), presence.snapshot());
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let mut presence = Presence::new();
        presence.online("carol", 30);
        presence.online("alice", 10);
        presence.online("bob", 10);

        let users: Vec<_> = presence
            .snapshot()
            .into_iter()
            .map(|u| u.user_id)
            .collect();
        assert_eq!(users, vec!["alice", "bob", "carol"]);
    }
}
