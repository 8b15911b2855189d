//! Session registry.
//!
//! Maps a logical user to the single connection currently speaking for it.
//! The last announcement wins: a user who opens a second tab moves its
//! session to the new connection, and the old connection's eventual
//! disconnect must not clobber the fresher session.

use crate::connection::ConnectionId;
use crate::delivery::Delivery;
use chatline_protocol::{ServerEvent, UserId};
use std::collections::HashMap;
use tracing::{debug, trace};

/// What changed when a session was registered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registration {
    /// The user's previous connection, if the user moved to a new one.
    pub superseded: Option<ConnectionId>,
    /// The identity this connection held before, if it announced as a
    /// different user.
    pub released_user: Option<UserId>,
}

impl Registration {
    /// Whether the registration changed nothing.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        self.superseded.is_none() && self.released_user.is_none()
    }
}

/// Registry of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// user -> connection
    by_user: HashMap<UserId, ConnectionId>,
    /// connection -> user, only for connections that are still current
    by_connection: HashMap<ConnectionId, UserId>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `connection_id`, replacing any previous binding of
    /// either side.
    pub fn register(&mut self, user_id: &str, connection_id: &ConnectionId) -> Registration {
        let mut registration = Registration::default();

        // The connection used to speak for someone else
        if let Some(previous) = self.by_connection.get(connection_id.as_str()) {
            if previous != user_id {
                let previous = previous.clone();
                if self.by_user.get(&previous) == Some(connection_id) {
                    self.by_user.remove(&previous);
                }
                registration.released_user = Some(previous);
            }
        }

        let old = self
            .by_user
            .insert(user_id.to_string(), connection_id.clone());
        if let Some(old) = old.filter(|old| old != connection_id) {
            self.by_connection.remove(old.as_str());
            debug!(user = %user_id, old = %old, new = %connection_id, "Session superseded");
            registration.superseded = Some(old);
        }

        self.by_connection
            .insert(connection_id.clone(), user_id.to_string());

        debug!(user = %user_id, connection = %connection_id, "Session registered");
        registration
    }

    /// Resolve a user to its live connection.
    #[must_use]
    pub fn resolve(&self, user_id: &str) -> Option<&ConnectionId> {
        self.by_user.get(user_id)
    }

    /// The user a connection currently speaks for.
    #[must_use]
    pub fn user_of(&self, connection_id: &str) -> Option<&UserId> {
        self.by_connection.get(connection_id)
    }

    /// Remove the session owned by `connection_id`.
    ///
    /// Returns the user that went offline, or `None` if the connection never
    /// registered or was already superseded by a newer connection.
    pub fn unregister(&mut self, connection_id: &str) -> Option<UserId> {
        let user_id = self.by_connection.remove(connection_id)?;

        if self
            .by_user
            .get(&user_id)
            .is_some_and(|current| current.as_str() == connection_id)
        {
            self.by_user.remove(&user_id);
            debug!(user = %user_id, connection = %connection_id, "Session unregistered");
            Some(user_id)
        } else {
            trace!(user = %user_id, connection = %connection_id, "Ignoring stale unregister");
            None
        }
    }

    /// Check whether a user has a live session.
    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// All users with a live session.
    pub fn online_users(&self) -> impl Iterator<Item = &UserId> {
        self.by_user.keys()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_user.len()
    }

    /// Whether no session is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    /// Address an event to a user's live connection.
    ///
    /// Returns `None` when the user has no session; callers drop the event.
    #[must_use]
    pub fn deliver(&self, user_id: &str, event: ServerEvent) -> Option<Delivery> {
        match self.resolve(user_id) {
            Some(connection) => Some(Delivery::new(connection.clone(), event)),
            None => {
                debug!(user = %user_id, event = event.name(), "Recipient offline, dropping event");
                None
            }
        }
    }
}
