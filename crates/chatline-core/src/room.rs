//! Room membership.
//!
//! A room is the realtime fan-out scope of one chat; its name is the chat
//! identifier. Membership is held per connection and never outlives it.

use crate::connection::ConnectionId;
use chatline_protocol::ChatId;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// A room identifier.
pub type RoomId = ChatId;

/// Room membership errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// Maximum rooms per connection reached.
    #[error("Maximum rooms per connection reached ({0})")]
    MaxRoomsReached(usize),
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error if the name is empty, too long or contains control
/// characters.
pub fn validate_room_name(name: &str) -> Result<(), RoomError> {
    if name.is_empty() {
        return Err(RoomError::InvalidRoom("Room name cannot be empty"));
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err(RoomError::InvalidRoom("Room name too long"));
    }
    if name.chars().any(char::is_control) {
        return Err(RoomError::InvalidRoom("Room name contains control characters"));
    }
    Ok(())
}

/// Tracks which connections subscribe to which rooms.
#[derive(Debug)]
pub struct RoomMembership {
    /// room -> subscribed connections
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
    /// connection -> joined rooms
    memberships: HashMap<ConnectionId, HashSet<RoomId>>,
    max_rooms_per_connection: usize,
}

impl RoomMembership {
    /// Create an empty membership table.
    #[must_use]
    pub fn new(max_rooms_per_connection: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            memberships: HashMap::new(),
            max_rooms_per_connection,
        }
    }

    /// Add a connection to a room.
    ///
    /// Returns `true` if the connection was not already a member.
    ///
    /// # Errors
    ///
    /// Returns an error if the room name is invalid or the connection is
    /// already in the maximum number of rooms.
    pub fn join(&mut self, connection_id: &ConnectionId, room: &str) -> Result<bool, RoomError> {
        validate_room_name(room)?;

        let joined = self.memberships.entry(connection_id.clone()).or_default();
        if joined.contains(room) {
            return Ok(false);
        }
        if joined.len() >= self.max_rooms_per_connection {
            return Err(RoomError::MaxRoomsReached(self.max_rooms_per_connection));
        }
        joined.insert(room.to_string());

        let subscribers = self.rooms.entry(room.to_string()).or_default();
        subscribers.insert(connection_id.clone());

        debug!(
            room = %room,
            connection = %connection_id,
            subscribers = subscribers.len(),
            "Joined room"
        );
        Ok(true)
    }

    /// Remove a connection from a room.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&mut self, connection_id: &str, room: &str) -> bool {
        let removed = match self.memberships.get_mut(connection_id) {
            Some(joined) => {
                let removed = joined.remove(room);
                if joined.is_empty() {
                    self.memberships.remove(connection_id);
                }
                removed
            }
            None => false,
        };

        if removed {
            self.drop_subscriber(room, connection_id);
            debug!(room = %room, connection = %connection_id, "Left room");
        }
        removed
    }

    /// Remove a connection from every room it joined.
    ///
    /// Returns the rooms it left.
    pub fn leave_all(&mut self, connection_id: &str) -> Vec<RoomId> {
        let Some(joined) = self.memberships.remove(connection_id) else {
            return Vec::new();
        };

        for room in &joined {
            self.drop_subscriber(room, connection_id);
        }

        debug!(connection = %connection_id, rooms = joined.len(), "Left all rooms");
        joined.into_iter().collect()
    }

    fn drop_subscriber(&mut self, room: &str, connection_id: &str) {
        if let Some(subscribers) = self.rooms.get_mut(room) {
            subscribers.remove(connection_id);
            if subscribers.is_empty() {
                self.rooms.remove(room);
                debug!(room = %room, "Deleted empty room");
            }
        }
    }

    /// Connections subscribed to a room.
    pub fn subscribers(&self, room: &str) -> impl Iterator<Item = &ConnectionId> {
        self.rooms.get(room).into_iter().flatten()
    }

    /// Number of connections subscribed to a room.
    #[must_use]
    pub fn subscriber_count(&self, room: &str) -> usize {
        self.rooms.get(room).map_or(0, HashSet::len)
    }

    /// Check whether a connection is in a room.
    #[must_use]
    pub fn is_member(&self, connection_id: &str, room: &str) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|subscribers| subscribers.contains(connection_id))
    }

    /// Rooms a connection has joined.
    #[must_use]
    pub fn rooms_of(&self, connection_id: &str) -> Vec<RoomId> {
        self.memberships
            .get(connection_id)
            .map(|joined| joined.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rooms with at least one subscriber.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Total number of (connection, room) memberships.
    #[must_use]
    pub fn membership_count(&self) -> usize {
        self.memberships.values().map(HashSet::len).sum()
    }
}

impl Default for RoomMembership {
    fn default() -> Self {
        Self::new(100)
    }
}
