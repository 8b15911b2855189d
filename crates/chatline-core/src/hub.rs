//! The realtime hub.
//!
//! The hub owns the session registry, room membership, presence and call
//! state, and turns each inbound client event into the deliveries it causes.
//! It is plain synchronous state: the server drives it from a single task so
//! every mutation happens in one strict sequence.

use crate::call::{CallError, CallPolicy, CallSignaling};
use crate::connection::ConnectionId;
use crate::delivery::Delivery;
use crate::presence::{now_millis, Presence, SNAPSHOT_CHUNK_SIZE};
use crate::relay;
use crate::room::{validate_room_name, RoomError, RoomMembership};
use crate::session::SessionRegistry;
use chatline_protocol::{ClientEvent, ServerEvent, UserId};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Maximum user identifier length.
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Reasons an inbound event was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The connection is not attached to the hub.
    #[error("Unknown connection")]
    UnknownConnection,

    /// The event requires an announced identity.
    #[error("Connection has not announced a user")]
    NotAnnounced,

    /// The user identifier is unusable.
    #[error("Invalid user id: {0}")]
    InvalidUser(&'static str),

    /// The claimed sender differs from the announced user.
    #[error("Sender {claimed} does not match announced user {announced}")]
    SenderMismatch { claimed: UserId, announced: UserId },

    /// The message body was missing.
    #[error("Missing message body")]
    MissingMessage,

    /// Room membership error.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Call signaling error.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum rooms a single connection may join.
    pub max_rooms_per_connection: usize,
    /// Call signaling policy.
    pub calls: CallPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_rooms_per_connection: 100,
            calls: CallPolicy::default(),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Open connections.
    pub connections: usize,
    /// Users with a live session.
    pub online_users: usize,
    /// Rooms with at least one subscriber.
    pub rooms: usize,
    /// Total room memberships.
    pub memberships: usize,
    /// Calls in progress.
    pub active_calls: usize,
}

/// The realtime coordination core.
pub struct Hub {
    sessions: SessionRegistry,
    rooms: RoomMembership,
    presence: Presence,
    calls: CallSignaling,
}

impl Hub {
    /// Create an empty hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create an empty hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            sessions: SessionRegistry::new(),
            rooms: RoomMembership::new(config.max_rooms_per_connection),
            presence: Presence::new(),
            calls: CallSignaling::new(config.calls),
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.presence.audience_size(),
            online_users: self.sessions.len(),
            rooms: self.rooms.room_count(),
            memberships: self.rooms.membership_count(),
            active_calls: self.calls.active_calls(),
        }
    }

    /// Session registry, read only.
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Room membership, read only.
    #[must_use]
    pub fn rooms(&self) -> &RoomMembership {
        &self.rooms
    }

    /// Call state, read only.
    #[must_use]
    pub fn calls(&self) -> &CallSignaling {
        &self.calls
    }

    /// Attach a newly opened connection.
    pub fn connect(&mut self, connection_id: &ConnectionId) {
        if self.presence.attach(connection_id.clone()) {
            debug!(connection = %connection_id, "Connection attached");
        }
    }

    /// Process one client event.
    ///
    /// Malformed or out-of-order events are logged and dropped; they never
    /// change state and never produce a reply.
    pub fn handle(
        &mut self,
        connection_id: &ConnectionId,
        event: ClientEvent,
        now: Instant,
    ) -> Vec<Delivery> {
        let name = event.name();
        match self.dispatch(connection_id, event, now) {
            Ok(deliveries) => {
                debug!(
                    connection = %connection_id,
                    event = name,
                    deliveries = deliveries.len(),
                    "Handled event"
                );
                deliveries
            }
            Err(e) => {
                warn!(connection = %connection_id, event = name, error = %e, "Dropped event");
                Vec::new()
            }
        }
    }

    /// Process one client event, reporting why it was dropped.
    ///
    /// # Errors
    ///
    /// Returns the reason the event had no effect.
    pub fn dispatch(
        &mut self,
        connection_id: &ConnectionId,
        event: ClientEvent,
        now: Instant,
    ) -> Result<Vec<Delivery>, HubError> {
        if !self.presence.is_attached(connection_id.as_str()) {
            return Err(HubError::UnknownConnection);
        }

        match event {
            ClientEvent::UserJoin(user_id) => self.announce(connection_id, &user_id),

            ClientEvent::ChatJoin(chat_id) => {
                self.rooms.join(connection_id, &chat_id)?;
                Ok(Vec::new())
            }

            ClientEvent::ChatLeave(chat_id) => {
                self.rooms.leave(connection_id.as_str(), &chat_id);
                Ok(Vec::new())
            }

            ClientEvent::MessageSend(send) => self.try_publish(&send.chat_id, send.message),

            ClientEvent::MessageSeen(receipt) => {
                validate_room_name(&receipt.chat_id)?;
                Ok(relay::seen(&self.rooms, receipt))
            }

            ClientEvent::TypingStart(typing) => {
                validate_room_name(&typing.chat_id)?;
                Ok(relay::typing_start(&self.rooms, connection_id, typing))
            }

            ClientEvent::TypingStop(typing) => {
                validate_room_name(&typing.chat_id)?;
                Ok(relay::typing_stop(&self.rooms, connection_id, typing))
            }

            ClientEvent::CallInitiate(initiate) => {
                let from = self.announced(connection_id)?;
                if initiate.from != from {
                    return Err(HubError::SenderMismatch {
                        claimed: initiate.from,
                        announced: from,
                    });
                }
                Ok(self
                    .calls
                    .initiate(&self.sessions, &from, &initiate.to, initiate.offer, now)?)
            }

            ClientEvent::CallRinging(peer) => {
                let from = self.announced(connection_id)?;
                Ok(self.calls.ringing(&self.sessions, &from, &peer.to)?)
            }

            ClientEvent::CallAnswer(answer) => {
                let from = self.announced(connection_id)?;
                Ok(self
                    .calls
                    .answer(&self.sessions, &from, &answer.to, answer.answer, now)?)
            }

            ClientEvent::CallIceCandidate(ice) => {
                let from = self.announced(connection_id)?;
                Ok(self
                    .calls
                    .ice_candidate(&self.sessions, &from, &ice.to, ice.candidate)?)
            }

            ClientEvent::CallEnd(peer) => {
                let from = self.announced(connection_id)?;
                Ok(self.calls.end(&self.sessions, &from, &peer.to)?)
            }

            ClientEvent::CallReject(peer) => {
                let from = self.announced(connection_id)?;
                Ok(self.calls.reject(&self.sessions, &from, &peer.to)?)
            }

            // Keepalives are answered by the transport
            ClientEvent::Ping(_) => Ok(Vec::new()),
        }
    }

    fn announced(&self, connection_id: &ConnectionId) -> Result<UserId, HubError> {
        self.sessions
            .user_of(connection_id.as_str())
            .cloned()
            .ok_or(HubError::NotAnnounced)
    }

    fn announce(
        &mut self,
        connection_id: &ConnectionId,
        user_id: &str,
    ) -> Result<Vec<Delivery>, HubError> {
        if user_id.is_empty() {
            return Err(HubError::InvalidUser("User id cannot be empty"));
        }
        if user_id.len() > MAX_USER_ID_LENGTH {
            return Err(HubError::InvalidUser("User id too long"));
        }

        let registration = self.sessions.register(user_id, connection_id);
        let mut deliveries = Vec::new();

        if let Some(released) = registration.released_user {
            info!(connection = %connection_id, user = %released, "Connection released identity");
            deliveries.extend(self.calls.drop_user(&self.sessions, &released));
            deliveries.extend(self.presence.offline(&released));
        }
        if registration.superseded.is_some() {
            // Any call media lived in the superseded connection
            deliveries.extend(self.calls.drop_user(&self.sessions, user_id));
        }

        deliveries.extend(
            self.presence
                .snapshot_chunks(SNAPSHOT_CHUNK_SIZE)
                .into_iter()
                .map(|chunk| {
                    Delivery::new(connection_id.clone(), ServerEvent::PresenceSnapshot(chunk))
                }),
        );
        deliveries.extend(self.presence.online(user_id, now_millis()));

        info!(connection = %connection_id, user = %user_id, "User online");
        Ok(deliveries)
    }

    /// Fan a message persisted by the storage side out to a room.
    ///
    /// Every subscriber receives `message:receive`; no connection is the
    /// sender. Invalid rooms and empty messages are logged and dropped.
    pub fn publish(&mut self, room: &str, message: Value) -> Vec<Delivery> {
        match self.try_publish(room, message) {
            Ok(deliveries) => {
                debug!(chat = %room, deliveries = deliveries.len(), "Published message");
                deliveries
            }
            Err(e) => {
                warn!(chat = %room, error = %e, "Dropped published message");
                Vec::new()
            }
        }
    }

    fn try_publish(&self, room: &str, message: Value) -> Result<Vec<Delivery>, HubError> {
        validate_room_name(room)?;
        if message.is_null() {
            return Err(HubError::MissingMessage);
        }
        Ok(relay::message(&self.rooms, room, message))
    }

    /// Detach a closed connection.
    ///
    /// Leaves every room, ends the user's call and broadcasts the user
    /// offline, unless the session had already moved to a newer connection.
    pub fn disconnect(&mut self, connection_id: &ConnectionId) -> Vec<Delivery> {
        let rooms = self.rooms.leave_all(connection_id.as_str());
        self.presence.detach(connection_id.as_str());

        let mut deliveries = Vec::new();
        if let Some(user_id) = self.sessions.unregister(connection_id.as_str()) {
            deliveries.extend(self.calls.drop_user(&self.sessions, &user_id));
            deliveries.extend(self.presence.offline(&user_id));
            info!(connection = %connection_id, user = %user_id, "User offline");
        }

        debug!(connection = %connection_id, rooms = rooms.len(), "Connection detached");
        deliveries
    }

    /// Run periodic housekeeping: ring timeouts.
    pub fn tick(&mut self, now: Instant) -> Vec<Delivery> {
        self.calls.expire(&self.sessions, now)
    }

    /// The configured ring timeout, if any.
    #[must_use]
    pub fn ring_timeout(&self) -> Option<Duration> {
        self.calls.policy().ring_timeout
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
