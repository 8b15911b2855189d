//! Room-scoped relays: chat messages, read receipts and typing indicators.
//!
//! All of these are stateless. The relay forwards what it is given to the
//! room's current subscribers and forgets it; a subscriber that was not
//! listening catches up from message history instead.

use crate::connection::ConnectionId;
use crate::delivery::{broadcast, Delivery};
use crate::room::RoomMembership;
use chatline_protocol::{MessageSeen, ServerEvent, TypingStart, TypingStop};
use serde_json::Value;
use tracing::trace;

/// Fan an event out to a room, optionally skipping one connection.
pub fn fan_out(
    rooms: &RoomMembership,
    room: &str,
    event: ServerEvent,
    except: Option<&ConnectionId>,
) -> Vec<Delivery> {
    let deliveries = broadcast(
        rooms.subscribers(room).filter(|c| Some(*c) != except),
        event,
    );
    trace!(room = %room, recipients = deliveries.len(), "Fan-out");
    deliveries
}

/// Relay a persisted message to everyone in the room, sender included.
pub fn message(rooms: &RoomMembership, room: &str, message: Value) -> Vec<Delivery> {
    fan_out(rooms, room, ServerEvent::MessageReceive(message), None)
}

/// Relay a read receipt to everyone in the room, sender included.
pub fn seen(rooms: &RoomMembership, receipt: MessageSeen) -> Vec<Delivery> {
    let room = receipt.chat_id.clone();
    fan_out(rooms, &room, ServerEvent::MessageSeen(receipt), None)
}

/// Relay a typing start to the room, excluding the typist's connection.
pub fn typing_start(
    rooms: &RoomMembership,
    sender: &ConnectionId,
    typing: TypingStart,
) -> Vec<Delivery> {
    let room = typing.chat_id.clone();
    fan_out(rooms, &room, ServerEvent::TypingStart(typing), Some(sender))
}

/// Relay a typing stop to the room, excluding the typist's connection.
pub fn typing_stop(
    rooms: &RoomMembership,
    sender: &ConnectionId,
    typing: TypingStop,
) -> Vec<Delivery> {
    let room = typing.chat_id.clone();
    fan_out(rooms, &room, ServerEvent::TypingStop(typing), Some(sender))
}
