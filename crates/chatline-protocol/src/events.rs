//! Event types for the Chatline protocol.
//!
//! Every frame on the wire is an `{"event": <name>, "data": <payload>}` object.
//! Event names are namespaced (`user:`, `chat:`, `message:`, `typing:`,
//! `call:`) so that one duplex channel can carry presence, chat delivery,
//! typing state and call signaling side by side.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A logical user identifier, issued by the authentication layer.
pub type UserId = String;

/// A chat identifier, which doubles as the room name for fan-out.
pub type ChatId = String;

/// Events sent by a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Announce the user identity owning this connection.
    #[serde(rename = "user:join")]
    UserJoin(UserId),

    /// Subscribe to a chat's event stream.
    #[serde(rename = "chat:join")]
    ChatJoin(ChatId),

    /// Unsubscribe from a chat's event stream.
    #[serde(rename = "chat:leave")]
    ChatLeave(ChatId),

    /// Relay a message that the storage layer already persisted.
    #[serde(rename = "message:send")]
    MessageSend(MessageSend),

    #[serde(rename = "typing:start")]
    TypingStart(TypingStart),

    #[serde(rename = "typing:stop")]
    TypingStop(TypingStop),

    /// Relay a read receipt.
    #[serde(rename = "message:seen")]
    MessageSeen(MessageSeen),

    /// Offer a call to another user.
    #[serde(rename = "call:initiate")]
    CallInitiate(CallInitiate),

    /// Callee acknowledges that the incoming call is being presented.
    #[serde(rename = "call:ringing")]
    CallRinging(CallPeer),

    #[serde(rename = "call:answer")]
    CallAnswer(CallAnswer),

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate(CallIceCandidate),

    #[serde(rename = "call:end")]
    CallEnd(CallPeer),

    #[serde(rename = "call:reject")]
    CallReject(CallPeer),

    /// Application-level keepalive. The payload may be omitted.
    #[serde(rename = "ping")]
    Ping(Option<Heartbeat>),
}

/// Events sent by the server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Connection established.
    #[serde(rename = "connected")]
    Connected(Connected),

    #[serde(rename = "user:online")]
    UserOnline(UserId),

    #[serde(rename = "user:offline")]
    UserOffline(UserId),

    /// Everyone online at the time the receiver announced itself.
    #[serde(rename = "presence:snapshot")]
    PresenceSnapshot(Vec<OnlineUser>),

    /// A chat message, forwarded verbatim.
    #[serde(rename = "message:receive")]
    MessageReceive(Value),

    #[serde(rename = "typing:start")]
    TypingStart(TypingStart),

    #[serde(rename = "typing:stop")]
    TypingStop(TypingStop),

    #[serde(rename = "message:seen")]
    MessageSeen(MessageSeen),

    #[serde(rename = "call:incoming")]
    CallIncoming(IncomingCall),

    #[serde(rename = "call:ringing")]
    CallRinging(CallFrom),

    #[serde(rename = "call:answered")]
    CallAnswered(CallAnswered),

    #[serde(rename = "call:ice-candidate")]
    CallIceCandidate(IceCandidate),

    #[serde(rename = "call:ended")]
    CallEnded(CallEnded),

    #[serde(rename = "call:rejected")]
    CallRejected(CallFrom),

    /// The call attempt was refused because a party is already in a call.
    #[serde(rename = "call:busy")]
    CallBusy(CallPeer),

    /// The callee has no live session.
    #[serde(rename = "call:unavailable")]
    CallUnavailable(CallPeer),

    #[serde(rename = "pong")]
    Pong(Heartbeat),
}

/// `message:send` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSend {
    pub chat_id: ChatId,
    /// The persisted message object. Opaque to the relay.
    pub message: Value,
}

/// `typing:start` payload, identical in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStart {
    pub chat_id: ChatId,
    pub user_id: UserId,
    /// Display name shown by the indicator.
    #[serde(alias = "displayName")]
    pub user_name: String,
}

/// `typing:stop` payload, identical in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStop {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

/// `message:seen` payload, identical in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSeen {
    pub message_id: String,
    pub chat_id: ChatId,
}

/// `call:initiate` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInitiate {
    pub to: UserId,
    /// SDP offer, opaque to the server.
    pub offer: Value,
    pub from: UserId,
}

/// `call:answer` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallAnswer {
    pub to: UserId,
    /// SDP answer, opaque to the server.
    pub answer: Value,
}

/// `call:ice-candidate` payload (client to server).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallIceCandidate {
    pub to: UserId,
    pub candidate: Value,
}

/// Payload naming the other party of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallPeer {
    pub to: UserId,
}

/// Payload naming the party a call event came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrom {
    pub from: UserId,
}

/// `call:incoming` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingCall {
    pub from: UserId,
    pub offer: Value,
}

/// `call:answered` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallAnswered {
    pub from: UserId,
    pub answer: Value,
}

/// `call:ice-candidate` payload (server to client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub from: UserId,
    pub candidate: Value,
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    /// The peer hung up.
    Hangup,
    /// The peer's connection went away.
    Disconnected,
    /// Nobody answered before the ring timeout.
    Timeout,
}

/// `call:ended` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnded {
    pub from: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EndReason>,
}

/// One entry of a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: UserId,
    /// Milliseconds since the Unix epoch.
    pub online_since: u64,
}

/// `connected` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub connection_id: String,
    pub version: u8,
    /// Recommended heartbeat interval in milliseconds.
    pub heartbeat: u32,
}

/// `ping` / `pong` payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl ClientEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::UserJoin(_) => "user:join",
            ClientEvent::ChatJoin(_) => "chat:join",
            ClientEvent::ChatLeave(_) => "chat:leave",
            ClientEvent::MessageSend(_) => "message:send",
            ClientEvent::TypingStart(_) => "typing:start",
            ClientEvent::TypingStop(_) => "typing:stop",
            ClientEvent::MessageSeen(_) => "message:seen",
            ClientEvent::CallInitiate(_) => "call:initiate",
            ClientEvent::CallRinging(_) => "call:ringing",
            ClientEvent::CallAnswer(_) => "call:answer",
            ClientEvent::CallIceCandidate(_) => "call:ice-candidate",
            ClientEvent::CallEnd(_) => "call:end",
            ClientEvent::CallReject(_) => "call:reject",
            ClientEvent::Ping(_) => "ping",
        }
    }

    /// Create a `user:join` event.
    #[must_use]
    pub fn user_join(user_id: impl Into<UserId>) -> Self {
        ClientEvent::UserJoin(user_id.into())
    }

    /// Create a `chat:join` event.
    #[must_use]
    pub fn chat_join(chat_id: impl Into<ChatId>) -> Self {
        ClientEvent::ChatJoin(chat_id.into())
    }

    /// Create a `chat:leave` event.
    #[must_use]
    pub fn chat_leave(chat_id: impl Into<ChatId>) -> Self {
        ClientEvent::ChatLeave(chat_id.into())
    }

    /// Create a `message:send` event.
    #[must_use]
    pub fn message_send(chat_id: impl Into<ChatId>, message: Value) -> Self {
        ClientEvent::MessageSend(MessageSend {
            chat_id: chat_id.into(),
            message,
        })
    }

    /// Create a `typing:start` event.
    #[must_use]
    pub fn typing_start(
        chat_id: impl Into<ChatId>,
        user_id: impl Into<UserId>,
        user_name: impl Into<String>,
    ) -> Self {
        ClientEvent::TypingStart(TypingStart {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
        })
    }

    /// Create a `typing:stop` event.
    #[must_use]
    pub fn typing_stop(chat_id: impl Into<ChatId>, user_id: impl Into<UserId>) -> Self {
        ClientEvent::TypingStop(TypingStop {
            chat_id: chat_id.into(),
            user_id: user_id.into(),
        })
    }

    /// Create a `message:seen` event.
    #[must_use]
    pub fn message_seen(chat_id: impl Into<ChatId>, message_id: impl Into<String>) -> Self {
        ClientEvent::MessageSeen(MessageSeen {
            message_id: message_id.into(),
            chat_id: chat_id.into(),
        })
    }

    /// Create a `call:initiate` event.
    #[must_use]
    pub fn call_initiate(from: impl Into<UserId>, to: impl Into<UserId>, offer: Value) -> Self {
        ClientEvent::CallInitiate(CallInitiate {
            to: to.into(),
            offer,
            from: from.into(),
        })
    }

    /// Create a `call:ringing` event.
    #[must_use]
    pub fn call_ringing(to: impl Into<UserId>) -> Self {
        ClientEvent::CallRinging(CallPeer { to: to.into() })
    }

    /// Create a `call:answer` event.
    #[must_use]
    pub fn call_answer(to: impl Into<UserId>, answer: Value) -> Self {
        ClientEvent::CallAnswer(CallAnswer {
            to: to.into(),
            answer,
        })
    }

    /// Create a `call:ice-candidate` event.
    #[must_use]
    pub fn call_ice_candidate(to: impl Into<UserId>, candidate: Value) -> Self {
        ClientEvent::CallIceCandidate(CallIceCandidate {
            to: to.into(),
            candidate,
        })
    }

    /// Create a `call:end` event.
    #[must_use]
    pub fn call_end(to: impl Into<UserId>) -> Self {
        ClientEvent::CallEnd(CallPeer { to: to.into() })
    }

    /// Create a `call:reject` event.
    #[must_use]
    pub fn call_reject(to: impl Into<UserId>) -> Self {
        ClientEvent::CallReject(CallPeer { to: to.into() })
    }
}

impl ServerEvent {
    /// The wire name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::UserOnline(_) => "user:online",
            ServerEvent::UserOffline(_) => "user:offline",
            ServerEvent::PresenceSnapshot(_) => "presence:snapshot",
            ServerEvent::MessageReceive(_) => "message:receive",
            ServerEvent::TypingStart(_) => "typing:start",
            ServerEvent::TypingStop(_) => "typing:stop",
            ServerEvent::MessageSeen(_) => "message:seen",
            ServerEvent::CallIncoming(_) => "call:incoming",
            ServerEvent::CallRinging(_) => "call:ringing",
            ServerEvent::CallAnswered(_) => "call:answered",
            ServerEvent::CallIceCandidate(_) => "call:ice-candidate",
            ServerEvent::CallEnded(_) => "call:ended",
            ServerEvent::CallRejected(_) => "call:rejected",
            ServerEvent::CallBusy(_) => "call:busy",
            ServerEvent::CallUnavailable(_) => "call:unavailable",
            ServerEvent::Pong(_) => "pong",
        }
    }

    /// Create a `connected` event.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        ServerEvent::Connected(Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        })
    }

    /// Create a `call:ended` event.
    #[must_use]
    pub fn call_ended(from: impl Into<UserId>, reason: EndReason) -> Self {
        ServerEvent::CallEnded(CallEnded {
            from: from.into(),
            reason: Some(reason),
        })
    }

    /// Create a `pong` echoing the ping timestamp.
    #[must_use]
    pub fn pong(ping: Heartbeat) -> Self {
        ServerEvent::Pong(ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bare_ping() {
        let event: ClientEvent = serde_json::from_value(json!({"event": "ping"})).unwrap();
        assert_eq!(event, ClientEvent::Ping(None));

        let event: ClientEvent =
            serde_json::from_value(json!({"event": "ping", "data": {"timestamp": 9}})).unwrap();
        assert_eq!(event, ClientEvent::Ping(Some(Heartbeat { timestamp: Some(9) })));
    }

    #[test]
    fn test_client_event_wire_shape() {
        let raw = json!({
            "event": "typing:start",
            "data": { "chatId": "c1", "userId": "u1", "userName": "Ana" }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event, ClientEvent::typing_start("c1", "u1", "Ana"));
        assert_eq!(event.name(), "typing:start");
    }

    #[test]
    fn test_display_name_alias() {
        let raw = json!({
            "event": "typing:start",
            "data": { "chatId": "c1", "userId": "u1", "displayName": "Ana" }
        });
        let event: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event, ClientEvent::typing_start("c1", "u1", "Ana"));
    }

    #[test]
    fn test_string_payload_events() {
        let event: ClientEvent =
            serde_json::from_value(json!({ "event": "user:join", "data": "u42" })).unwrap();
        assert_eq!(event, ClientEvent::user_join("u42"));

        let online = serde_json::to_value(ServerEvent::UserOnline("u42".into())).unwrap();
        assert_eq!(online, json!({ "event": "user:online", "data": "u42" }));
    }

    #[test]
    fn test_call_ended_reason_is_optional() {
        let ended: ServerEvent = serde_json::from_value(json!({
            "event": "call:ended",
            "data": { "from": "u1" }
        }))
        .unwrap();
        assert_eq!(
            ended,
            ServerEvent::CallEnded(CallEnded {
                from: "u1".into(),
                reason: None
            })
        );

        let timeout =
            serde_json::to_value(ServerEvent::call_ended("u1", EndReason::Timeout)).unwrap();
        assert_eq!(timeout["data"]["reason"], "timeout");
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_value(json!({ "event": "status:post", "data": {} }));
        assert!(result.is_err());
    }
}
