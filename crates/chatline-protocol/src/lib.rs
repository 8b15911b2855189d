//! # chatline-protocol
//!
//! Wire events for the Chatline realtime channel.
//!
//! A client keeps one duplex connection open and multiplexes every realtime
//! concern over it: identity announcement, chat room membership, message and
//! read-receipt relay, typing indicators and WebRTC call signaling.
//!
//! ## Example
//!
//! ```rust
//! use chatline_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::chat_join("chat-42");
//!
//! let text = codec::encode_json(&event).unwrap();
//! assert_eq!(text, r#"{"event":"chat:join","data":"chat-42"}"#);
//!
//! let decoded: ClientEvent = codec::decode_json(&text).unwrap();
//! assert_eq!(decoded, event);
//! ```

pub mod codec;
pub mod events;

pub use codec::{ProtocolError, WireFormat};
pub use events::{
    CallAnswer, CallAnswered, CallEnded, CallFrom, CallIceCandidate, CallInitiate, CallPeer,
    ChatId, ClientEvent, Connected, EndReason, Heartbeat, IceCandidate, IncomingCall,
    MessageSeen, MessageSend, OnlineUser, ServerEvent, TypingStart, TypingStop, UserId,
};

/// Current protocol version, announced in the `connected` event.
pub const PROTOCOL_VERSION: u8 = 1;
