//! # chatline-core
//!
//! Realtime coordination for Chatline: who is online, which connections
//! listen to which chats, and where call signals go.
//!
//! - **SessionRegistry** - user to live connection, latest announcement wins
//! - **RoomMembership** - chat rooms as fan-out scopes
//! - **Presence** - global online/offline broadcasts and snapshots
//! - **relay** - messages, read receipts and typing indicators
//! - **CallSignaling** - per-pair call state machine
//! - **Hub** - composes the above and maps client events to deliveries
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  ClientEvent  ┌─────────────┐  Vec<Delivery>  ┌─────────────┐
//! │  Connection │──────────────▶│     Hub     │────────────────▶│  Outboxes   │
//! └─────────────┘               └─────────────┘                 └─────────────┘
//!                                      │
//!            ┌──────────────┬──────────┴───┬──────────────┐
//!            ▼              ▼              ▼              ▼
//!     ┌────────────┐ ┌────────────┐ ┌────────────┐ ┌────────────┐
//!     │  Sessions  │ │   Rooms    │ │  Presence  │ │   Calls    │
//!     └────────────┘ └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! The hub never performs I/O. It returns deliveries and the server writes
//! them to connection outboxes.

pub mod call;
pub mod client;
pub mod connection;
pub mod delivery;
pub mod hub;
pub mod presence;
pub mod relay;
pub mod room;
pub mod session;

pub use call::{CallError, CallPhase, CallPolicy, CallSession, CallSignaling};
pub use connection::ConnectionId;
pub use delivery::Delivery;
pub use hub::{Hub, HubConfig, HubError, HubStats};
pub use presence::Presence;
pub use room::{RoomError, RoomMembership};
pub use session::{Registration, SessionRegistry};
