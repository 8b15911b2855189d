//! # chatline-server
//!
//! WebSocket server for the Chatline realtime channel.
//!
//! Each connection runs in its own task and only decodes, encodes and
//! forwards. A single dispatcher task owns the coordination state in
//! [`chatline_core::Hub`] and answers every inbound event with deliveries
//! that land in the connection outboxes.

pub mod config;
pub mod dispatcher;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{build_app, run_server, AppState};
