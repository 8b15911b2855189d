//! Outbound deliveries produced by the realtime core.
//!
//! The core never writes to a socket itself. Every handler returns the list of
//! deliveries it wants made and the transport layer sends them, fire and
//! forget.

use crate::connection::ConnectionId;
use chatline_protocol::ServerEvent;
use std::sync::Arc;

/// An event addressed to one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Target connection.
    pub target: ConnectionId,
    /// The event, shared between every target of a fan-out.
    pub event: Arc<ServerEvent>,
}

impl Delivery {
    /// Create a delivery for a single target.
    #[must_use]
    pub fn new(target: ConnectionId, event: ServerEvent) -> Self {
        Self::shared(target, Arc::new(event))
    }

    /// Create a delivery reusing an already shared event.
    #[must_use]
    pub fn shared(target: ConnectionId, event: Arc<ServerEvent>) -> Self {
        Self { target, event }
    }

    /// Wire name of the delivered event.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        self.event.name()
    }
}

/// Fan one event out to many targets, sharing a single allocation.
pub fn broadcast<'a, I>(targets: I, event: ServerEvent) -> Vec<Delivery>
where
    I: IntoIterator<Item = &'a ConnectionId>,
{
    let event = Arc::new(event);
    targets
        .into_iter()
        .map(|target| Delivery::shared(target.clone(), Arc::clone(&event)))
        .collect()
}
