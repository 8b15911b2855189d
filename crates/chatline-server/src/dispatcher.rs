//! The coordinator task.
//!
//! One task owns the [`Hub`]. Connection handlers send it commands over a
//! channel, so every registry mutation happens in a single total order and
//! no locks are held across hub state. Deliveries are pushed into the
//! per-connection outboxes, which the connection tasks drain to their
//! sockets.

use crate::metrics;
use chatline_core::{ConnectionId, Delivery, Hub};
use chatline_protocol::{ChatId, ClientEvent, ServerEvent};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace};

/// Outbound queue of one connection.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// Live connections and their outboxes.
pub type Outboxes = Arc<DashMap<ConnectionId, Outbox>>;

/// Work for the coordinator.
#[derive(Debug)]
pub enum Command {
    /// A connection opened. Its outbox is already registered.
    Connect(ConnectionId),
    /// A connection sent an event.
    Event(ConnectionId, ClientEvent),
    /// A connection closed.
    Disconnect(ConnectionId),
    /// The storage side persisted a message for a room.
    Publish { room: ChatId, message: Value },
}

/// Handle for submitting commands.
pub type CommandSender = mpsc::UnboundedSender<Command>;

/// The coordinator.
pub struct Dispatcher {
    hub: Hub,
    outboxes: Outboxes,
    commands: mpsc::UnboundedReceiver<Command>,
    sweep_interval: Duration,
}

impl Dispatcher {
    /// Spawn the coordinator on the current runtime.
    pub fn spawn(
        hub: Hub,
        outboxes: Outboxes,
        sweep_interval: Duration,
    ) -> (CommandSender, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            hub,
            outboxes,
            commands: rx,
            sweep_interval,
        };
        (tx, tokio::spawn(dispatcher.run()))
    }

    async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Dispatcher started");
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    let start = Instant::now();
                    let deliveries = self.apply(command);
                    self.deliver(deliveries);
                    metrics::record_latency(start.elapsed().as_secs_f64());
                }

                _ = sweep.tick() => {
                    let deliveries = self.hub.tick(Instant::now().into_std());
                    if !deliveries.is_empty() {
                        self.deliver(deliveries);
                    }
                }
            }
        }
        info!("Dispatcher stopped");
    }

    fn apply(&mut self, command: Command) -> Vec<Delivery> {
        match command {
            Command::Connect(connection_id) => {
                self.hub.connect(&connection_id);
                Vec::new()
            }
            Command::Event(connection_id, event) => {
                self.hub.handle(&connection_id, event, Instant::now().into_std())
            }
            Command::Disconnect(connection_id) => {
                let deliveries = self.hub.disconnect(&connection_id);
                debug!(connection = %connection_id, "Disconnect processed");
                deliveries
            }
            Command::Publish { room, message } => self.hub.publish(&room, message),
        }
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        metrics::record_deliveries(deliveries.len());
        for delivery in deliveries {
            match self.outboxes.get(&delivery.target) {
                Some(outbox) => {
                    if outbox.send(delivery.event).is_err() {
                        trace!(connection = %delivery.target, "Outbox closed");
                    }
                }
                None => {
                    trace!(connection = %delivery.target, "No outbox, delivery dropped");
                }
            }
        }
        metrics::set_hub_stats(&self.hub.stats());
    }
}
