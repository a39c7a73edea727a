//! Event broadcasting to front ends.
//!
//! The engine publishes state changes and appended turns on a broadcast
//! channel; any number of front ends (CLI, desktop shell, test harness)
//! can subscribe. Subscribers never mutate engine state through the bus.

use crate::engine::EngineState;
use crate::history::Turn;
use serde::Serialize;
use tokio::sync::broadcast;

/// Default channel capacity. Slow subscribers past this lag and miss events.
const DEFAULT_CAPACITY: usize = 1024;

/// Events observable by front ends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngineEvent {
    /// The engine moved between states.
    StateChanged {
        from: EngineState,
        to: EngineState,
    },

    /// A turn was appended to the conversation history.
    TurnAppended { turn: Turn },
}

/// Broadcast bus for [`EngineEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Returns the number of subscribers
    /// that received it; with no subscribers the event is dropped.
    pub fn emit(&self, event: EngineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
