//! Session event broadcasting.
//!
//! The session controller publishes state transitions, device list changes
//! and bond progress here. Observers (the presentation bridge, the CLI)
//! subscribe without holding a reference to the controller.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use bluelink_types::{BondState, DiscoveredDevice};

use crate::session::SessionState;

/// Events emitted by a session.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// The controller moved to a new state.
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// The discovered device set changed. Carries the full list.
    DeviceListChanged { devices: Vec<DiscoveredDevice> },
    /// Bond progress for a device.
    BondStateChanged { address: String, state: BondState },
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}
