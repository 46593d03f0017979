//! Tangle event fan-out.
//!
//! Events are notifications only: fire-and-forget, best-effort, at most
//! once per bundle publication. Subscribers come and go; an emit with no
//! listeners is fine.

use tokio::sync::broadcast;

use filament_types::{Address, MilestoneIndex, TxHash};

/// Events published by the construction engine after a bundle lands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TangleEvent {
    /// A milestone candidate failed verification. The bundle itself was
    /// still published.
    InvalidMilestone { tail: TxHash, reason: String },
    /// An address appeared as a debit source in a validated bundle.
    AddressSpent(Address),
    /// A milestone was verified and stored.
    ValidMilestone {
        tail: TxHash,
        index: MilestoneIndex,
    },
}

/// Broadcast-based event bus.
pub struct EventBus {
    sender: broadcast::Sender<TangleEvent>,
}

impl EventBus {
    /// Create a bus whose per-subscriber channel buffers `capacity` events.
    /// Slow subscribers lag and lose the oldest events, never block emitters.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a subscriber. Only events emitted after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<TangleEvent> {
        self.sender.subscribe()
    }

    /// Fire-and-forget broadcast. "No subscribers" is not an error.
    pub fn emit(&self, event: TangleEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers. Diagnostic.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
