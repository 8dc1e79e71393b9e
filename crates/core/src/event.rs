//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in the system.
//! Other components can subscribe to react without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::host::ScopeId;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The assistant produced a final reply
    ResponseGenerated {
        scope: ScopeId,
        conversation: String,
        model: String,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// A capability was invoked by the model
    CapabilityInvoked {
        scope: ScopeId,
        name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A memory was created, edited or deleted
    MemoryChanged {
        scope: ScopeId,
        name: String,
        operation: String, // "create", "edit", "delete"
        timestamp: DateTime<Utc>,
    },

    /// The DB was written to durable storage
    SaveCompleted {
        bytes: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::CapabilityInvoked {
            scope: 1,
            name: "search_memories".into(),
            success: true,
            duration_ms: 42,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::CapabilityInvoked { name, success, .. } => {
                assert_eq!(name, "search_memories");
                assert!(success);
            }
            _ => panic!("Expected CapabilityInvoked event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::SaveCompleted {
            bytes: 10,
            duration_ms: 1,
            timestamp: Utc::now(),
        });
    }
}
