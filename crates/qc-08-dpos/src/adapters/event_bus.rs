//! Event bus adapter
//!
//! Records published events and relayed gossip. Peers are connected by
//! draining the outbox of one node into `handle_gossip` of the others.

use crate::events::{DposEvent, GossipMessage};
use crate::ports::EventBus;
use async_trait::async_trait;

/// In-memory event bus adapter
pub struct InMemoryEventBus {
    events: parking_lot::RwLock<Vec<DposEvent>>,
    outbox: parking_lot::RwLock<Vec<GossipMessage>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            events: parking_lot::RwLock::new(Vec::new()),
            outbox: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn get_events(&self) -> Vec<DposEvent> {
        self.events.read().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    /// Take every gossip message relayed since the last call.
    pub fn drain_outbox(&self) -> Vec<GossipMessage> {
        std::mem::take(&mut *self.outbox.write())
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: DposEvent) -> Result<(), String> {
        self.events.write().push(event);
        Ok(())
    }

    async fn relay(&self, message: GossipMessage) -> Result<(), String> {
        self.outbox.write().push(message);
        Ok(())
    }
}
