use tokio::sync::broadcast;
use tracing::trace;

use crate::sequence::ActivitySequence;

/// Lifecycle notifications published by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceEvent {
    SequenceLoaded(ActivitySequence),
    /// A node for the item at `index` was fetched and handed to `slot`.
    ItemLoaded { index: usize, slot: usize },
    /// The surface in `slot` reported that it rendered `node_id`.
    NodeRendered { slot: usize, node_id: String },
    /// The Hub acknowledged the result for `node_id`.
    ResultPosted { slot: usize, node_id: String },
    SequenceFinished,
}

/// Typed broadcast emitter. Publishing never blocks and never fails; events
/// published while nobody listens are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SequenceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SequenceEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SequenceEvent) {
        if self.tx.send(event).is_err() {
            trace!("sequence event published without subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
