//! Publication of committed domain events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use iequip_events::{Event, EventBus, EventEnvelope, InMemoryEventBus, Subscription};

/// Stream name for stock entity events.
pub const ENTITY_STREAM: &str = "inventory.entity";
/// Stream name for transaction events.
pub const TRANSACTION_STREAM: &str = "lending.transaction";

pub type JsonEnvelope = EventEnvelope<JsonValue>;

/// Wraps typed events in JSON envelopes and hands them to the bus.
///
/// Runs only after a mutation committed. A failed publish is logged and
/// swallowed: the ledger and the transaction store are the source of truth.
pub struct EventPublisher {
    bus: Arc<dyn EventBus<JsonEnvelope>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus<JsonEnvelope>>) -> Self {
        Self {
            bus,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publisher backed by a fresh in-process bus.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventBus::<JsonEnvelope>::new()))
    }

    /// Sequence number of the most recently published envelope (0 if none).
    pub fn last_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> Subscription<JsonEnvelope> {
        self.bus.subscribe()
    }

    pub fn publish<E>(&self, stream: &'static str, events: &[E])
    where
        E: Event + Serialize,
    {
        for event in events {
            let payload = match serde_json::to_value(event) {
                Ok(v) => v,
                Err(err) => {
                    warn!(
                        event_type = event.event_type(),
                        error = %err,
                        "failed to serialize event; skipping publication"
                    );
                    continue;
                }
            };

            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let envelope = EventEnvelope::new(
                Uuid::now_v7(),
                sequence,
                stream,
                event.aggregate_id(),
                event.event_type(),
                event.version(),
                event.occurred_at(),
                payload,
            );

            if let Err(err) = self.bus.publish(envelope) {
                warn!(
                    stream,
                    event_type = event.event_type(),
                    sequence,
                    error = %err,
                    "event publication failed after commit"
                );
            }
        }
    }
}
