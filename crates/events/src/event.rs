use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A domain event: an immutable, versioned fact about one aggregate.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "inventory.entity.stock_reserved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Identifier of the aggregate the event belongs to.
    fn aggregate_id(&self) -> Uuid;
}
