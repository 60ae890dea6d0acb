//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity and are compared by their attribute values.
/// Once attached to a transaction they are never modified; "changing" one means
/// building a new value.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct LineItem {
///     entity_id: EntityId,
///     quantity: u64,
/// }
///
/// impl ValueObject for LineItem {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
