//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Each variant is a distinct outcome a
/// caller can react to; they must never be folded into one another.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input; the caller can correct it and resubmit.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (bug signal).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Unknown entity or transaction.
    #[error("not found: {0}")]
    NotFound(String),

    /// More stock requested than is currently available.
    #[error("insufficient stock (requested {requested}, available {available})")]
    InsufficientStock { requested: u64, available: u64 },

    /// A quantity is out of range for the operation (e.g. over-return).
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// The transaction already left the `open` state.
    #[error("already returned: {0}")]
    AlreadyReturned(String),

    /// State-machine or optimistic-concurrency conflict.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient_stock(requested: u64, available: u64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn invalid_quantity(msg: impl Into<String>) -> Self {
        Self::InvalidQuantity(msg.into())
    }

    pub fn already_returned(msg: impl Into<String>) -> Self {
        Self::AlreadyReturned(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_and_lookup_failures_stay_distinct() {
        let a = DomainError::insufficient_stock(3, 2);
        let b = DomainError::not_found("entity");
        assert_ne!(a, b);
        assert_eq!(
            a.to_string(),
            "insufficient stock (requested 3, available 2)"
        );
    }
}
