//! Error taxonomy at the orchestration boundary.
//!
//! Aggregates fail with [`DomainError`]; the ledger, engine and query facade
//! translate those into [`LedgerError`] without losing the discriminant, and
//! attach the entity a stock failure happened on.

use thiserror::Error;

use iequip_core::{DomainError, EntityId, TransactionId};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Transaction store failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transaction store lock poisoned")]
    Poisoned,

    #[error("transaction {0} is already stored")]
    Duplicate(TransactionId),

    #[error("transaction {0} is not stored")]
    Missing(TransactionId),

    /// Write against a record that changed since it was read.
    #[error("stale write for transaction {id}: expected version {expected}, found {found}")]
    VersionMismatch {
        id: TransactionId,
        expected: u64,
        found: u64,
    },
}

/// Outcome of a rejected ledger operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock (requested {requested}, available {available})")]
    InsufficientStock {
        entity_id: Option<EntityId>,
        requested: u64,
        available: u64,
    },

    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("already returned: {0}")]
    AlreadyReturned(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Internal bug signal; never shown to end users in detail.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// A multi-line operation failed on `entity_id` and was rolled back.
    #[error("stock operation failed on entity {entity_id}; nothing was reserved")]
    PartialStockFailure {
        entity_id: EntityId,
        #[source]
        source: Box<LedgerError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Translate a failure raised by one stock entity, remembering which one.
    pub fn from_stock(entity_id: EntityId, err: DomainError) -> Self {
        match err {
            DomainError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                entity_id: Some(entity_id),
                requested,
                available,
            },
            other => other.into(),
        }
    }

    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "validation_error",
            LedgerError::NotFound(_) => "not_found",
            LedgerError::InsufficientStock { .. } => "insufficient_stock",
            LedgerError::InvalidQuantity(_) => "invalid_quantity",
            LedgerError::AlreadyReturned(_) => "already_returned",
            LedgerError::Conflict(_) => "conflict",
            LedgerError::InvariantViolation(_) => "invariant_violation",
            LedgerError::PartialStockFailure { .. } => "partial_stock_failure",
            LedgerError::Store(_) => "store_error",
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => LedgerError::Validation(msg),
            DomainError::InvalidId(msg) => LedgerError::Validation(msg),
            DomainError::InvariantViolation(msg) => LedgerError::InvariantViolation(msg),
            DomainError::NotFound(msg) => LedgerError::NotFound(msg),
            DomainError::InsufficientStock {
                requested,
                available,
            } => LedgerError::InsufficientStock {
                entity_id: None,
                requested,
                available,
            },
            DomainError::InvalidQuantity(msg) => LedgerError::InvalidQuantity(msg),
            DomainError::AlreadyReturned(msg) => LedgerError::AlreadyReturned(msg),
            DomainError::Conflict(msg) => LedgerError::Conflict(msg),
        }
    }
}
