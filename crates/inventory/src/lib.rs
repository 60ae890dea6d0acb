//! Inventory domain module: the stock ledger's business rules.
//!
//! Every inventory entity (a borrowable item or a distributable supply) is an
//! aggregate whose quantities obey `available + out == total`. Rules are pure
//! and deterministic (no IO, no locking, no storage); the infra layer
//! serializes access per entity.

pub mod category;
pub mod condition;
pub mod entity;

pub use category::Category;
pub use condition::{Condition, resolve_condition};
pub use entity::{
    DetailsUpdated, EntityRegistered, Reconcile, RegisterEntity, Release, Reserve,
    ReservationPurpose, Restock, ReturnReconciled, ReturnReverted, RevertReturn, StockCommand, StockEntity, StockEvent,
    StockKind, StockReleased, StockReplenished, StockReserved, UpdateDetails,
};
