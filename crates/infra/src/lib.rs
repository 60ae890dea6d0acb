//! Infrastructure layer: serialized stock ledger, transaction storage, the
//! transaction engine and the read side.
//!
//! Domain crates decide; this crate linearizes access, stores results and
//! publishes committed events.

pub mod condition_log;
pub mod engine;
pub mod error;
pub mod publisher;
pub mod query;
pub mod stock_ledger;
pub mod transaction_store;


pub use condition_log::{ConditionRecord, ConditionTracker};
pub use engine::{BorrowRequest, DistributionRequest, ReturnRequest, TransactionEngine};
pub use error::{LedgerError, LedgerResult, StoreError};
pub use publisher::{ENTITY_STREAM, EventPublisher, JsonEnvelope, TRANSACTION_STREAM};
pub use query::{
    CategorySummary, LineView, Page, QueryFacade, SortDirection, SortField, TransactionQuery,
    TransactionView,
};
pub use stock_ledger::{
    DetailsChange, NewEntity, ReservationToken, ReturnAdjustment, StockLedger, StockSnapshot,
};
pub use transaction_store::{InMemoryTransactionStore, TransactionStore};
