//! Lending domain module: borrow and distribution transactions.
//!
//! Business rules for the transaction state machine, implemented as pure
//! deterministic domain logic. Stock effects live in `iequip-inventory`; a
//! transaction refers to entities by id only.

pub mod recipient;
pub mod transaction;

pub use recipient::{Department, Recipient};
pub use transaction::{
    BORROW_QUANTITY, BorrowCancelled, BorrowDetails, BorrowOpened, BorrowReturned, CancelBorrow, DeleteTransaction,
    DistributionDetails, DistributionRecorded, LineItem, OpenBorrow, RecordDistribution,
    ReturnBorrow, ReturnRecord, Transaction, TransactionCommand, TransactionDeleted,
    TransactionEvent, TransactionKind, TransactionStatus,
};
