//! Transaction engine: borrow, return, cancel, distribute, delete.
//!
//! Each operation follows the same pipeline:
//!
//! ```text
//! request
//!   -> decide on the Transaction aggregate (pure; validation happens here)
//!   -> stock effects through the StockLedger (serialized per entity)
//!   -> apply + persist the transaction record
//!   -> publish committed events
//! ```
//!
//! Operations on an existing transaction hold that transaction's lock for the
//! whole pipeline, so a return and a cancel of the same borrow cannot both
//! reach the ledger. If a later step fails, stock effects already made by the
//! call are undone before the error is returned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, Utc};
use tracing::{error, info, instrument, warn};

use iequip_core::{Aggregate, AggregateRoot, DomainError, EntityId, TransactionId};
use iequip_inventory::{Condition, ReservationPurpose};
use iequip_lending::{
    BORROW_QUANTITY, CancelBorrow, DeleteTransaction, LineItem, OpenBorrow, Recipient,
    RecordDistribution, ReturnBorrow, Transaction, TransactionCommand, TransactionEvent,
};

use crate::condition_log::{ConditionRecord, ConditionTracker};
use crate::error::{LedgerError, LedgerResult};
use crate::publisher::{EventPublisher, TRANSACTION_STREAM};
use crate::stock_ledger::{ReservationToken, StockLedger};
use crate::transaction_store::TransactionStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowRequest {
    pub recipient: Recipient,
    pub item_id: EntityId,
    pub end_date: NaiveDate,
    pub tested_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnRequest {
    pub transaction_id: TransactionId,
    pub condition: Condition,
    pub quantity: u64,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRequest {
    pub recipient: Recipient,
    pub lines: Vec<LineItem>,
    pub released_by: String,
    pub proof_image_ref: Option<String>,
}

pub struct TransactionEngine<S> {
    ledger: Arc<StockLedger>,
    store: S,
    tracker: Arc<ConditionTracker>,
    publisher: Arc<EventPublisher>,
    locks: Mutex<HashMap<TransactionId, Arc<Mutex<()>>>>,
}

impl<S> TransactionEngine<S> {
    pub fn new(
        ledger: Arc<StockLedger>,
        store: S,
        tracker: Arc<ConditionTracker>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            ledger,
            store,
            tracker,
            publisher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    pub fn tracker(&self) -> &Arc<ConditionTracker> {
        &self.tracker
    }
}

impl<S> TransactionEngine<S>
where
    S: TransactionStore,
{
    /// Lend one unit of an item. The transaction is only persisted after the
    /// reservation succeeded.
    #[instrument(skip(self, request), fields(item_id = %request.item_id))]
    pub fn create_borrow(&self, request: BorrowRequest) -> LedgerResult<Transaction> {
        let transaction_id = TransactionId::new();
        let mut transaction = Transaction::empty(transaction_id);
        let cmd = TransactionCommand::OpenBorrow(OpenBorrow {
            transaction_id,
            recipient: request.recipient,
            item_id: request.item_id,
            end_date: request.end_date,
            tested_by: request.tested_by,
            occurred_at: Utc::now(),
        });
        let events = transaction.handle(&cmd).map_err(|e| rejected(transaction_id, e))?;

        let token = self.ledger.reserve(
            request.item_id,
            BORROW_QUANTITY,
            ReservationPurpose::Borrow,
            transaction_id,
        )?;

        for event in &events {
            transaction.apply(event);
        }
        if let Err(err) = self.store.insert(transaction.clone()) {
            self.roll_back(transaction_id, &[token]);
            return Err(err.into());
        }

        self.publisher.publish(TRANSACTION_STREAM, &events);
        info!(transaction_id = %transaction_id, item_id = %request.item_id, "borrow opened");
        Ok(transaction)
    }

    /// Close an open borrow, restoring the returned quantity and recording
    /// the returned condition.
    #[instrument(skip(self, request), fields(transaction_id = %request.transaction_id))]
    pub fn return_borrow(&self, request: ReturnRequest) -> LedgerResult<Transaction> {
        let transaction_id = request.transaction_id;
        self.serialized(transaction_id, || {
            let mut transaction = self.load(transaction_id)?;
            let cmd = TransactionCommand::ReturnBorrow(ReturnBorrow {
                transaction_id,
                condition: request.condition,
                quantity: request.quantity,
                remarks: request.remarks,
                occurred_at: Utc::now(),
            });
            let events = transaction.handle(&cmd).map_err(|e| rejected(transaction_id, e))?;
            let borrow = transaction
                .borrow()
                .ok_or_else(|| LedgerError::invariant("return accepted on a non-borrow"))?;
            let item_id = borrow.item_id;

            let adjustment = self.ledger.adjust_on_return(
                item_id,
                borrow.quantity,
                request.quantity,
                request.condition,
                transaction_id,
            )?;

            let expected = transaction.version();
            for event in &events {
                transaction.apply(event);
            }
            if let Err(err) = self.store.update(transaction.clone(), expected) {
                warn!(
                    transaction_id = %transaction_id,
                    item_id = %item_id,
                    error = %err,
                    "return could not be stored; reverting the ledger"
                );
                if let Err(revert) = self.ledger.revert_return(&adjustment, transaction_id) {
                    error!(
                        transaction_id = %transaction_id,
                        item_id = %item_id,
                        error = %revert,
                        "compensating revert of the return failed"
                    );
                }
                return Err(err.into());
            }

            let record = ConditionRecord {
                transaction_id,
                entity_id: item_id,
                previous: adjustment.previous,
                returned: request.condition,
                stored: adjustment.stored,
                recorded_at: Utc::now(),
            };
            if let Err(err) = self.tracker.record(record) {
                error!(
                    transaction_id = %transaction_id,
                    item_id = %item_id,
                    error = %err,
                    "condition audit record lost"
                );
            }

            self.publisher.publish(TRANSACTION_STREAM, &events);
            info!(
                transaction_id = %transaction_id,
                item_id = %item_id,
                returned_quantity = request.quantity,
                condition = %adjustment.stored,
                "borrow returned"
            );
            Ok(transaction)
        })
    }

    /// `open -> cancelled`, releasing the reserved unit.
    #[instrument(skip(self, reason))]
    pub fn cancel_borrow(
        &self,
        transaction_id: TransactionId,
        reason: Option<String>,
    ) -> LedgerResult<Transaction> {
        self.serialized(transaction_id, || {
            let mut transaction = self.load(transaction_id)?;
            let cmd = TransactionCommand::CancelBorrow(CancelBorrow {
                transaction_id,
                reason,
                occurred_at: Utc::now(),
            });
            let events = transaction.handle(&cmd).map_err(|e| rejected(transaction_id, e))?;

            let (item_id, quantity) = events
                .iter()
                .find_map(|e| match e {
                    TransactionEvent::BorrowCancelled(c) => Some((c.item_id, c.quantity)),
                    _ => None,
                })
                .ok_or_else(|| LedgerError::invariant("cancel produced no cancellation event"))?;
            self.ledger.release(item_id, quantity, transaction_id)?;

            let expected = transaction.version();
            for event in &events {
                transaction.apply(event);
            }
            if let Err(err) = self.store.update(transaction.clone(), expected) {
                warn!(
                    transaction_id = %transaction_id,
                    item_id = %item_id,
                    error = %err,
                    "cancellation could not be stored; reserving the unit again"
                );
                if let Err(reserve) =
                    self.ledger
                        .reserve(item_id, quantity, ReservationPurpose::Borrow, transaction_id)
                {
                    error!(
                        transaction_id = %transaction_id,
                        item_id = %item_id,
                        error = %reserve,
                        "compensating reservation failed"
                    );
                }
                return Err(err.into());
            }

            self.publisher.publish(TRANSACTION_STREAM, &events);
            info!(transaction_id = %transaction_id, item_id = %item_id, "borrow cancelled");
            Ok(transaction)
        })
    }

    /// All-or-nothing issuance of supplies. If any line cannot be reserved,
    /// every earlier line of this call is released again.
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub fn create_distribution(&self, request: DistributionRequest) -> LedgerResult<Transaction> {
        let transaction_id = TransactionId::new();
        let mut transaction = Transaction::empty(transaction_id);
        let cmd = TransactionCommand::RecordDistribution(RecordDistribution {
            transaction_id,
            recipient: request.recipient,
            lines: request.lines.clone(),
            released_by: request.released_by,
            proof_image_ref: request.proof_image_ref,
            occurred_at: Utc::now(),
        });
        let events = transaction.handle(&cmd).map_err(|e| rejected(transaction_id, e))?;

        let mut tokens = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            match self.ledger.reserve(
                line.entity_id,
                line.quantity,
                ReservationPurpose::Distribution,
                transaction_id,
            ) {
                Ok(token) => tokens.push(token),
                Err(source) => {
                    warn!(
                        transaction_id = %transaction_id,
                        entity_id = %line.entity_id,
                        error = %source,
                        rolled_back = tokens.len(),
                        "distribution line failed; rolling back"
                    );
                    self.roll_back(transaction_id, &tokens);
                    return Err(match source {
                        LedgerError::Validation(_) => source,
                        other => LedgerError::PartialStockFailure {
                            entity_id: line.entity_id,
                            source: Box::new(other),
                        },
                    });
                }
            }
        }

        for event in &events {
            transaction.apply(event);
        }
        if let Err(err) = self.store.insert(transaction.clone()) {
            self.roll_back(transaction_id, &tokens);
            return Err(err.into());
        }

        self.publisher.publish(TRANSACTION_STREAM, &events);
        info!(transaction_id = %transaction_id, lines = tokens.len(), "distribution recorded");
        Ok(transaction)
    }

    /// Remove a record. Stock effects are not reversed; an open borrow cannot
    /// be deleted.
    #[instrument(skip(self))]
    pub fn delete_transaction(&self, transaction_id: TransactionId) -> LedgerResult<Transaction> {
        self.serialized(transaction_id, || {
            let mut transaction = self.load(transaction_id)?;
            let cmd = TransactionCommand::Delete(DeleteTransaction {
                transaction_id,
                occurred_at: Utc::now(),
            });
            let events = transaction.handle(&cmd).map_err(|e| rejected(transaction_id, e))?;
            for event in &events {
                transaction.apply(event);
            }
            self.store.remove(transaction_id)?;

            self.publisher.publish(TRANSACTION_STREAM, &events);
            info!(transaction_id = %transaction_id, "transaction deleted");
            Ok(transaction)
        })
    }

    pub fn get(&self, transaction_id: TransactionId) -> LedgerResult<Transaction> {
        self.load(transaction_id)
    }

    fn load(&self, transaction_id: TransactionId) -> LedgerResult<Transaction> {
        self.store
            .get(transaction_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id}")))
    }

    /// Run `op` while holding the transaction's lock. The lock entry is
    /// dropped again once no other caller is waiting on it.
    fn serialized<T>(
        &self,
        transaction_id: TransactionId,
        op: impl FnOnce() -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let lock = self.lock_for(transaction_id)?;
        let result = match lock.lock() {
            Ok(_guard) => op(),
            Err(_) => Err(LedgerError::invariant("transaction lock poisoned")),
        };
        self.release_lock(transaction_id, lock);
        result
    }

    fn lock_for(&self, transaction_id: TransactionId) -> LedgerResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| LedgerError::invariant("transaction lock table poisoned"))?;
        Ok(locks.entry(transaction_id).or_default().clone())
    }

    fn release_lock(&self, transaction_id: TransactionId, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        // Clones are only handed out under the table lock: two references
        // (table + ours) means nobody else holds or awaits this entry.
        let idle = locks
            .get(&transaction_id)
            .is_some_and(|held| Arc::ptr_eq(held, &lock) && Arc::strong_count(&lock) == 2);
        if idle {
            locks.remove(&transaction_id);
        }
    }

    /// Compensating release, newest reservation first.
    fn roll_back(&self, transaction_id: TransactionId, tokens: &[ReservationToken]) {
        for token in tokens.iter().rev() {
            if let Err(err) = self.ledger.release_token(token) {
                error!(
                    transaction_id = %transaction_id,
                    entity_id = %token.entity_id,
                    quantity = token.quantity,
                    error = %err,
                    "compensating release failed"
                );
            }
        }
    }
}

fn rejected(transaction_id: TransactionId, err: DomainError) -> LedgerError {
    let err = LedgerError::from(err);
    match &err {
        LedgerError::InvariantViolation(_) => {
            error!(transaction_id = %transaction_id, error = %err, "transaction invariant violated")
        }
        _ => warn!(transaction_id = %transaction_id, error = %err, "transaction command rejected"),
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::EventPublisher;
    use crate::stock_ledger::NewEntity;
    use crate::error::StoreError;
    use crate::transaction_store::InMemoryTransactionStore;
    use chrono::Duration;
    use iequip_inventory::{Category, StockKind};
    use iequip_lending::TransactionStatus;

    type Engine = TransactionEngine<Arc<InMemoryTransactionStore>>;

    fn engine() -> Engine {
        let publisher = Arc::new(EventPublisher::in_memory());
        let ledger = Arc::new(StockLedger::new(publisher.clone()));
        TransactionEngine::new(
            ledger,
            Arc::new(InMemoryTransactionStore::new()),
            Arc::new(ConditionTracker::new(true)),
            publisher,
        )
    }

    fn recipient() -> Recipient {
        Recipient {
            name: "Liza Santos".to_string(),
            email: "liza.santos@example.gov".to_string(),
            age: 28,
            contact_number: "09181234567".to_string(),
            address: "Zone 4".to_string(),
            department: None,
        }
    }

    fn projector<S>(engine: &TransactionEngine<S>) -> EntityId {
        engine
            .ledger()
            .register(NewEntity {
                name: "Projector".to_string(),
                category: Category::Electronics,
                unit: "unit".to_string(),
                kind: StockKind::Item {
                    condition: Condition::Good,
                },
                quantity_total: 1,
                photo_ref: None,
            })
            .unwrap()
            .id
    }

    fn borrow_request(item_id: EntityId) -> BorrowRequest {
        BorrowRequest {
            recipient: recipient(),
            item_id,
            end_date: (Utc::now() + Duration::days(5)).date_naive(),
            tested_by: "tech".to_string(),
        }
    }

    #[test]
    fn invalid_borrow_reserves_nothing() {
        let engine = engine();
        let item = projector(&engine);
        let mut request = borrow_request(item);
        request.recipient.email = "not-an-email".to_string();

        let err = engine.create_borrow(request).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(engine.ledger().get(item).unwrap().quantity_available, 1);
    }

    #[test]
    fn second_borrow_of_the_same_item_is_insufficient_stock() {
        let engine = engine();
        let item = projector(&engine);
        engine.create_borrow(borrow_request(item)).unwrap();

        let err = engine.create_borrow(borrow_request(item)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 1,
                available: 0,
                ..
            }
        ));
    }

    #[test]
    fn borrow_of_unknown_item_is_not_found() {
        let engine = engine();
        let err = engine.create_borrow(borrow_request(EntityId::new())).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[test]
    fn cancel_releases_the_unit() {
        let engine = engine();
        let item = projector(&engine);
        let tx = engine.create_borrow(borrow_request(item)).unwrap();

        let cancelled = engine
            .cancel_borrow(tx.id_typed(), Some("wrong unit".to_string()))
            .unwrap();
        assert_eq!(cancelled.status(), TransactionStatus::Cancelled);
        assert_eq!(engine.ledger().get(item).unwrap().quantity_available, 1);

        let err = engine.cancel_borrow(tx.id_typed(), None).unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[test]
    fn return_is_audited() {
        let engine = engine();
        let item = projector(&engine);
        let tx = engine.create_borrow(borrow_request(item)).unwrap();

        engine
            .return_borrow(ReturnRequest {
                transaction_id: tx.id_typed(),
                condition: Condition::SlightlyDamaged,
                quantity: 1,
                remarks: None,
            })
            .unwrap();

        let audit = engine.tracker().for_transaction(tx.id_typed()).unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].previous, Condition::Good);
        assert_eq!(audit[0].stored, Condition::SlightlyDamaged);
        assert_eq!(engine.get(tx.id_typed()).unwrap().status(), TransactionStatus::Returned);
    }

    #[test]
    fn unknown_transaction_is_not_found() {
        let engine = engine();
        let err = engine
            .return_borrow(ReturnRequest {
                transaction_id: TransactionId::new(),
                condition: Condition::Good,
                quantity: 1,
                remarks: None,
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(matches!(
            engine.delete_transaction(TransactionId::new()).unwrap_err(),
            LedgerError::NotFound(_)
        ));
    }

    #[test]
    fn distributing_an_item_is_a_validation_error() {
        let engine = engine();
        let item = projector(&engine);
        let err = engine
            .create_distribution(DistributionRequest {
                recipient: recipient(),
                lines: vec![LineItem {
                    entity_id: item,
                    quantity: 1,
                }],
                released_by: "storekeeper".to_string(),
                proof_image_ref: None,
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(engine.ledger().get(item).unwrap().quantity_available, 1);
    }

    /// Accepts inserts but refuses every update.
    struct RefusingUpdates(InMemoryTransactionStore);

    impl TransactionStore for RefusingUpdates {
        fn insert(&self, transaction: Transaction) -> Result<(), StoreError> {
            self.0.insert(transaction)
        }

        fn get(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
            self.0.get(id)
        }

        fn update(&self, _: Transaction, _: u64) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }

        fn remove(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
            self.0.remove(id)
        }

        fn list(&self) -> Result<Vec<Transaction>, StoreError> {
            self.0.list()
        }
    }

    fn refusing_engine() -> TransactionEngine<RefusingUpdates> {
        let publisher = Arc::new(EventPublisher::in_memory());
        TransactionEngine::new(
            Arc::new(StockLedger::new(publisher.clone())),
            RefusingUpdates(InMemoryTransactionStore::new()),
            Arc::new(ConditionTracker::new(true)),
            publisher,
        )
    }

    #[test]
    fn unstored_return_leaves_the_unit_out() {
        let engine = refusing_engine();
        let item = projector(&engine);
        let tx = engine.create_borrow(borrow_request(item)).unwrap();

        let err = engine
            .return_borrow(ReturnRequest {
                transaction_id: tx.id_typed(),
                condition: Condition::Damaged,
                quantity: 1,
                remarks: None,
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Poisoned)));

        assert_eq!(engine.get(tx.id_typed()).unwrap().status(), TransactionStatus::Open);
        let snapshot = engine.ledger().get(item).unwrap();
        assert_eq!(snapshot.quantity_available, 0);
        assert_eq!(snapshot.quantity_out, 1);
        assert_eq!(
            snapshot.kind,
            StockKind::Item {
                condition: Condition::Good
            }
        );
        assert!(engine.tracker().for_transaction(tx.id_typed()).unwrap().is_empty());
        assert!(matches!(
            engine.create_borrow(borrow_request(item)).unwrap_err(),
            LedgerError::InsufficientStock { .. }
        ));
    }

    #[test]
    fn unstored_cancel_keeps_the_unit_reserved() {
        let engine = refusing_engine();
        let item = projector(&engine);
        let tx = engine.create_borrow(borrow_request(item)).unwrap();

        let err = engine.cancel_borrow(tx.id_typed(), None).unwrap_err();
        assert!(matches!(err, LedgerError::Store(StoreError::Poisoned)));

        assert_eq!(engine.get(tx.id_typed()).unwrap().status(), TransactionStatus::Open);
        let snapshot = engine.ledger().get(item).unwrap();
        assert_eq!(snapshot.quantity_available, 0);
        assert_eq!(snapshot.quantity_out, 1);
        assert!(matches!(
            engine.create_borrow(borrow_request(item)).unwrap_err(),
            LedgerError::InsufficientStock { .. }
        ));
    }

    #[test]
    fn lock_table_is_empty_between_calls() {
        let engine = engine();
        for _ in 0..1000 {
            let _ = engine.return_borrow(ReturnRequest {
                transaction_id: TransactionId::new(),
                condition: Condition::Good,
                quantity: 1,
                remarks: None,
            });
            let _ = engine.cancel_borrow(TransactionId::new(), None);
        }
        assert!(engine.locks.lock().unwrap().is_empty());

        let item = projector(&engine);
        let returned = engine.create_borrow(borrow_request(item)).unwrap();
        engine
            .return_borrow(ReturnRequest {
                transaction_id: returned.id_typed(),
                condition: Condition::Good,
                quantity: 1,
                remarks: None,
            })
            .unwrap();
        let cancelled = engine.create_borrow(borrow_request(item)).unwrap();
        engine.cancel_borrow(cancelled.id_typed(), None).unwrap();
        engine.delete_transaction(returned.id_typed()).unwrap();

        assert!(engine.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_quantity_return_leaves_the_item_lost() {
        let engine = engine();
        let item = projector(&engine);
        let tx = engine.create_borrow(borrow_request(item)).unwrap();

        let closed = engine
            .return_borrow(ReturnRequest {
                transaction_id: tx.id_typed(),
                condition: Condition::Damaged,
                quantity: 0,
                remarks: Some("not brought back".to_string()),
            })
            .unwrap();
        assert_eq!(closed.status(), TransactionStatus::Returned);

        let snapshot = engine.ledger().get(item).unwrap();
        assert_eq!(snapshot.quantity_available, 0);
        assert_eq!(snapshot.quantity_out, 1);
        assert!(matches!(
            engine.create_borrow(borrow_request(item)).unwrap_err(),
            LedgerError::InsufficientStock { .. }
        ));
        engine.delete_transaction(tx.id_typed()).unwrap();
    }

    #[test]
    fn return_commits_even_when_the_audit_log_is_unavailable() {
        let engine = engine();
        let item = projector(&engine);
        let tx = engine.create_borrow(borrow_request(item)).unwrap();
        engine.tracker().poison();

        let closed = engine
            .return_borrow(ReturnRequest {
                transaction_id: tx.id_typed(),
                condition: Condition::SlightlyDamaged,
                quantity: 1,
                remarks: None,
            })
            .unwrap();
        assert_eq!(closed.status(), TransactionStatus::Returned);
        assert_eq!(engine.get(tx.id_typed()).unwrap().status(), TransactionStatus::Returned);
        assert_eq!(engine.ledger().get(item).unwrap().quantity_available, 1);
    }
}
