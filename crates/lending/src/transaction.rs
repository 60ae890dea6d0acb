use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use iequip_core::{Aggregate, AggregateRoot, DomainError, EntityId, TransactionId, ValueObject};
use iequip_events::Event;
use iequip_inventory::Condition;

use crate::recipient::Recipient;

/// Items are single units, so every borrow takes exactly one.
pub const BORROW_QUANTITY: u64 = 1;

/// Transaction status.
///
/// Borrows move `open -> returned` or `open -> cancelled`; distributions are
/// born `completed` and never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Open,
    Returned,
    Cancelled,
    Completed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Open => "open",
            TransactionStatus::Returned => "returned",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Open)
    }
}

impl core::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(TransactionStatus::Open),
            "returned" => Ok(TransactionStatus::Returned),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "completed" => Ok(TransactionStatus::Completed),
            _ => Err(DomainError::validation(format!("unknown status '{s}'"))),
        }
    }
}

/// One entity and the quantity a transaction takes from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub entity_id: EntityId,
    pub quantity: u64,
}

impl ValueObject for LineItem {}

/// What came back on a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub returned_at: DateTime<Utc>,
    pub condition: Condition,
    pub quantity: u64,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowDetails {
    pub item_id: EntityId,
    pub quantity: u64,
    /// Expected return date.
    pub end_date: NaiveDate,
    pub tested_by: String,
    pub returned: Option<ReturnRecord>,
    pub cancellation_reason: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionDetails {
    pub lines: Vec<LineItem>,
    pub released_by: String,
    pub proof_image_ref: Option<String>,
}

/// Kind-specific payload; each kind has its own fixed field set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransactionKind {
    Borrow(BorrowDetails),
    Distribution(DistributionDetails),
}

impl TransactionKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransactionKind::Borrow(_) => "borrow",
            TransactionKind::Distribution(_) => "distribution",
        }
    }
}

/// Aggregate root: Transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    recipient: Recipient,
    kind: TransactionKind,
    status: TransactionStatus,
    started_at: DateTime<Utc>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Transaction {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: TransactionId) -> Self {
        Self {
            id,
            recipient: Recipient::default(),
            kind: TransactionKind::Distribution(DistributionDetails::default()),
            status: TransactionStatus::Open,
            started_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> TransactionId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn recipient(&self) -> &Recipient {
        &self.recipient
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn borrow(&self) -> Option<&BorrowDetails> {
        match &self.kind {
            TransactionKind::Borrow(b) => Some(b),
            TransactionKind::Distribution(_) => None,
        }
    }

    pub fn distribution(&self) -> Option<&DistributionDetails> {
        match &self.kind {
            TransactionKind::Borrow(_) => None,
            TransactionKind::Distribution(d) => Some(d),
        }
    }

    /// Entities touched by this transaction, with quantities.
    pub fn line_items(&self) -> Vec<LineItem> {
        match &self.kind {
            TransactionKind::Borrow(b) => vec![LineItem {
                entity_id: b.item_id,
                quantity: b.quantity,
            }],
            TransactionKind::Distribution(d) => d.lines.clone(),
        }
    }

    /// An open borrow whose expected return date precedes `as_of`.
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        match (&self.kind, self.status) {
            (TransactionKind::Borrow(b), TransactionStatus::Open) => b.end_date < as_of,
            _ => false,
        }
    }
}

impl AggregateRoot for Transaction {
    type Id = TransactionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenBorrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenBorrow {
    pub transaction_id: TransactionId,
    pub recipient: Recipient,
    pub item_id: EntityId,
    pub end_date: NaiveDate,
    pub tested_by: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordDistribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDistribution {
    pub transaction_id: TransactionId,
    pub recipient: Recipient,
    pub lines: Vec<LineItem>,
    pub released_by: String,
    pub proof_image_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnBorrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnBorrow {
    pub transaction_id: TransactionId,
    pub condition: Condition,
    pub quantity: u64,
    pub remarks: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelBorrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelBorrow {
    pub transaction_id: TransactionId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteTransaction (record removal, not an undo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteTransaction {
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionCommand {
    OpenBorrow(OpenBorrow),
    RecordDistribution(RecordDistribution),
    ReturnBorrow(ReturnBorrow),
    CancelBorrow(CancelBorrow),
    Delete(DeleteTransaction),
}

/// Event: BorrowOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowOpened {
    pub transaction_id: TransactionId,
    pub recipient: Recipient,
    pub item_id: EntityId,
    pub quantity: u64,
    pub end_date: NaiveDate,
    pub tested_by: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DistributionRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecorded {
    pub transaction_id: TransactionId,
    pub recipient: Recipient,
    pub lines: Vec<LineItem>,
    pub released_by: String,
    pub proof_image_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BorrowReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowReturned {
    pub transaction_id: TransactionId,
    pub item_id: EntityId,
    pub condition: Condition,
    pub quantity: u64,
    pub remarks: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BorrowCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowCancelled {
    pub transaction_id: TransactionId,
    pub item_id: EntityId,
    pub quantity: u64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransactionDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDeleted {
    pub transaction_id: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionEvent {
    BorrowOpened(BorrowOpened),
    DistributionRecorded(DistributionRecorded),
    BorrowReturned(BorrowReturned),
    BorrowCancelled(BorrowCancelled),
    TransactionDeleted(TransactionDeleted),
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> TransactionId {
        match self {
            TransactionEvent::BorrowOpened(e) => e.transaction_id,
            TransactionEvent::DistributionRecorded(e) => e.transaction_id,
            TransactionEvent::BorrowReturned(e) => e.transaction_id,
            TransactionEvent::BorrowCancelled(e) => e.transaction_id,
            TransactionEvent::TransactionDeleted(e) => e.transaction_id,
        }
    }
}

impl Event for TransactionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransactionEvent::BorrowOpened(_) => "lending.transaction.borrow_opened",
            TransactionEvent::DistributionRecorded(_) => "lending.transaction.distribution_recorded",
            TransactionEvent::BorrowReturned(_) => "lending.transaction.borrow_returned",
            TransactionEvent::BorrowCancelled(_) => "lending.transaction.borrow_cancelled",
            TransactionEvent::TransactionDeleted(_) => "lending.transaction.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransactionEvent::BorrowOpened(e) => e.occurred_at,
            TransactionEvent::DistributionRecorded(e) => e.occurred_at,
            TransactionEvent::BorrowReturned(e) => e.occurred_at,
            TransactionEvent::BorrowCancelled(e) => e.occurred_at,
            TransactionEvent::TransactionDeleted(e) => e.occurred_at,
        }
    }

    fn aggregate_id(&self) -> Uuid {
        *self.transaction_id().as_uuid()
    }
}

impl Aggregate for Transaction {
    type Command = TransactionCommand;
    type Event = TransactionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransactionEvent::BorrowOpened(e) => {
                self.id = e.transaction_id;
                self.recipient = e.recipient.clone();
                self.kind = TransactionKind::Borrow(BorrowDetails {
                    item_id: e.item_id,
                    quantity: e.quantity,
                    end_date: e.end_date,
                    tested_by: e.tested_by.clone(),
                    returned: None,
                    cancellation_reason: None,
                });
                self.status = TransactionStatus::Open;
                self.started_at = e.occurred_at;
                self.created = true;
            }
            TransactionEvent::DistributionRecorded(e) => {
                self.id = e.transaction_id;
                self.recipient = e.recipient.clone();
                self.kind = TransactionKind::Distribution(DistributionDetails {
                    lines: e.lines.clone(),
                    released_by: e.released_by.clone(),
                    proof_image_ref: e.proof_image_ref.clone(),
                });
                self.status = TransactionStatus::Completed;
                self.started_at = e.occurred_at;
                self.created = true;
            }
            TransactionEvent::BorrowReturned(e) => {
                if let TransactionKind::Borrow(b) = &mut self.kind {
                    b.returned = Some(ReturnRecord {
                        returned_at: e.occurred_at,
                        condition: e.condition,
                        quantity: e.quantity,
                        remarks: e.remarks.clone(),
                    });
                }
                self.status = TransactionStatus::Returned;
            }
            TransactionEvent::BorrowCancelled(e) => {
                if let TransactionKind::Borrow(b) = &mut self.kind {
                    b.cancellation_reason = e.reason.clone();
                }
                self.status = TransactionStatus::Cancelled;
            }
            TransactionEvent::TransactionDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransactionCommand::OpenBorrow(cmd) => self.handle_open_borrow(cmd),
            TransactionCommand::RecordDistribution(cmd) => self.handle_record_distribution(cmd),
            TransactionCommand::ReturnBorrow(cmd) => self.handle_return(cmd),
            TransactionCommand::CancelBorrow(cmd) => self.handle_cancel(cmd),
            TransactionCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Transaction {
    fn ensure_exists(&self, transaction_id: TransactionId) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found(format!("transaction {transaction_id}")));
        }
        if self.id != transaction_id {
            return Err(DomainError::invariant("transaction_id mismatch"));
        }
        Ok(())
    }

    fn ensure_new(&self, transaction_id: TransactionId) -> Result<(), DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "transaction {transaction_id} already exists"
            )));
        }
        Ok(())
    }

    fn open_borrow_details(&self) -> Result<&BorrowDetails, DomainError> {
        match &self.kind {
            TransactionKind::Borrow(b) => Ok(b),
            TransactionKind::Distribution(_) => Err(DomainError::conflict(
                "distribution transactions are one-way and cannot be returned or cancelled",
            )),
        }
    }

    fn handle_open_borrow(&self, cmd: &OpenBorrow) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_new(cmd.transaction_id)?;
        cmd.recipient.validate()?;

        if cmd.tested_by.trim().is_empty() {
            return Err(DomainError::validation("tested_by cannot be empty"));
        }
        if cmd.end_date < cmd.occurred_at.date_naive() {
            return Err(DomainError::validation(
                "end_date cannot precede the borrow start date",
            ));
        }

        Ok(vec![TransactionEvent::BorrowOpened(BorrowOpened {
            transaction_id: cmd.transaction_id,
            recipient: cmd.recipient.normalized(),
            item_id: cmd.item_id,
            quantity: BORROW_QUANTITY,
            end_date: cmd.end_date,
            tested_by: cmd.tested_by.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_distribution(
        &self,
        cmd: &RecordDistribution,
    ) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_new(cmd.transaction_id)?;
        cmd.recipient.validate()?;

        if cmd.released_by.trim().is_empty() {
            return Err(DomainError::validation("released_by cannot be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "a distribution needs at least one line item",
            ));
        }

        let mut seen = HashSet::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "line for entity {} must have a positive quantity",
                    line.entity_id
                )));
            }
            if !seen.insert(line.entity_id) {
                return Err(DomainError::validation(format!(
                    "entity {} appears on more than one line",
                    line.entity_id
                )));
            }
        }

        Ok(vec![TransactionEvent::DistributionRecorded(DistributionRecorded {
            transaction_id: cmd.transaction_id,
            recipient: cmd.recipient.normalized(),
            lines: cmd.lines.clone(),
            released_by: cmd.released_by.trim().to_string(),
            proof_image_ref: cmd.proof_image_ref.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnBorrow) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_exists(cmd.transaction_id)?;
        let borrow = self.open_borrow_details()?;

        if self.status != TransactionStatus::Open {
            return Err(DomainError::already_returned(format!(
                "transaction {} is {}",
                cmd.transaction_id,
                self.status.as_str()
            )));
        }
        if cmd.quantity > borrow.quantity {
            return Err(DomainError::invalid_quantity(format!(
                "returned quantity {} exceeds borrowed quantity {}",
                cmd.quantity, borrow.quantity
            )));
        }

        Ok(vec![TransactionEvent::BorrowReturned(BorrowReturned {
            transaction_id: cmd.transaction_id,
            item_id: borrow.item_id,
            condition: cmd.condition,
            quantity: cmd.quantity,
            remarks: cmd.remarks.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelBorrow) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_exists(cmd.transaction_id)?;
        let borrow = self.open_borrow_details()?;

        match self.status {
            TransactionStatus::Open => {}
            TransactionStatus::Returned => {
                return Err(DomainError::already_returned(format!(
                    "transaction {} was already returned",
                    cmd.transaction_id
                )));
            }
            other => {
                return Err(DomainError::conflict(format!(
                    "transaction {} is {}",
                    cmd.transaction_id,
                    other.as_str()
                )));
            }
        }

        Ok(vec![TransactionEvent::BorrowCancelled(BorrowCancelled {
            transaction_id: cmd.transaction_id,
            item_id: borrow.item_id,
            quantity: borrow.quantity,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteTransaction) -> Result<Vec<TransactionEvent>, DomainError> {
        self.ensure_exists(cmd.transaction_id)?;

        if self.borrow().is_some() && self.status == TransactionStatus::Open {
            return Err(DomainError::conflict("item currently borrowed"));
        }

        Ok(vec![TransactionEvent::TransactionDeleted(TransactionDeleted {
            transaction_id: cmd.transaction_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipient::Department;
    use chrono::Duration;
    use iequip_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn recipient() -> Recipient {
        Recipient {
            name: "Jose Reyes".to_string(),
            email: "jose.reyes@example.org".to_string(),
            age: 41,
            contact_number: "09171234567".to_string(),
            address: "Brgy. San Roque".to_string(),
            department: Some(Department::Engineering),
        }
    }

    fn open_borrow_cmd(transaction_id: TransactionId) -> TransactionCommand {
        let now = test_time();
        TransactionCommand::OpenBorrow(OpenBorrow {
            transaction_id,
            recipient: recipient(),
            item_id: EntityId::new(),
            end_date: (now + Duration::days(7)).date_naive(),
            tested_by: "inspector".to_string(),
            occurred_at: now,
        })
    }

    fn open_borrow() -> Transaction {
        let id = TransactionId::new();
        let mut tx = Transaction::empty(id);
        execute(&mut tx, &open_borrow_cmd(id)).unwrap();
        tx
    }

    fn return_cmd(tx: &Transaction, quantity: u64) -> TransactionCommand {
        TransactionCommand::ReturnBorrow(ReturnBorrow {
            transaction_id: tx.id_typed(),
            condition: Condition::Damaged,
            quantity,
            remarks: Some("cracked casing".to_string()),
            occurred_at: test_time(),
        })
    }

    fn cancel_cmd(tx: &Transaction) -> TransactionCommand {
        TransactionCommand::CancelBorrow(CancelBorrow {
            transaction_id: tx.id_typed(),
            reason: None,
            occurred_at: test_time(),
        })
    }

    fn delete_cmd(tx: &Transaction) -> TransactionCommand {
        TransactionCommand::Delete(DeleteTransaction {
            transaction_id: tx.id_typed(),
            occurred_at: test_time(),
        })
    }

    fn distribution(lines: Vec<LineItem>) -> Result<Transaction, DomainError> {
        let id = TransactionId::new();
        let mut tx = Transaction::empty(id);
        execute(
            &mut tx,
            &TransactionCommand::RecordDistribution(RecordDistribution {
                transaction_id: id,
                recipient: recipient(),
                lines,
                released_by: "storekeeper".to_string(),
                proof_image_ref: Some("proofs/receipt.jpg".to_string()),
                occurred_at: test_time(),
            }),
        )?;
        Ok(tx)
    }

    #[test]
    fn open_borrow_starts_open_with_one_unit() {
        let tx = open_borrow();
        assert_eq!(tx.status(), TransactionStatus::Open);
        assert_eq!(tx.version(), 1);
        let b = tx.borrow().unwrap();
        assert_eq!(b.quantity, BORROW_QUANTITY);
        assert_eq!(b.tested_by, "inspector");
        assert!(b.returned.is_none());
    }

    #[test]
    fn invalid_recipient_blocks_borrow() {
        let id = TransactionId::new();
        let tx = Transaction::empty(id);
        let TransactionCommand::OpenBorrow(mut cmd) = open_borrow_cmd(id) else {
            unreachable!()
        };
        cmd.recipient.age = 16;
        let err = tx.handle(&TransactionCommand::OpenBorrow(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn end_date_before_start_is_rejected() {
        let id = TransactionId::new();
        let tx = Transaction::empty(id);
        let TransactionCommand::OpenBorrow(mut cmd) = open_borrow_cmd(id) else {
            unreachable!()
        };
        cmd.end_date = (cmd.occurred_at - Duration::days(1)).date_naive();
        let err = tx.handle(&TransactionCommand::OpenBorrow(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("end_date")));
    }

    #[test]
    fn return_closes_the_borrow_and_second_return_fails() {
        let mut tx = open_borrow();
        let cmd = return_cmd(&tx, 1);
        execute(&mut tx, &cmd).unwrap();

        assert_eq!(tx.status(), TransactionStatus::Returned);
        let record = tx.borrow().unwrap().returned.clone().unwrap();
        assert_eq!(record.condition, Condition::Damaged);
        assert_eq!(record.quantity, 1);

        let err = tx.handle(&return_cmd(&tx, 1)).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyReturned(_)));
        let err = tx.handle(&cancel_cmd(&tx)).unwrap_err();
        assert!(matches!(err, DomainError::AlreadyReturned(_)));
    }

    #[test]
    fn over_return_is_rejected_without_clamping() {
        let tx = open_borrow();
        let err = tx.handle(&return_cmd(&tx, 2)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidQuantity(_)));
        assert_eq!(tx.status(), TransactionStatus::Open);
    }

    #[test]
    fn cancel_is_terminal() {
        let mut tx = open_borrow();
        let cmd = cancel_cmd(&tx);
        let events = execute(&mut tx, &cmd).unwrap();
        assert!(matches!(&events[0], TransactionEvent::BorrowCancelled(e) if e.quantity == 1));
        assert_eq!(tx.status(), TransactionStatus::Cancelled);

        assert!(matches!(
            tx.handle(&cancel_cmd(&tx)).unwrap_err(),
            DomainError::Conflict(_)
        ));
        assert!(matches!(
            tx.handle(&return_cmd(&tx, 1)).unwrap_err(),
            DomainError::AlreadyReturned(_)
        ));
    }

    #[test]
    fn open_borrow_cannot_be_deleted() {
        let tx = open_borrow();
        let err = tx.handle(&delete_cmd(&tx)).unwrap_err();
        assert_eq!(err, DomainError::conflict("item currently borrowed"));
    }

    #[test]
    fn returned_borrow_can_be_deleted_once() {
        let mut tx = open_borrow();
        let cmd = return_cmd(&tx, 1);
        execute(&mut tx, &cmd).unwrap();
        let cmd = delete_cmd(&tx);
        execute(&mut tx, &cmd).unwrap();
        assert!(tx.is_deleted());

        let err = tx.handle(&delete_cmd(&tx)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn distribution_is_completed_on_creation() {
        let tx = distribution(vec![LineItem {
            entity_id: EntityId::new(),
            quantity: 4,
        }])
        .unwrap();
        assert_eq!(tx.status(), TransactionStatus::Completed);
        assert!(tx.status().is_terminal());
        assert_eq!(tx.line_items().len(), 1);

        assert!(matches!(
            tx.handle(&return_cmd(&tx, 1)).unwrap_err(),
            DomainError::Conflict(_)
        ));
        assert!(tx.handle(&delete_cmd(&tx)).is_ok());
    }

    #[test]
    fn distribution_lines_are_validated() {
        assert!(matches!(distribution(vec![]), Err(DomainError::Validation(_))));

        let dup = EntityId::new();
        let err = distribution(vec![
            LineItem {
                entity_id: dup,
                quantity: 1,
            },
            LineItem {
                entity_id: dup,
                quantity: 2,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("more than one line")));

        let err = distribution(vec![LineItem {
            entity_id: EntityId::new(),
            quantity: 0,
        }])
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn overdue_only_applies_to_open_borrows() {
        let mut tx = open_borrow();
        let end = tx.borrow().unwrap().end_date;
        assert!(!tx.is_overdue(end));
        assert!(tx.is_overdue(end + Duration::days(1)));

        let cmd = return_cmd(&tx, 1);
        execute(&mut tx, &cmd).unwrap();
        assert!(!tx.is_overdue(end + Duration::days(1)));
    }

    #[test]
    fn kind_serializes_as_tagged_variant() {
        let tx = open_borrow();
        let json = serde_json::to_value(tx.kind()).unwrap();
        assert_eq!(json["kind"], "borrow");
        assert_eq!(json["quantity"], 1);
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: after any accepted return, returned <= borrowed, and
            /// nothing further is accepted.
            #[test]
            fn returned_quantity_never_exceeds_borrowed(quantity in 0u64..5, cancel_first in any::<bool>()) {
                let mut tx = open_borrow();
                if cancel_first {
                    let cmd = cancel_cmd(&tx);
                    execute(&mut tx, &cmd).unwrap();
                }

                let cmd = return_cmd(&tx, quantity);
                let result = execute(&mut tx, &cmd);
                if let Some(record) = tx.borrow().and_then(|b| b.returned.clone()) {
                    prop_assert!(result.is_ok());
                    prop_assert!(record.quantity <= tx.borrow().unwrap().quantity);
                    prop_assert!(tx.handle(&return_cmd(&tx, 0)).is_err());
                    prop_assert!(tx.handle(&cancel_cmd(&tx)).is_err());
                } else {
                    prop_assert!(result.is_err());
                }
            }
        }
    }
}
