use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use iequip_core::{
    Aggregate, AggregateRoot, DomainError, EntityId, ExpectedVersion, TransactionId,
};
use iequip_events::Event;

use crate::category::Category;
use crate::condition::{Condition, resolve_condition};

/// What kind of stock an entity is.
///
/// Items are single physical units that are lent and come back; supplies are
/// counted stock handed out for good.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockKind {
    Item { condition: Condition },
    Supply,
}

impl StockKind {
    pub fn is_item(&self) -> bool {
        matches!(self, StockKind::Item { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            StockKind::Item { .. } => "item",
            StockKind::Supply => "supply",
        }
    }
}

/// Why stock is being reserved; decides which kind of entity may serve it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationPurpose {
    Borrow,
    Distribution,
}

/// Aggregate root: StockEntity.
///
/// Invariant: `available + out == total`. `out` counts borrowed units for items
/// and distributed units for supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockEntity {
    id: EntityId,
    name: String,
    category: Category,
    unit: String,
    kind: StockKind,
    photo_ref: Option<String>,
    quantity_total: u64,
    quantity_available: u64,
    quantity_out: u64,
    version: u64,
    created: bool,
}

impl StockEntity {
    /// Create an empty, not-yet-registered aggregate instance.
    pub fn empty(id: EntityId) -> Self {
        Self {
            id,
            name: String::new(),
            category: Category::Other,
            unit: String::new(),
            kind: StockKind::Supply,
            photo_ref: None,
            quantity_total: 0,
            quantity_available: 0,
            quantity_out: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> EntityId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn kind(&self) -> StockKind {
        self.kind
    }

    /// Current condition (items only).
    pub fn condition(&self) -> Option<Condition> {
        match self.kind {
            StockKind::Item { condition } => Some(condition),
            StockKind::Supply => None,
        }
    }

    pub fn photo_ref(&self) -> Option<&str> {
        self.photo_ref.as_deref()
    }

    pub fn quantity_total(&self) -> u64 {
        self.quantity_total
    }

    pub fn quantity_available(&self) -> u64 {
        self.quantity_available
    }

    /// Borrowed (items) or distributed (supplies) quantity.
    pub fn quantity_out(&self) -> u64 {
        self.quantity_out
    }

    /// Verify the conservation invariant.
    pub fn check_conservation(&self) -> Result<(), DomainError> {
        if self.quantity_available.checked_add(self.quantity_out) != Some(self.quantity_total) {
            return Err(DomainError::invariant(format!(
                "entity {}: available {} + out {} != total {}",
                self.id, self.quantity_available, self.quantity_out, self.quantity_total
            )));
        }
        if self.kind.is_item() && self.quantity_total != 1 {
            return Err(DomainError::invariant(format!(
                "item {} must be a single unit (total {})",
                self.id, self.quantity_total
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for StockEntity {
    type Id = EntityId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterEntity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterEntity {
    pub entity_id: EntityId,
    pub name: String,
    pub category: Category,
    pub unit: String,
    pub kind: StockKind,
    pub quantity_total: u64,
    pub photo_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateDetails. `None` fields keep their current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDetails {
    pub entity_id: EntityId,
    pub expected_version: ExpectedVersion,
    pub name: Option<String>,
    pub category: Option<Category>,
    pub unit: Option<String>,
    pub photo_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Restock (supplies only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restock {
    pub entity_id: EntityId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reserve {
    pub entity_id: EntityId,
    pub quantity: u64,
    pub purpose: ReservationPurpose,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Release (undo of a reservation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub entity_id: EntityId,
    pub quantity: u64,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: Reconcile a borrow return against the entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconcile {
    pub entity_id: EntityId,
    pub borrowed_quantity: u64,
    pub returned_quantity: u64,
    pub condition: Condition,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertReturn. Compensates a reconciled return whose transaction
/// record could not be written: takes the returned quantity out again and
/// puts back the condition held before the return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertReturn {
    pub entity_id: EntityId,
    pub returned_quantity: u64,
    pub condition: Condition,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockCommand {
    Register(RegisterEntity),
    UpdateDetails(UpdateDetails),
    Restock(Restock),
    Reserve(Reserve),
    Release(Release),
    Reconcile(Reconcile),
    RevertReturn(RevertReturn),
}

/// Event: EntityRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRegistered {
    pub entity_id: EntityId,
    pub name: String,
    pub category: Category,
    pub unit: String,
    pub kind: StockKind,
    pub quantity_total: u64,
    pub photo_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DetailsUpdated (carries the full new details).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsUpdated {
    pub entity_id: EntityId,
    pub name: String,
    pub category: Category,
    pub unit: String,
    pub photo_ref: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReplenished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReplenished {
    pub entity_id: EntityId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub entity_id: EntityId,
    pub quantity: u64,
    pub purpose: ReservationPurpose,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub entity_id: EntityId,
    pub quantity: u64,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnReconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnReconciled {
    pub entity_id: EntityId,
    pub returned_quantity: u64,
    pub previous_condition: Condition,
    pub condition: Condition,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnReverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnReverted {
    pub entity_id: EntityId,
    pub returned_quantity: u64,
    pub condition: Condition,
    pub reference: TransactionId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    EntityRegistered(EntityRegistered),
    DetailsUpdated(DetailsUpdated),
    StockReplenished(StockReplenished),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    ReturnReconciled(ReturnReconciled),
    ReturnReverted(ReturnReverted),
}

impl StockEvent {
    pub fn entity_id(&self) -> EntityId {
        match self {
            StockEvent::EntityRegistered(e) => e.entity_id,
            StockEvent::DetailsUpdated(e) => e.entity_id,
            StockEvent::StockReplenished(e) => e.entity_id,
            StockEvent::StockReserved(e) => e.entity_id,
            StockEvent::StockReleased(e) => e.entity_id,
            StockEvent::ReturnReconciled(e) => e.entity_id,
            StockEvent::ReturnReverted(e) => e.entity_id,
        }
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::EntityRegistered(_) => "inventory.entity.registered",
            StockEvent::DetailsUpdated(_) => "inventory.entity.details_updated",
            StockEvent::StockReplenished(_) => "inventory.entity.stock_replenished",
            StockEvent::StockReserved(_) => "inventory.entity.stock_reserved",
            StockEvent::StockReleased(_) => "inventory.entity.stock_released",
            StockEvent::ReturnReconciled(_) => "inventory.entity.return_reconciled",
            StockEvent::ReturnReverted(_) => "inventory.entity.return_reverted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::EntityRegistered(e) => e.occurred_at,
            StockEvent::DetailsUpdated(e) => e.occurred_at,
            StockEvent::StockReplenished(e) => e.occurred_at,
            StockEvent::StockReserved(e) => e.occurred_at,
            StockEvent::StockReleased(e) => e.occurred_at,
            StockEvent::ReturnReconciled(e) => e.occurred_at,
            StockEvent::ReturnReverted(e) => e.occurred_at,
        }
    }

    fn aggregate_id(&self) -> Uuid {
        *self.entity_id().as_uuid()
    }
}

impl Aggregate for StockEntity {
    type Command = StockCommand;
    type Event = StockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockEvent::EntityRegistered(e) => {
                self.id = e.entity_id;
                self.name = e.name.clone();
                self.category = e.category;
                self.unit = e.unit.clone();
                self.kind = e.kind;
                self.photo_ref = e.photo_ref.clone();
                self.quantity_total = e.quantity_total;
                self.quantity_available = e.quantity_total;
                self.quantity_out = 0;
                self.created = true;
            }
            StockEvent::DetailsUpdated(e) => {
                self.name = e.name.clone();
                self.category = e.category;
                self.unit = e.unit.clone();
                self.photo_ref = e.photo_ref.clone();
            }
            StockEvent::StockReplenished(e) => {
                self.quantity_total += e.quantity;
                self.quantity_available += e.quantity;
            }
            StockEvent::StockReserved(e) => {
                self.quantity_available -= e.quantity;
                self.quantity_out += e.quantity;
            }
            StockEvent::StockReleased(e) => {
                self.quantity_out -= e.quantity;
                self.quantity_available += e.quantity;
            }
            StockEvent::ReturnReconciled(e) => {
                self.quantity_out -= e.returned_quantity;
                self.quantity_available += e.returned_quantity;
                if let StockKind::Item { condition } = &mut self.kind {
                    *condition = e.condition;
                }
            }
            StockEvent::ReturnReverted(e) => {
                self.quantity_available -= e.returned_quantity;
                self.quantity_out += e.returned_quantity;
                if let StockKind::Item { condition } = &mut self.kind {
                    *condition = e.condition;
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockCommand::Register(cmd) => self.handle_register(cmd),
            StockCommand::UpdateDetails(cmd) => self.handle_update(cmd),
            StockCommand::Restock(cmd) => self.handle_restock(cmd),
            StockCommand::Reserve(cmd) => self.handle_reserve(cmd),
            StockCommand::Release(cmd) => self.handle_release(cmd),
            StockCommand::Reconcile(cmd) => self.handle_reconcile(cmd),
            StockCommand::RevertReturn(cmd) => self.handle_revert_return(cmd),
        }
    }
}

impl StockEntity {
    fn ensure_exists(&self, entity_id: EntityId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("entity {entity_id}")));
        }
        if self.id != entity_id {
            return Err(DomainError::invariant("entity_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterEntity) -> Result<Vec<StockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict(format!(
                "entity {} already exists",
                cmd.entity_id
            )));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.unit.trim().is_empty() {
            return Err(DomainError::validation("unit cannot be empty"));
        }
        if cmd.kind.is_item() && cmd.quantity_total != 1 {
            return Err(DomainError::validation(
                "items are single units; register each physical unit separately",
            ));
        }

        Ok(vec![StockEvent::EntityRegistered(EntityRegistered {
            entity_id: cmd.entity_id,
            name: cmd.name.trim().to_string(),
            category: cmd.category,
            unit: cmd.unit.trim().to_string(),
            kind: cmd.kind,
            quantity_total: cmd.quantity_total,
            photo_ref: cmd.photo_ref.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateDetails) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.entity_id)?;
        cmd.expected_version.check(self.version)?;

        let name = match &cmd.name {
            Some(n) if n.trim().is_empty() => {
                return Err(DomainError::validation("name cannot be empty"));
            }
            Some(n) => n.trim().to_string(),
            None => self.name.clone(),
        };
        let unit = match &cmd.unit {
            Some(u) if u.trim().is_empty() => {
                return Err(DomainError::validation("unit cannot be empty"));
            }
            Some(u) => u.trim().to_string(),
            None => self.unit.clone(),
        };

        Ok(vec![StockEvent::DetailsUpdated(DetailsUpdated {
            entity_id: cmd.entity_id,
            name,
            category: cmd.category.unwrap_or(self.category),
            unit,
            photo_ref: cmd.photo_ref.clone().or_else(|| self.photo_ref.clone()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_restock(&self, cmd: &Restock) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.entity_id)?;

        if self.kind.is_item() {
            return Err(DomainError::validation(
                "items are single units and cannot be restocked",
            ));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("restock quantity must be positive"));
        }
        if self.quantity_total.checked_add(cmd.quantity).is_none() {
            return Err(DomainError::invalid_quantity("restock overflows total quantity"));
        }

        Ok(vec![StockEvent::StockReplenished(StockReplenished {
            entity_id: cmd.entity_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &Reserve) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.entity_id)?;

        match (cmd.purpose, self.kind) {
            (ReservationPurpose::Borrow, StockKind::Supply) => {
                return Err(DomainError::validation(format!(
                    "entity {} is a supply and cannot be borrowed",
                    cmd.entity_id
                )));
            }
            (ReservationPurpose::Distribution, StockKind::Item { .. }) => {
                return Err(DomainError::validation(format!(
                    "entity {} is an item and cannot be distributed",
                    cmd.entity_id
                )));
            }
            _ => {}
        }

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.quantity > self.quantity_available {
            return Err(DomainError::insufficient_stock(
                cmd.quantity,
                self.quantity_available,
            ));
        }

        Ok(vec![StockEvent::StockReserved(StockReserved {
            entity_id: cmd.entity_id,
            quantity: cmd.quantity,
            purpose: cmd.purpose,
            reference: cmd.reference,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &Release) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.entity_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.quantity > self.quantity_out {
            return Err(DomainError::invariant(format!(
                "releasing {} from entity {} would push available above total (out {})",
                cmd.quantity, cmd.entity_id, self.quantity_out
            )));
        }

        Ok(vec![StockEvent::StockReleased(StockReleased {
            entity_id: cmd.entity_id,
            quantity: cmd.quantity,
            reference: cmd.reference,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reconcile(&self, cmd: &Reconcile) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.entity_id)?;

        let StockKind::Item { condition: previous } = self.kind else {
            return Err(DomainError::validation(
                "distributed supplies are one-way and have no return path",
            ));
        };

        if cmd.returned_quantity > cmd.borrowed_quantity {
            return Err(DomainError::invalid_quantity(format!(
                "returned quantity {} exceeds borrowed quantity {}",
                cmd.returned_quantity, cmd.borrowed_quantity
            )));
        }
        if cmd.borrowed_quantity > self.quantity_out {
            return Err(DomainError::invariant(format!(
                "entity {} has {} out but a return claims {} borrowed",
                cmd.entity_id, self.quantity_out, cmd.borrowed_quantity
            )));
        }

        Ok(vec![StockEvent::ReturnReconciled(ReturnReconciled {
            entity_id: cmd.entity_id,
            returned_quantity: cmd.returned_quantity,
            previous_condition: previous,
            condition: resolve_condition(previous, cmd.condition),
            reference: cmd.reference,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revert_return(&self, cmd: &RevertReturn) -> Result<Vec<StockEvent>, DomainError> {
        self.ensure_exists(cmd.entity_id)?;

        if !self.kind.is_item() {
            return Err(DomainError::validation(
                "distributed supplies are one-way and have no return path",
            ));
        }
        if cmd.returned_quantity > self.quantity_available {
            return Err(DomainError::insufficient_stock(
                cmd.returned_quantity,
                self.quantity_available,
            ));
        }

        Ok(vec![StockEvent::ReturnReverted(ReturnReverted {
            entity_id: cmd.entity_id,
            returned_quantity: cmd.returned_quantity,
            condition: cmd.condition,
            reference: cmd.reference,
            occurred_at: cmd.occurred_at,
        })])
    }
}
