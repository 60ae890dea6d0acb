//! Serialized stock ledger.
//!
//! One `Mutex` per entity is the single mutation point for that entity's
//! quantities: every reserve, release, restock and return runs
//! decide-then-apply while holding it, so concurrent reservations against the
//! same entity are linearized and can never oversell. The outer `RwLock` only
//! guards the entity map itself and is released before any entity is mutated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use iequip_core::{AggregateRoot, EntityId, ExpectedVersion, TransactionId};
use iequip_events::execute;
use iequip_inventory::{
    Category, Condition, Reconcile, RegisterEntity, Release, Reserve, ReservationPurpose, Restock,
    RevertReturn, StockCommand, StockEntity, StockEvent, StockKind, UpdateDetails,
};

use crate::error::{LedgerError, LedgerResult};
use crate::publisher::{ENTITY_STREAM, EventPublisher};

/// Read-only copy of an entity's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockSnapshot {
    pub id: EntityId,
    pub name: String,
    pub category: Category,
    pub unit: String,
    #[serde(flatten)]
    pub kind: StockKind,
    pub photo_ref: Option<String>,
    pub quantity_total: u64,
    pub quantity_available: u64,
    /// Borrowed (items) or distributed (supplies).
    pub quantity_out: u64,
    pub version: u64,
}

impl From<&StockEntity> for StockSnapshot {
    fn from(entity: &StockEntity) -> Self {
        Self {
            id: entity.id_typed(),
            name: entity.name().to_string(),
            category: entity.category(),
            unit: entity.unit().to_string(),
            kind: entity.kind(),
            photo_ref: entity.photo_ref().map(str::to_string),
            quantity_total: entity.quantity_total(),
            quantity_available: entity.quantity_available(),
            quantity_out: entity.quantity_out(),
            version: entity.version(),
        }
    }
}

/// Proof that `quantity` of an entity is held for transaction `reference`.
///
/// Handing the token back to [`StockLedger::release_token`] undoes exactly
/// that reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationToken {
    pub entity_id: EntityId,
    pub quantity: u64,
    pub purpose: ReservationPurpose,
    pub reference: TransactionId,
    /// Entity version right after the reservation was applied.
    pub version: u64,
}

/// What a return did to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnAdjustment {
    pub entity_id: EntityId,
    pub returned_quantity: u64,
    pub previous: Condition,
    pub stored: Condition,
}

/// Input for [`StockLedger::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntity {
    pub name: String,
    pub category: Category,
    pub unit: String,
    pub kind: StockKind,
    pub quantity_total: u64,
    pub photo_ref: Option<String>,
}

/// Catalogue changes; `None` keeps the current value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetailsChange {
    pub name: Option<String>,
    pub category: Option<Category>,
    pub unit: Option<String>,
    pub photo_ref: Option<String>,
}

#[derive(Debug)]
pub struct StockLedger {
    entities: RwLock<HashMap<EntityId, Arc<Mutex<StockEntity>>>>,
    publisher: Arc<EventPublisher>,
}

impl StockLedger {
    pub fn new(publisher: Arc<EventPublisher>) -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            publisher,
        }
    }

    pub fn register(&self, new: NewEntity) -> LedgerResult<StockSnapshot> {
        let entity_id = EntityId::new();
        let mut entity = StockEntity::empty(entity_id);
        let cmd = StockCommand::Register(RegisterEntity {
            entity_id,
            name: new.name,
            category: new.category,
            unit: new.unit,
            kind: new.kind,
            quantity_total: new.quantity_total,
            photo_ref: new.photo_ref,
            occurred_at: Utc::now(),
        });
        let events = execute(&mut entity, &cmd).map_err(|e| LedgerError::from_stock(entity_id, e))?;
        let snapshot = StockSnapshot::from(&entity);

        {
            let mut entities = self
                .entities
                .write()
                .map_err(|_| LedgerError::invariant("stock ledger lock poisoned"))?;
            if entities.contains_key(&entity_id) {
                return Err(LedgerError::Conflict(format!(
                    "entity {entity_id} already exists"
                )));
            }
            entities.insert(entity_id, Arc::new(Mutex::new(entity)));
        }

        self.publisher.publish(ENTITY_STREAM, &events);
        info!(
            entity_id = %entity_id,
            kind = snapshot.kind.label(),
            quantity_total = snapshot.quantity_total,
            "entity registered"
        );
        Ok(snapshot)
    }

    pub fn update_details(
        &self,
        entity_id: EntityId,
        expected_version: ExpectedVersion,
        change: DetailsChange,
    ) -> LedgerResult<StockSnapshot> {
        let (snapshot, _) = self.mutate(
            entity_id,
            StockCommand::UpdateDetails(UpdateDetails {
                entity_id,
                expected_version,
                name: change.name,
                category: change.category,
                unit: change.unit,
                photo_ref: change.photo_ref,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(entity_id = %entity_id, version = snapshot.version, "entity details updated");
        Ok(snapshot)
    }

    /// Add stock to a supply.
    pub fn restock(&self, entity_id: EntityId, quantity: u64) -> LedgerResult<StockSnapshot> {
        let (snapshot, _) = self.mutate(
            entity_id,
            StockCommand::Restock(Restock {
                entity_id,
                quantity,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(entity_id = %entity_id, quantity, "entity restocked");
        Ok(snapshot)
    }

    /// Move `quantity` from available to out, or fail without touching the
    /// entity (`NotFound`, `InsufficientStock`, `Validation`).
    pub fn reserve(
        &self,
        entity_id: EntityId,
        quantity: u64,
        purpose: ReservationPurpose,
        reference: TransactionId,
    ) -> LedgerResult<ReservationToken> {
        let (snapshot, _) = self.mutate(
            entity_id,
            StockCommand::Reserve(Reserve {
                entity_id,
                quantity,
                purpose,
                reference,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(
            entity_id = %entity_id,
            transaction_id = %reference,
            quantity,
            available = snapshot.quantity_available,
            "stock reserved"
        );
        Ok(ReservationToken {
            entity_id,
            quantity,
            purpose,
            reference,
            version: snapshot.version,
        })
    }

    /// Undo a reservation. Fails with `InvariantViolation` if it would push
    /// available above total.
    pub fn release(
        &self,
        entity_id: EntityId,
        quantity: u64,
        reference: TransactionId,
    ) -> LedgerResult<StockSnapshot> {
        let (snapshot, _) = self.mutate(
            entity_id,
            StockCommand::Release(Release {
                entity_id,
                quantity,
                reference,
                occurred_at: Utc::now(),
            }),
        )?;
        info!(
            entity_id = %entity_id,
            transaction_id = %reference,
            quantity,
            available = snapshot.quantity_available,
            "stock released"
        );
        Ok(snapshot)
    }

    pub fn release_token(&self, token: &ReservationToken) -> LedgerResult<StockSnapshot> {
        self.release(token.entity_id, token.quantity, token.reference)
    }

    /// Reconcile a borrow return: restore `returned_quantity` and store the
    /// returned condition. Supplies have no return path.
    pub fn adjust_on_return(
        &self,
        entity_id: EntityId,
        borrowed_quantity: u64,
        returned_quantity: u64,
        condition: Condition,
        reference: TransactionId,
    ) -> LedgerResult<ReturnAdjustment> {
        let (_, events) = self.mutate(
            entity_id,
            StockCommand::Reconcile(Reconcile {
                entity_id,
                borrowed_quantity,
                returned_quantity,
                condition,
                reference,
                occurred_at: Utc::now(),
            }),
        )?;

        let adjustment = events
            .iter()
            .find_map(|e| match e {
                StockEvent::ReturnReconciled(r) => Some(ReturnAdjustment {
                    entity_id,
                    returned_quantity: r.returned_quantity,
                    previous: r.previous_condition,
                    stored: r.condition,
                }),
                _ => None,
            })
            .ok_or_else(|| LedgerError::invariant("return produced no reconciliation event"))?;

        info!(
            entity_id = %entity_id,
            transaction_id = %reference,
            returned_quantity,
            previous = %adjustment.previous,
            stored = %adjustment.stored,
            "return reconciled"
        );
        Ok(adjustment)
    }

    /// Undo an `adjust_on_return` whose transaction record was never written.
    pub fn revert_return(
        &self,
        adjustment: &ReturnAdjustment,
        reference: TransactionId,
    ) -> LedgerResult<StockSnapshot> {
        let entity_id = adjustment.entity_id;
        let (snapshot, _) = self.mutate(
            entity_id,
            StockCommand::RevertReturn(RevertReturn {
                entity_id,
                returned_quantity: adjustment.returned_quantity,
                condition: adjustment.previous,
                reference,
                occurred_at: Utc::now(),
            }),
        )?;
        warn!(
            entity_id = %entity_id,
            transaction_id = %reference,
            returned_quantity = adjustment.returned_quantity,
            condition = %adjustment.previous,
            "return reverted"
        );
        Ok(snapshot)
    }

    pub fn get(&self, entity_id: EntityId) -> LedgerResult<StockSnapshot> {
        let slot = self.slot(entity_id)?;
        let entity = slot
            .lock()
            .map_err(|_| LedgerError::invariant(format!("entity {entity_id} lock poisoned")))?;
        Ok(StockSnapshot::from(&*entity))
    }

    /// Every entity, ordered by id (registration order).
    pub fn list(&self) -> LedgerResult<Vec<StockSnapshot>> {
        let slots: Vec<(EntityId, Arc<Mutex<StockEntity>>)> = {
            let entities = self
                .entities
                .read()
                .map_err(|_| LedgerError::invariant("stock ledger lock poisoned"))?;
            entities.iter().map(|(id, s)| (*id, s.clone())).collect()
        };

        let mut out = Vec::with_capacity(slots.len());
        for (entity_id, slot) in slots {
            let entity = slot
                .lock()
                .map_err(|_| LedgerError::invariant(format!("entity {entity_id} lock poisoned")))?;
            out.push(StockSnapshot::from(&*entity));
        }
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    /// Check `available + out == total` on every entity.
    pub fn verify_conservation(&self) -> LedgerResult<()> {
        let slots: Vec<Arc<Mutex<StockEntity>>> = {
            let entities = self
                .entities
                .read()
                .map_err(|_| LedgerError::invariant("stock ledger lock poisoned"))?;
            entities.values().cloned().collect()
        };
        for slot in slots {
            let entity = slot
                .lock()
                .map_err(|_| LedgerError::invariant("entity lock poisoned"))?;
            entity.check_conservation()?;
        }
        Ok(())
    }

    fn slot(&self, entity_id: EntityId) -> LedgerResult<Arc<Mutex<StockEntity>>> {
        let entities = self
            .entities
            .read()
            .map_err(|_| LedgerError::invariant("stock ledger lock poisoned"))?;
        entities
            .get(&entity_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("entity {entity_id}")))
    }

    /// Run one command against an entity under its lock; publish on success.
    fn mutate(
        &self,
        entity_id: EntityId,
        cmd: StockCommand,
    ) -> LedgerResult<(StockSnapshot, Vec<StockEvent>)> {
        let slot = self.slot(entity_id)?;
        let mut entity = slot
            .lock()
            .map_err(|_| LedgerError::invariant(format!("entity {entity_id} lock poisoned")))?;

        let events = match execute(&mut *entity, &cmd) {
            Ok(events) => events,
            Err(err) => {
                let err = LedgerError::from_stock(entity_id, err);
                warn!(entity_id = %entity_id, error = %err, "stock command rejected");
                return Err(err);
            }
        };

        // Published while still holding the lock so per-entity order is kept.
        self.publisher.publish(ENTITY_STREAM, &events);
        Ok((StockSnapshot::from(&*entity), events))
    }
}
