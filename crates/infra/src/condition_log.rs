//! Condition audit trail.
//!
//! The stored condition of an item is always just the latest returned one
//! (see `iequip_inventory::resolve_condition`). When auditing is enabled, every
//! return also appends a record here; records are never edited or removed.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use iequip_core::{EntityId, TransactionId};
use iequip_inventory::Condition;

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionRecord {
    pub transaction_id: TransactionId,
    pub entity_id: EntityId,
    pub previous: Condition,
    pub returned: Condition,
    pub stored: Condition,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ConditionTracker {
    enabled: bool,
    log: RwLock<Vec<ConditionRecord>>,
}

impl ConditionTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            log: RwLock::new(Vec::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append a record; a no-op when auditing is disabled.
    pub fn record(&self, record: ConditionRecord) -> LedgerResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut log = self
            .log
            .write()
            .map_err(|_| LedgerError::invariant("condition log lock poisoned"))?;
        log.push(record);
        Ok(())
    }

    pub fn for_transaction(&self, transaction_id: TransactionId) -> LedgerResult<Vec<ConditionRecord>> {
        self.filtered(|r| r.transaction_id == transaction_id)
    }

    /// Condition history of one entity, oldest first.
    pub fn for_entity(&self, entity_id: EntityId) -> LedgerResult<Vec<ConditionRecord>> {
        self.filtered(|r| r.entity_id == entity_id)
    }

    pub fn len(&self) -> usize {
        self.log.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn poison(&self) {
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _log = self.log.write();
                    panic!("poisoning the condition log");
                })
                .join();
        });
    }

    fn filtered(&self, keep: impl Fn(&ConditionRecord) -> bool) -> LedgerResult<Vec<ConditionRecord>> {
        let log = self
            .log
            .read()
            .map_err(|_| LedgerError::invariant("condition log lock poisoned"))?;
        Ok(log.iter().filter(|r| keep(r)).cloned().collect())
    }
}
