//! Wiring of the ledger components behind the HTTP handlers.

use std::sync::Arc;

use iequip_events::InMemoryEventBus;
use iequip_infra::{
    ConditionTracker, EventPublisher, InMemoryTransactionStore, JsonEnvelope, QueryFacade,
    StockLedger, TransactionEngine,
};

use crate::config::ApiConfig;

pub type Store = Arc<InMemoryTransactionStore>;

/// Shared application services (one instance per process).
pub struct AppServices {
    pub ledger: Arc<StockLedger>,
    pub engine: TransactionEngine<Store>,
    pub query: QueryFacade<Store>,
    pub tracker: Arc<ConditionTracker>,
    pub publisher: Arc<EventPublisher>,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("ledger", &self.ledger)
            .field("tracker", &self.tracker)
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

pub fn build_services(config: &ApiConfig) -> AppServices {
    let bus = Arc::new(InMemoryEventBus::<JsonEnvelope>::new());
    let publisher = Arc::new(EventPublisher::new(bus));
    let ledger = Arc::new(StockLedger::new(publisher.clone()));
    let store: Store = Arc::new(InMemoryTransactionStore::new());
    let tracker = Arc::new(ConditionTracker::new(config.audit_conditions));

    let engine = TransactionEngine::new(
        ledger.clone(),
        store.clone(),
        tracker.clone(),
        publisher.clone(),
    );
    let query = QueryFacade::new(store, ledger.clone())
        .with_page_sizes(config.default_page_size, config.max_page_size);

    tracing::info!(
        audit_conditions = config.audit_conditions,
        default_page_size = config.default_page_size,
        max_page_size = config.max_page_size,
        "ledger services ready"
    );

    AppServices {
        ledger,
        engine,
        query,
        tracker,
        publisher,
    }
}
