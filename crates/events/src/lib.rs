//! Domain event mechanics for the lending ledger.
//!
//! Ledger components emit typed events describing committed mutations; the
//! events are wrapped in envelopes and fanned out on an [`EventBus`] to
//! downstream consumers (reporting, export, audit).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{BusError, EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::InMemoryEventBus;
