/// Acting user of a request, taken from the `x-actor` header.
///
/// The value is opaque to the ledger; it is only recorded as the default
/// `tested_by` / `released_by` of new transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: String,
}

impl ActorContext {
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }
}
