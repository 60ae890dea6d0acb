//! Read side: filtered, sorted and paginated views over transactions and
//! stock, consumed by reporting and export.
//!
//! Nothing here mutates. Pagination uses an opaque cursor (URL-safe base64
//! of `{field, key, id}` for the last row served), so pages stay stable as
//! history grows.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use iequip_core::{AggregateRoot, EntityId, TransactionId};
use iequip_inventory::Category;
use iequip_lending::{Recipient, Transaction, TransactionKind, TransactionStatus};

use crate::error::{LedgerError, LedgerResult};
use crate::stock_ledger::{StockLedger, StockSnapshot};
use crate::transaction_store::TransactionStore;

pub const DEFAULT_PAGE_SIZE: usize = 25;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    StartDate,
    EndDate,
    Recipient,
    Status,
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            SortField::StartDate => "start_date",
            SortField::EndDate => "end_date",
            SortField::Recipient => "recipient",
            SortField::Status => "status",
        }
    }

    /// Sort key for one transaction; compared as plain strings.
    fn key(self, transaction: &Transaction) -> String {
        match self {
            SortField::StartDate => transaction
                .started_at()
                .to_rfc3339_opts(SecondsFormat::Micros, true),
            // Distributions have no end date and sort before every borrow.
            SortField::EndDate => transaction
                .borrow()
                .map(|b| b.end_date.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            SortField::Recipient => transaction.recipient().name.to_lowercase(),
            SortField::Status => transaction.status().as_str().to_string(),
        }
    }
}

impl FromStr for SortField {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start_date" | "startDate" => Ok(SortField::StartDate),
            "end_date" | "endDate" => Ok(SortField::EndDate),
            "recipient" | "name" => Ok(SortField::Recipient),
            "status" => Ok(SortField::Status),
            other => Err(LedgerError::validation(format!("unknown sort field '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(LedgerError::validation(format!(
                "sort direction must be asc or desc (got '{other}')"
            ))),
        }
    }
}

/// Filters, ordering and paging for [`QueryFacade::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionQuery {
    pub status: Option<TransactionStatus>,
    pub category: Option<Category>,
    /// Case-insensitive substring of recipient name or email.
    pub recipient: Option<String>,
    pub sort: SortField,
    pub direction: SortDirection,
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineView {
    pub entity_id: EntityId,
    pub quantity: u64,
    /// `None` when the entity is no longer known to the ledger.
    pub name: Option<String>,
    pub category: Option<Category>,
}

/// Transaction row as served to reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionView {
    pub id: TransactionId,
    pub status: TransactionStatus,
    pub recipient: Recipient,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub details: TransactionKind,
    /// Line items resolved against the catalogue.
    pub entities: Vec<LineView>,
    pub version: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category: Option<Category>,
    pub entities: usize,
    pub items: usize,
    pub supplies: usize,
    pub quantity_total: u64,
    pub quantity_available: u64,
    pub quantity_out: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Cursor {
    field: SortField,
    key: String,
    id: TransactionId,
}

impl Cursor {
    fn encode(&self) -> LedgerResult<String> {
        let raw = serde_json::to_vec(self)
            .map_err(|e| LedgerError::invariant(format!("cursor encoding failed: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    fn decode(token: &str) -> LedgerResult<Self> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| LedgerError::validation("malformed cursor"))?;
        serde_json::from_slice(&raw).map_err(|_| LedgerError::validation("malformed cursor"))
    }
}

pub struct QueryFacade<S> {
    store: S,
    ledger: Arc<StockLedger>,
    default_page_size: usize,
    max_page_size: usize,
}

impl<S> QueryFacade<S>
where
    S: TransactionStore,
{
    pub fn new(store: S, ledger: Arc<StockLedger>) -> Self {
        Self {
            store,
            ledger,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
        }
    }

    pub fn with_page_sizes(mut self, default_page_size: usize, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self.default_page_size = default_page_size.clamp(1, self.max_page_size);
        self
    }

    /// Transactions touching at least one entity of `category`, in id order.
    pub fn by_category(&self, category: Category) -> LedgerResult<Vec<TransactionView>> {
        let entities = self.entity_index()?;
        Ok(self
            .store
            .list()?
            .iter()
            .map(|t| view(t, &entities))
            .filter(|v| v.entities.iter().any(|l| l.category == Some(category)))
            .collect())
    }

    pub fn by_status(&self, status: TransactionStatus) -> LedgerResult<Vec<TransactionView>> {
        self.filtered(|t| t.status() == status)
    }

    pub fn by_recipient(&self, term: &str) -> LedgerResult<Vec<TransactionView>> {
        self.filtered(|t| t.recipient().matches(term))
    }

    /// Every transaction in the requested order; ties break on id.
    pub fn sort_by(
        &self,
        field: SortField,
        direction: SortDirection,
    ) -> LedgerResult<Vec<TransactionView>> {
        let entities = self.entity_index()?;
        Ok(sorted(self.store.list()?, field, direction)
            .into_iter()
            .map(|(_, t)| view(&t, &entities))
            .collect())
    }

    /// Filter, sort and page in one call.
    pub fn search(&self, query: &TransactionQuery) -> LedgerResult<Page<TransactionView>> {
        let limit = query
            .limit
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        let cursor = query.cursor.as_deref().map(Cursor::decode).transpose()?;
        if let Some(c) = &cursor {
            if c.field != query.sort {
                return Err(LedgerError::validation(format!(
                    "cursor was issued for sort '{}', not '{}'",
                    c.field.as_str(),
                    query.sort.as_str()
                )));
            }
        }

        let entities = self.entity_index()?;
        let term = query.recipient.as_deref().unwrap_or("");
        let candidates: Vec<Transaction> = self
            .store
            .list()?
            .into_iter()
            .filter(|t| query.status.is_none_or(|s| t.status() == s))
            .filter(|t| t.recipient().matches(term))
            .filter(|t| {
                query.category.is_none_or(|c| {
                    t.line_items()
                        .iter()
                        .any(|l| entities.get(&l.entity_id).map(|e| e.category) == Some(c))
                })
            })
            .collect();

        let rows = sorted(candidates, query.sort, query.direction).into_iter();
        let after: Vec<(String, Transaction)> = match &cursor {
            Some(c) => rows
                .skip_while(|(key, t)| {
                    let position = (key.as_str(), t.id_typed());
                    let mark = (c.key.as_str(), c.id);
                    match query.direction {
                        SortDirection::Asc => position <= mark,
                        SortDirection::Desc => position >= mark,
                    }
                })
                .collect(),
            None => rows.collect(),
        };

        let has_more = after.len() > limit;
        let page: Vec<(String, Transaction)> = after.into_iter().take(limit).collect();
        let next_cursor = match (has_more, page.last()) {
            (true, Some((key, t))) => Some(
                Cursor {
                    field: query.sort,
                    key: key.clone(),
                    id: t.id_typed(),
                }
                .encode()?,
            ),
            _ => None,
        };

        Ok(Page {
            items: page.iter().map(|(_, t)| view(t, &entities)).collect(),
            next_cursor,
        })
    }

    /// Open borrows whose expected return date is before `as_of`, most
    /// overdue first. Reporting only; nothing is flagged or blocked.
    pub fn overdue(&self, as_of: NaiveDate) -> LedgerResult<Vec<TransactionView>> {
        let mut rows = self.filtered(|t| t.is_overdue(as_of))?;
        rows.sort_by_key(|v| match &v.details {
            TransactionKind::Borrow(b) => (Some(b.end_date), v.id),
            TransactionKind::Distribution(_) => (None, v.id),
        });
        Ok(rows)
    }

    pub fn get(&self, id: TransactionId) -> LedgerResult<TransactionView> {
        let transaction = self
            .store
            .get(id)?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {id}")))?;
        Ok(view(&transaction, &self.entity_index()?))
    }

    /// Render a transaction that may no longer be stored (e.g. just deleted).
    pub fn project(&self, transaction: &Transaction) -> LedgerResult<TransactionView> {
        Ok(view(transaction, &self.entity_index()?))
    }

    /// Per-category stock totals plus a grand total (`category: None`) last.
    pub fn stock_summary(&self) -> LedgerResult<Vec<CategorySummary>> {
        let mut per_category: BTreeMap<Category, CategorySummary> = BTreeMap::new();
        let mut total = CategorySummary::default();

        for entity in self.ledger.list()? {
            let row = per_category
                .entry(entity.category)
                .or_insert_with(|| CategorySummary {
                    category: Some(entity.category),
                    ..CategorySummary::default()
                });
            for summary in [&mut *row, &mut total] {
                summary.entities += 1;
                if entity.kind.is_item() {
                    summary.items += 1;
                } else {
                    summary.supplies += 1;
                }
                summary.quantity_total += entity.quantity_total;
                summary.quantity_available += entity.quantity_available;
                summary.quantity_out += entity.quantity_out;
            }
        }

        let mut out: Vec<CategorySummary> = per_category.into_values().collect();
        out.push(total);
        Ok(out)
    }

    pub fn entities_by_category(&self, category: Category) -> LedgerResult<Vec<StockSnapshot>> {
        Ok(self
            .ledger
            .list()?
            .into_iter()
            .filter(|e| e.category == category)
            .collect())
    }

    fn filtered(&self, keep: impl Fn(&Transaction) -> bool) -> LedgerResult<Vec<TransactionView>> {
        let entities = self.entity_index()?;
        Ok(self
            .store
            .list()?
            .iter()
            .filter(|t| keep(t))
            .map(|t| view(t, &entities))
            .collect())
    }

    fn entity_index(&self) -> LedgerResult<BTreeMap<EntityId, StockSnapshot>> {
        Ok(self.ledger.list()?.into_iter().map(|e| (e.id, e)).collect())
    }
}

fn sorted(
    transactions: Vec<Transaction>,
    field: SortField,
    direction: SortDirection,
) -> Vec<(String, Transaction)> {
    let mut rows: Vec<(String, Transaction)> = transactions
        .into_iter()
        .map(|t| (field.key(&t), t))
        .collect();
    rows.sort_by(|(ka, a), (kb, b)| ka.cmp(kb).then(a.id_typed().cmp(&b.id_typed())));
    if direction == SortDirection::Desc {
        rows.reverse();
    }
    rows
}

fn view(transaction: &Transaction, entities: &BTreeMap<EntityId, StockSnapshot>) -> TransactionView {
    TransactionView {
        id: transaction.id_typed(),
        status: transaction.status(),
        recipient: transaction.recipient().clone(),
        started_at: transaction.started_at(),
        details: transaction.kind().clone(),
        entities: transaction
            .line_items()
            .into_iter()
            .map(|l| {
                let entity = entities.get(&l.entity_id);
                LineView {
                    entity_id: l.entity_id,
                    quantity: l.quantity,
                    name: entity.map(|e| e.name.clone()),
                    category: entity.map(|e| e.category),
                }
            })
            .collect(),
        version: transaction.version(),
    }
}
