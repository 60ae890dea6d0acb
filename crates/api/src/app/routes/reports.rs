//! Read-only reports consumed by export.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, rejection::QueryRejection},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use iequip_core::TransactionId;
use iequip_infra::LedgerError;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/stock-summary", get(stock_summary))
        .route("/overdue", get(overdue))
        .route("/conditions/:id", get(transaction_conditions))
}

pub async fn stock_summary(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.query.stock_summary() {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Open borrows past their end date; `as_of` defaults to today (UTC).
pub async fn overdue(
    Extension(services): Extension<Arc<AppServices>>,
    params: Result<Query<dto::OverdueParams>, QueryRejection>,
) -> axum::response::Response {
    let params = match errors::query_params(params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let as_of = params.as_of.unwrap_or_else(|| Utc::now().date_naive());

    match services.query.overdue(as_of) {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn transaction_conditions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transaction_id = match errors::parse::<TransactionId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    let records = match services.tracker.for_transaction(transaction_id) {
        Ok(r) => r,
        Err(e) => return errors::ledger_error_to_response(e),
    };
    // Records outlive deleted transactions; only an unknown id with no history is missing.
    if records.is_empty() {
        if let Err(e @ LedgerError::NotFound(_)) = services.query.get(transaction_id) {
            return errors::ledger_error_to_response(e);
        }
    }

    Json(records).into_response()
}
