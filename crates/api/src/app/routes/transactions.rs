use std::sync::Arc;

use axum::{
    extract::{
        Extension, Path, Query,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use iequip_core::{AggregateRoot, TransactionId};
use iequip_infra::{LedgerResult, TransactionQuery};
use iequip_inventory::Category;
use iequip_lending::Transaction;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::ActorContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_borrow).get(search_transactions))
        .route("/return", post(return_borrow))
        .route("/record/:id", get(get_transaction))
        // The single segment is a category on GET and a transaction id on DELETE.
        .route("/:id", get(by_category).delete(delete_transaction))
        .route("/:id/cancel", post(cancel_borrow))
}

pub fn supply_router() -> Router {
    Router::new().route("/", post(create_distribution))
}

/// Render an engine result as the transaction's view.
fn respond(
    services: &AppServices,
    status: StatusCode,
    result: LedgerResult<Transaction>,
) -> axum::response::Response {
    match result.and_then(|tx| services.query.project(&tx)) {
        Ok(view) => (status, Json(view)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn create_borrow(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::CreateBorrowRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let result = services
        .engine
        .create_borrow(body.into_request(actor.actor()));
    respond(&services, StatusCode::CREATED, result)
}

pub async fn return_borrow(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::ReturnBorrowRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let result = services.engine.return_borrow(body.into_request());
    respond(&services, StatusCode::OK, result)
}

pub async fn cancel_borrow(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    params: Result<Query<dto::CancelParams>, QueryRejection>,
) -> axum::response::Response {
    let transaction_id = match errors::parse::<TransactionId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let params = match errors::query_params(params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let result = services.engine.cancel_borrow(transaction_id, params.reason);
    respond(&services, StatusCode::OK, result)
}

pub async fn create_distribution(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
    body: Result<Json<dto::CreateDistributionRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let result = services
        .engine
        .create_distribution(body.into_request(actor.actor()));
    respond(&services, StatusCode::CREATED, result)
}

pub async fn delete_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transaction_id = match errors::parse::<TransactionId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.engine.delete_transaction(transaction_id) {
        Ok(deleted) => Json(serde_json::json!({
            "id": deleted.id_typed().to_string(),
            "deleted": true,
            "version": deleted.version(),
        }))
        .into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let transaction_id = match errors::parse::<TransactionId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.query.get(transaction_id) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn by_category(
    Extension(services): Extension<Arc<AppServices>>,
    Path(category): Path<String>,
) -> axum::response::Response {
    let category = match errors::parse::<Category>(&category) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    match services.query.by_category(category) {
        Ok(views) => Json(views).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn search_transactions(
    Extension(services): Extension<Arc<AppServices>>,
    params: Result<Query<dto::TransactionListParams>, QueryRejection>,
) -> axum::response::Response {
    let params = match errors::query_params(params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let query = match to_query(params) {
        Ok(q) => q,
        Err(resp) => return resp,
    };

    match services.query.search(&query) {
        Ok(page) => Json(page).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

fn to_query(params: dto::TransactionListParams) -> Result<TransactionQuery, axum::response::Response> {
    let mut query = TransactionQuery {
        recipient: params.recipient,
        cursor: params.cursor,
        ..TransactionQuery::default()
    };
    if let Some(raw) = params.status.as_deref() {
        query.status = Some(errors::parse(raw)?);
    }
    if let Some(raw) = params.category.as_deref() {
        query.category = Some(errors::parse(raw)?);
    }
    if let Some(raw) = params.sort.as_deref() {
        query.sort = errors::parse(raw)?;
    }
    if let Some(raw) = params.direction.as_deref() {
        query.direction = errors::parse(raw)?;
    }
    if let Some(raw) = params.limit.as_deref() {
        let limit = raw
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|&limit| limit > 0)
            .ok_or_else(|| {
                errors::json_error(
                    StatusCode::BAD_REQUEST,
                    "validation_error",
                    format!("limit must be a positive integer (got '{raw}')"),
                )
            })?;
        query.limit = Some(limit);
    }
    Ok(query)
}
