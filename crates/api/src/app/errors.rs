use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use iequip_infra::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        LedgerError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        LedgerError::InsufficientStock {
            entity_id,
            requested,
            available,
        } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "insufficient_stock",
                "message": format!("requested {requested}, only {available} available"),
                "entity_id": entity_id.map(|id| id.to_string()),
                "requested": requested,
                "available": available,
            })),
        )
            .into_response(),
        LedgerError::InvalidQuantity(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invalid_quantity", msg)
        }
        LedgerError::AlreadyReturned(msg) => json_error(StatusCode::CONFLICT, "already_returned", msg),
        LedgerError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        LedgerError::PartialStockFailure { entity_id, source } => (
            StatusCode::CONFLICT,
            axum::Json(json!({
                "error": "partial_stock_failure",
                "message": format!("stock operation failed on entity {entity_id}: {source}"),
                "entity_id": entity_id.to_string(),
                "cause": source.code(),
            })),
        )
            .into_response(),
        e @ (LedgerError::InvariantViolation(_) | LedgerError::Store(_)) => {
            tracing::error!(error = %e, code = e.code(), "internal ledger failure");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                e.code(),
                "internal error; the operation was not applied",
            )
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Unwrap a JSON body, answering malformed input with `validation_error`.
pub fn json_body<T>(
    body: Result<axum::Json<T>, JsonRejection>,
) -> Result<T, axum::response::Response> {
    body.map(|axum::Json(inner)| inner)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.body_text()))
}

pub fn query_params<T>(
    params: Result<axum::extract::Query<T>, QueryRejection>,
) -> Result<T, axum::response::Response> {
    params
        .map(|axum::extract::Query(inner)| inner)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, "validation_error", e.body_text()))
}

/// Parse a path/query value, answering failures with `validation_error`.
pub fn parse<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: core::str::FromStr,
    T::Err: Into<LedgerError>,
{
    raw.parse::<T>()
        .map_err(|e| ledger_error_to_response(e.into()))
}
