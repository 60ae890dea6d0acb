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

use iequip_core::{EntityId, ExpectedVersion};
use iequip_inventory::Category;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_good).get(list_goods))
        .route("/:id", get(get_good).put(update_good))
        .route("/:id/restock", post(restock_good))
        .route("/:id/conditions", get(condition_history))
}

pub async fn create_good(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateGoodRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match services.ledger.register(body.into_new_entity()) {
        Ok(snapshot) => (StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn list_goods(
    Extension(services): Extension<Arc<AppServices>>,
    params: Result<Query<dto::GoodsListParams>, QueryRejection>,
) -> axum::response::Response {
    let params = match errors::query_params(params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let listed = match params.category.as_deref() {
        Some(raw) => match errors::parse::<Category>(raw) {
            Ok(category) => services.query.entities_by_category(category),
            Err(resp) => return resp,
        },
        None => services.ledger.list(),
    };

    match listed {
        Ok(goods) => Json(goods).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_good(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let entity_id = match errors::parse::<EntityId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.ledger.get(entity_id) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn update_good(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateGoodRequest>, JsonRejection>,
) -> axum::response::Response {
    let entity_id = match errors::parse::<EntityId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    let expected = ExpectedVersion::from(body.expected_version);
    match services
        .ledger
        .update_details(entity_id, expected, body.into_change())
    {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn restock_good(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::RestockRequest>, JsonRejection>,
) -> axum::response::Response {
    let entity_id = match errors::parse::<EntityId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let body = match errors::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match services.ledger.restock(entity_id, body.quantity) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// Audited condition history of one item, oldest first.
pub async fn condition_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let entity_id = match errors::parse::<EntityId>(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    if let Err(e) = services.ledger.get(entity_id) {
        return errors::ledger_error_to_response(e);
    }

    match services.tracker.for_entity(entity_id) {
        Ok(records) => Json(records).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
