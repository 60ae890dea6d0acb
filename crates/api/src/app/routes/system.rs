use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::app::services::AppServices;
use crate::context::ActorContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Echo the acting user and the event stream position.
pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<ActorContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "actor": actor.actor(),
        "last_event_sequence": services.publisher.last_sequence(),
        "condition_audit": services.tracker.is_enabled(),
    }))
}
