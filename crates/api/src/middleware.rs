use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::context::ActorContext;

pub const ACTOR_HEADER: &str = "x-actor";

/// Rejects requests without an acting user and exposes it to handlers.
pub async fn actor_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let actor = extract_actor(req.headers())?;
    req.extensions_mut().insert(ActorContext::new(actor));
    Ok(next.run(req).await)
}

fn extract_actor(headers: &HeaderMap) -> Result<String, StatusCode> {
    let header = headers.get(ACTOR_HEADER).ok_or(StatusCode::UNAUTHORIZED)?;
    let actor = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?.trim();
    if actor.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(actor.to_string())
}
