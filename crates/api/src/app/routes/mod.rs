use axum::{routing::get, Router};

pub mod goods;
pub mod reports;
pub mod system;
pub mod transactions;

/// Router for every endpoint that needs an acting user.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/goods", goods::router())
        .nest("/transactions", transactions::router())
        .nest("/supply-transactions", transactions::supply_router())
        .nest("/reports", reports::router())
}
