pub mod public;
pub mod webhooks;

use axum::Router;

use crate::db::AppState;

/// All HTTP routes with state applied.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .merge(webhooks::router())
        .with_state(state)
}
