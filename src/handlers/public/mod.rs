mod checkout;
mod orders;
mod products;
mod success;

pub use checkout::*;
pub use orders::*;
pub use products::*;
pub use success::*;

use axum::{Json, Router, routing::{get, post}};
use serde::Serialize;

use crate::db::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/products", get(list_products))
        .route("/products/{slug}", get(get_product))
        .route("/checkout", post(create_checkout))
        .route("/checkout/success", get(checkout_success))
        .route("/orders/{order_number}", get(get_order))
}
