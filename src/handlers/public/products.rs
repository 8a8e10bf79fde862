use axum::extract::{Path, State};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::Product;

pub async fn list_products(State(state): State<AppState>) -> Result<Json<Vec<Product>>> {
    Ok(Json(state.products.list_products()?))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Product>> {
    state
        .products
        .get_product_by_slug(&slug)?
        .filter(|p| p.active)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Product not found".into()))
}
