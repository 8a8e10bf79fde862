use axum::{extract::State, response::Redirect};
use serde::Deserialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Query;
use crate::util::append_query_params;

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub session_id: String,
}

/// Return point from the hosted card checkout.
///
/// Confirmation itself arrives via webhook, so the order may still be pending
/// here. The customer is sent on to the success page with the order number and
/// `status=success` or `status=pending`.
pub async fn checkout_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> Result<Redirect> {
    let order = state
        .orders
        .get_order_by_payment_ref(&query.session_id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    let status = if order.is_settled() { "success" } else { "pending" };
    let redirect_url = append_query_params(
        &state.success_page_url,
        &[("order", &order.order_number), ("status", status)],
    );
    Ok(Redirect::temporary(&redirect_url))
}
