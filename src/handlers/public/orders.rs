use axum::extract::{Path, State};
use serde::Serialize;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{Order, OrderLine, OrderStatus, PaymentMethod, PaymentStatus, Totals};

use super::CryptoPaymentView;

/// Public view of an order. Order numbers are guessable, so customer
/// details and provider references stay out of it.
#[derive(Debug, Serialize)]
pub struct OrderSummary {
    pub order_number: String,
    pub lines: Vec<OrderLine>,
    #[serde(flatten)]
    pub totals: Totals,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_payment: Option<CryptoPaymentView>,
}

impl OrderSummary {
    fn new(order: Order, crypto_payment: Option<CryptoPaymentView>) -> Self {
        Self {
            order_number: order.order_number,
            lines: order.lines,
            totals: order.totals,
            coupon_code: order.coupon_code,
            status: order.status,
            payment_status: order.payment_status,
            payment_method: order.payment_method,
            created_at: order.created_at,
            updated_at: order.updated_at,
            crypto_payment,
        }
    }
}

/// Order status lookup by order number. Crypto orders include their intent.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderSummary>> {
    let order = state
        .orders
        .get_order_by_number(&order_number)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    let crypto_payment = match order.payment_method.crypto_currency() {
        Some(_) => state
            .orders
            .get_intent_for_order(&order.id)?
            .map(|intent| CryptoPaymentView::new(&intent, chrono::Utc::now().timestamp())),
        None => None,
    };

    Ok(Json(OrderSummary::new(order, crypto_payment)))
}
