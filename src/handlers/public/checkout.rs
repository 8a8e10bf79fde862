use axum::{extract::State, http::StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::checkout::{CheckoutRequest, PaymentInstructions};
use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{Cart, OptionSelection, PaymentIntent, PaymentMethod, Product};

#[derive(Debug, Deserialize)]
pub struct CheckoutItem {
    /// Product id or slug
    pub product_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub options: OptionSelection,
}

#[derive(Debug, Deserialize)]
pub struct CustomerInput {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    #[serde(default)]
    pub items: Vec<CheckoutItem>,
    pub customer: CustomerInput,
    #[serde(default)]
    pub coupon_code: Option<String>,
    pub payment_method: String,
}

/// Crypto payment details as shown to the customer.
#[derive(Debug, Serialize)]
pub struct CryptoPaymentView {
    pub intent_id: String,
    pub currency: String,
    pub amount: Decimal,
    pub address: String,
    pub rate: Decimal,
    pub fiat_amount: Decimal,
    pub expires_at: i64,
    /// Computed server-side; client countdowns are advisory
    pub seconds_remaining: i64,
    pub payment_uri: String,
    pub state: String,
}

impl CryptoPaymentView {
    pub fn new(intent: &PaymentIntent, now: i64) -> Self {
        Self {
            intent_id: intent.id.clone(),
            currency: intent.currency.as_ref().to_string(),
            amount: intent.crypto_amount,
            address: intent.address.clone(),
            rate: intent.rate,
            fiat_amount: intent.fiat_amount,
            expires_at: intent.expires_at,
            seconds_remaining: intent.seconds_remaining(now),
            payment_uri: intent.payment_uri(),
            state: intent.state.as_ref().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentView {
    Redirect { session_id: String, url: String },
    Crypto(CryptoPaymentView),
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_number: String,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub payment: PaymentView,
}

/// Resolve requested items against the catalog. Prices always come from the server.
fn build_cart(state: &AppState, items: &[CheckoutItem]) -> Result<Cart> {
    let mut cart = Cart::new();
    for item in items {
        let product = find_product(state, &item.product_id)?;
        let unit_price = product.unit_price(&item.options).ok_or_else(|| {
            AppError::BadRequest(format!("Unknown option selected for {}", product.slug))
        })?;
        cart.add(&product.id, &product.name, unit_price, item.quantity, item.options.clone())?;
    }
    Ok(cart)
}

fn find_product(state: &AppState, id_or_slug: &str) -> Result<Product> {
    let product = match state.products.get_product(id_or_slug)? {
        Some(p) => Some(p),
        None => state.products.get_product_by_slug(id_or_slug)?,
    };
    product
        .filter(|p| p.active)
        .ok_or_else(|| AppError::NotFound(format!("Product not found: {}", id_or_slug)))
}

pub async fn create_checkout(
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<CheckoutResponse>)> {
    let method = PaymentMethod::parse(&body.payment_method)?;
    let cart = build_cart(&state, &body.items)?;

    let result = state
        .checkout
        .checkout(CheckoutRequest {
            cart,
            email: body.customer.email,
            name: body.customer.name,
            method,
            coupon_code: body.coupon_code,
        })
        .await?;

    let now = chrono::Utc::now().timestamp();
    let payment = match result.payment {
        PaymentInstructions::Redirect { session_id, url } => PaymentView::Redirect { session_id, url },
        PaymentInstructions::Crypto { intent } => PaymentView::Crypto(CryptoPaymentView::new(&intent, now)),
    };

    let order = result.order;
    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_number: order.order_number,
            subtotal: order.totals.subtotal,
            discount: order.totals.discount,
            tax: order.totals.tax,
            total: order.totals.total,
            coupon_code: order.coupon_code,
            payment,
        }),
    ))
}
