//! Checkout orchestration: validate, price, pick a payment path, persist.

mod confirm;
mod pricing;

pub use confirm::*;
pub use pricing::*;

use std::sync::Arc;

use rand::Rng;
use rand::distributions::Alphanumeric;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::db::OrderRepository;
use crate::error::CheckoutError;
use crate::models::{
    Cart, CouponBook, CryptoCurrency, Customer, NewOrder, Order, OrderLine, PaymentIntent,
    PaymentMethod, Totals,
};
use crate::payments::{HostedSessionRequest, IntentBuilder, PaymentGateway, SessionLineItem};
use crate::settlement::SettlementWatcher;
use crate::util::to_minor_units;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub cart: Cart,
    pub email: String,
    pub name: Option<String>,
    pub method: PaymentMethod,
    pub coupon_code: Option<String>,
}

/// What the customer has to do next.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentInstructions {
    Redirect { session_id: String, url: String },
    Crypto { intent: PaymentIntent },
}

#[derive(Debug, Clone)]
pub struct CheckoutResult {
    pub order: Order,
    pub payment: PaymentInstructions,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub tax_rate: Decimal,
    /// ISO currency for hosted card sessions
    pub currency: String,
    /// Hosted-session success URL; may contain the provider's session id placeholder
    pub success_url: String,
    pub cancel_url: String,
}

pub struct Checkout {
    repo: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    intents: IntentBuilder,
    watcher: Arc<SettlementWatcher>,
    coupons: CouponBook,
    settings: CheckoutSettings,
}

/// `ORD-<unix millis>-<4 random uppercase alphanumerics>`
pub fn generate_order_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(char::from)
        .collect();
    format!(
        "ORD-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        suffix.to_uppercase()
    )
}

impl Checkout {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        intents: IntentBuilder,
        watcher: Arc<SettlementWatcher>,
        coupons: CouponBook,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            repo,
            gateway,
            intents,
            watcher,
            coupons,
            settings,
        }
    }

    pub fn coupons(&self) -> &CouponBook {
        &self.coupons
    }

    /// Turn a cart into a pending order with payment instructions.
    ///
    /// Validation happens before any external call or write. A failed card
    /// session leaves nothing behind; a crypto order and its intent are stored together.
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutResult, CheckoutError> {
        let CheckoutRequest {
            mut cart,
            email,
            name,
            method,
            coupon_code,
        } = request;

        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let customer = Customer::new(&email, name.as_deref())?;
        if let Some(code) = coupon_code.as_deref().filter(|c| !c.trim().is_empty()) {
            cart.apply_coupon(code, &self.coupons)?;
        }

        let totals = price(&cart, self.settings.tax_rate);
        let order = NewOrder {
            order_number: generate_order_number(),
            lines: order_lines(&cart),
            totals,
            coupon_code: cart.coupon().map(|c| c.code.clone()),
            payment_method: method,
            customer_email: customer.email,
            customer_name: customer.name,
            payment_ref: None,
        };

        match method.crypto_currency() {
            None => self.checkout_card(order, &cart).await,
            Some(currency) => self.checkout_crypto(order, currency).await,
        }
    }

    async fn checkout_card(&self, mut order: NewOrder, cart: &Cart) -> Result<CheckoutResult, CheckoutError> {
        let amount = card_amount(&order.totals)?;
        let line_items = cart
            .lines()
            .iter()
            .map(|line| SessionLineItem {
                name: line.name.clone(),
                quantity: line.quantity,
            })
            .collect();

        let session = self
            .gateway
            .create_session(&HostedSessionRequest {
                order_number: order.order_number.clone(),
                line_items,
                amount,
                currency: self.settings.currency.clone(),
                customer_email: order.customer_email.clone(),
                success_url: self.settings.success_url.clone(),
                cancel_url: self.settings.cancel_url.clone(),
            })
            .await?;

        order.payment_ref = Some(session.id.clone());
        let stored = match self.repo.create_order(&order) {
            Ok(stored) => stored,
            Err(e) => {
                if let Err(expire_err) = self.gateway.expire_session(&session.id).await {
                    tracing::error!(
                        "Orphaned payment session {} for order {}: store failed ({}), expire failed ({})",
                        session.id,
                        order.order_number,
                        e,
                        expire_err
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            "Card checkout created: order={}, session={}, total={}",
            stored.order_number,
            session.id,
            stored.totals.total
        );

        Ok(CheckoutResult {
            order: stored,
            payment: PaymentInstructions::Redirect {
                session_id: session.id,
                url: session.url,
            },
        })
    }

    async fn checkout_crypto(
        &self,
        mut order: NewOrder,
        currency: CryptoCurrency,
    ) -> Result<CheckoutResult, CheckoutError> {
        let now = chrono::Utc::now().timestamp();
        let intent = self.intents.build(order.totals.total, currency, now).await?;

        order.payment_ref = Some(intent.id.clone());
        let stored = self.repo.create_order_with_intent(&order, &intent)?;

        tracing::info!(
            "Crypto checkout created: order={}, intent={}, amount={} {}, expires_at={}",
            stored.order_number,
            intent.id,
            intent.crypto_amount,
            currency.as_ref(),
            intent.expires_at
        );

        self.watcher.spawn(stored.id.clone(), intent.clone());

        Ok(CheckoutResult {
            order: stored,
            payment: PaymentInstructions::Crypto { intent },
        })
    }
}

fn card_amount(totals: &Totals) -> Result<i64, CheckoutError> {
    if totals.total <= Decimal::ZERO {
        return Err(CheckoutError::InvalidAmount);
    }
    to_minor_units(totals.total).ok_or(CheckoutError::InvalidAmount)
}

fn order_lines(cart: &Cart) -> Vec<OrderLine> {
    cart.lines()
        .iter()
        .map(|line| OrderLine {
            product_id: line.product_id.clone(),
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total(),
            options: line.options.clone(),
        })
        .collect()
}
