use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::CheckoutError;
use crate::models::{CryptoCurrency, OptionSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    /// Paid and picked up by the merchant for delivery
    Processing,
    /// Paid
    Completed,
    /// Delivered to the customer
    Fulfilled,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum PaymentMethod {
    Card,
    Bitcoin,
    Litecoin,
}

impl PaymentMethod {
    /// Settlement currency for crypto methods, `None` for card.
    pub fn crypto_currency(&self) -> Option<CryptoCurrency> {
        match self {
            PaymentMethod::Card => None,
            PaymentMethod::Bitcoin => Some(CryptoCurrency::Btc),
            PaymentMethod::Litecoin => Some(CryptoCurrency::Ltc),
        }
    }

    pub fn parse(s: &str) -> Result<Self, CheckoutError> {
        match s.trim().to_lowercase().as_str() {
            "card" | "stripe" => Ok(PaymentMethod::Card),
            "bitcoin" | "btc" => Ok(PaymentMethod::Bitcoin),
            "litecoin" | "ltc" => Ok(PaymentMethod::Litecoin),
            other => Err(CheckoutError::UnsupportedCurrency(other.to_string())),
        }
    }
}

impl From<CryptoCurrency> for PaymentMethod {
    fn from(currency: CryptoCurrency) -> Self {
        match currency {
            CryptoCurrency::Btc => PaymentMethod::Bitcoin,
            CryptoCurrency::Ltc => PaymentMethod::Litecoin,
        }
    }
}

/// Money breakdown of an order. `total = subtotal - discount + tax`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    #[serde(default, skip_serializing_if = "OptionSelection::is_empty")]
    pub options: OptionSelection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub lines: Vec<OrderLine>,
    #[serde(flatten)]
    pub totals: Totals,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub customer_email: String,
    pub customer_name: Option<String>,
    /// Hosted session id (card) or payment intent id (crypto)
    pub payment_ref: Option<String>,
    /// Provider event or txid that confirmed the payment
    pub confirmation_ref: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Order {
    pub fn is_settled(&self) -> bool {
        self.payment_status == PaymentStatus::Confirmed
    }
}

/// Input for persisting a new order. Totals are fixed here and never recomputed.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub lines: Vec<OrderLine>,
    pub totals: Totals,
    pub coupon_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub payment_ref: Option<String>,
}

pub const DEFAULT_ORDER_LIST_LIMIT: u32 = 50;

/// Merchant-side order listing filter. Newest orders first.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub limit: Option<u32>,
}

impl OrderFilter {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_ORDER_LIST_LIMIT).clamp(1, 1000)
    }
}
