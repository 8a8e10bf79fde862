use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::error::CheckoutError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum CryptoCurrency {
    Btc,
    Ltc,
}

impl CryptoCurrency {
    pub fn parse(s: &str) -> Result<Self, CheckoutError> {
        match s.trim().to_uppercase().as_str() {
            "BTC" => Ok(CryptoCurrency::Btc),
            "LTC" => Ok(CryptoCurrency::Ltc),
            _ => Err(CheckoutError::UnsupportedCurrency(s.trim().to_string())),
        }
    }

    /// BIP21-style URI scheme.
    pub fn uri_scheme(&self) -> &'static str {
        match self {
            CryptoCurrency::Btc => "bitcoin",
            CryptoCurrency::Ltc => "litecoin",
        }
    }
}

/// Lifecycle of an intent: AwaitingPayment → Verifying → {Confirmed, Expired, Mismatch}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntentState {
    AwaitingPayment,
    Verifying,
    Confirmed,
    Expired,
    Mismatch,
}

impl IntentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentState::Confirmed | IntentState::Expired | IntentState::Mismatch
        )
    }
}

/// A quoted, time-bounded instruction: pay `crypto_amount` to `address` before `expires_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub currency: CryptoCurrency,
    pub fiat_amount: Decimal,
    /// Fiat per unit of `currency` at quote time
    pub rate: Decimal,
    /// Fixed at creation; later rate moves don't re-price it
    pub crypto_amount: Decimal,
    pub address: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub state: IntentState,
    pub txid: Option<String>,
    pub received_amount: Option<Decimal>,
}

impl PaymentIntent {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.expires_at
    }

    pub fn seconds_remaining(&self, now: i64) -> i64 {
        (self.expires_at - now).max(0)
    }

    pub fn payment_uri(&self) -> String {
        format!(
            "{}:{}?amount={}",
            self.currency.uri_scheme(),
            self.address,
            self.crypto_amount.normalize()
        )
    }
}
