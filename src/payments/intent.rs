use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::models::{CryptoCurrency, IntentState, PaymentIntent};

use super::RateSource;

/// Satoshi-level precision.
pub const CRYPTO_DECIMALS: u32 = 8;

pub const DEFAULT_INTENT_TTL_SECONDS: i64 = 900;

/// Quotes crypto payment intents against a rate source.
#[derive(Clone)]
pub struct IntentBuilder {
    rates: Arc<dyn RateSource>,
    addresses: HashMap<CryptoCurrency, String>,
    ttl_seconds: i64,
}

impl IntentBuilder {
    pub fn new(rates: Arc<dyn RateSource>, addresses: HashMap<CryptoCurrency, String>) -> Self {
        Self {
            rates,
            addresses,
            ttl_seconds: DEFAULT_INTENT_TTL_SECONDS,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Quote `fiat_amount` in `currency` at the current rate.
    ///
    /// The crypto amount is rounded half-up to 8 decimals and never re-priced
    /// afterwards. Every intent for a currency shares that currency's static address.
    pub async fn build(
        &self,
        fiat_amount: Decimal,
        currency: CryptoCurrency,
        now: i64,
    ) -> Result<PaymentIntent, CheckoutError> {
        if fiat_amount <= Decimal::ZERO {
            return Err(CheckoutError::InvalidAmount);
        }

        let address = self
            .addresses
            .get(&currency)
            .cloned()
            .ok_or_else(|| CheckoutError::UnsupportedCurrency(currency.as_ref().to_string()))?;

        let rate = self.rates.rate(currency).await?;
        if rate <= Decimal::ZERO {
            return Err(CheckoutError::UpstreamPaymentError(format!(
                "Rate source returned non-positive rate for {}",
                currency.as_ref()
            )));
        }

        let crypto_amount = (fiat_amount / rate)
            .round_dp_with_strategy(CRYPTO_DECIMALS, RoundingStrategy::MidpointAwayFromZero);

        Ok(PaymentIntent {
            id: Uuid::new_v4().to_string(),
            currency,
            fiat_amount,
            rate,
            crypto_amount,
            address,
            created_at: now,
            expires_at: now + self.ttl_seconds,
            state: IntentState::AwaitingPayment,
            txid: None,
            received_amount: None,
        })
    }
}
