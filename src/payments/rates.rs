use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::CheckoutError;
use crate::models::CryptoCurrency;

/// Fiat-per-unit conversion rates for settlement currencies.
///
/// Kept behind a trait so a live feed can replace the static table.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Always positive; `UnsupportedCurrency` if no rate is known.
    async fn rate(&self, currency: CryptoCurrency) -> Result<Decimal, CheckoutError>;
}

/// Fixed rates from configuration.
#[derive(Debug, Clone)]
pub struct StaticRateSource {
    rates: HashMap<CryptoCurrency, Decimal>,
}

impl StaticRateSource {
    /// Non-positive rates are rejected.
    pub fn new(rates: impl IntoIterator<Item = (CryptoCurrency, Decimal)>) -> Result<Self, CheckoutError> {
        let rates: HashMap<_, _> = rates.into_iter().collect();
        if rates.values().any(|r| *r <= Decimal::ZERO) {
            return Err(CheckoutError::InvalidAmount);
        }
        Ok(Self { rates })
    }
}

#[async_trait]
impl RateSource for StaticRateSource {
    async fn rate(&self, currency: CryptoCurrency) -> Result<Decimal, CheckoutError> {
        self.rates
            .get(&currency)
            .copied()
            .ok_or_else(|| CheckoutError::UnsupportedCurrency(currency.as_ref().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_static_rates() {
        let source =
            StaticRateSource::new([(CryptoCurrency::Btc, dec!(43250)), (CryptoCurrency::Ltc, dec!(72.5))])
                .unwrap();
        assert_eq!(source.rate(CryptoCurrency::Btc).await.unwrap(), dec!(43250));
        assert_eq!(source.rate(CryptoCurrency::Ltc).await.unwrap(), dec!(72.5));
    }

    #[tokio::test]
    async fn test_missing_rate_is_unsupported() {
        let source = StaticRateSource::new([(CryptoCurrency::Btc, dec!(43250))]).unwrap();
        assert!(matches!(
            source.rate(CryptoCurrency::Ltc).await,
            Err(CheckoutError::UnsupportedCurrency(c)) if c == "LTC"
        ));
    }

    #[test]
    fn test_non_positive_rate_rejected() {
        assert!(StaticRateSource::new([(CryptoCurrency::Btc, dec!(0))]).is_err());
    }

    #[test]
    fn test_currency_parsing() {
        assert_eq!(CryptoCurrency::parse("btc").unwrap(), CryptoCurrency::Btc);
        assert_eq!(CryptoCurrency::parse(" LTC ").unwrap(), CryptoCurrency::Ltc);
        assert!(matches!(
            CryptoCurrency::parse("ETH"),
            Err(CheckoutError::UnsupportedCurrency(c)) if c == "ETH"
        ));
    }
}
