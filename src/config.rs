use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::models::CryptoCurrency;

const DEFAULT_BTC_ADDRESS: &str = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh";
const DEFAULT_LTC_ADDRESS: &str = "LMaT7yYC7MZXG1HQgHgKzShy5n9vJ9q";

/// Per-currency settlement settings.
#[derive(Debug, Clone)]
pub struct CryptoConfig {
    pub address: String,
    /// Fiat per unit, used by the static rate source
    pub rate: Decimal,
    /// Esplora-compatible indexer base URL
    pub indexer_url: String,
    pub min_confirmations: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Where customers land after paying (order number and status appended)
    pub success_page_url: String,
    /// Where customers return when they cancel a hosted payment
    pub cart_page_url: String,
    pub dev_mode: bool,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub stripe_currency: String,
    /// Flat tax applied to the discounted subtotal
    pub tax_rate: Decimal,
    pub btc: CryptoConfig,
    pub ltc: CryptoConfig,
    /// Accepted underpayment, in basis points of the quoted amount
    pub payment_tolerance_bps: u32,
    /// How far a block timestamp may trail the intent's creation and still count
    pub block_time_skew_seconds: i64,
    pub intent_ttl_seconds: i64,
    /// Wait before the first chain lookup for a new intent
    pub watcher_observation_delay_seconds: u64,
    pub watcher_poll_interval_seconds: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("DIGISTORE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env_or("PORT", 3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let btc = CryptoConfig {
            address: env::var("BTC_ADDRESS").unwrap_or_else(|_| DEFAULT_BTC_ADDRESS.to_string()),
            rate: env_or("BTC_RATE", Decimal::from(43250)),
            indexer_url: env::var("BTC_INDEXER_URL")
                .unwrap_or_else(|_| "https://blockstream.info/api".to_string()),
            min_confirmations: env_or("BTC_MIN_CONFIRMATIONS", 2),
        };

        let ltc = CryptoConfig {
            address: env::var("LTC_ADDRESS").unwrap_or_else(|_| DEFAULT_LTC_ADDRESS.to_string()),
            rate: env_or("LTC_RATE", Decimal::new(725, 1)),
            indexer_url: env::var("LTC_INDEXER_URL")
                .unwrap_or_else(|_| "https://litecoinspace.org/api".to_string()),
            min_confirmations: env_or("LTC_MIN_CONFIRMATIONS", 6),
        };

        Self {
            success_page_url: env::var("SUCCESS_PAGE_URL")
                .unwrap_or_else(|_| format!("{}/success", base_url)),
            cart_page_url: env::var("CART_PAGE_URL")
                .unwrap_or_else(|_| format!("{}/cart", base_url)),
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "digistore.db".to_string()),
            base_url,
            dev_mode,
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok().filter(|s| !s.is_empty()),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            stripe_currency: env::var("STRIPE_CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            tax_rate: env_or("TAX_RATE", Decimal::new(8, 2)),
            btc,
            ltc,
            payment_tolerance_bps: env_or("PAYMENT_TOLERANCE_BPS", 50),
            block_time_skew_seconds: env_or("BLOCK_TIME_SKEW_SECONDS", 7200),
            intent_ttl_seconds: env_or("INTENT_TTL_SECONDS", 900),
            watcher_observation_delay_seconds: env_or("WATCHER_OBSERVATION_DELAY_SECONDS", 5),
            watcher_poll_interval_seconds: env_or("WATCHER_POLL_INTERVAL_SECONDS", 30),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn crypto(&self, currency: CryptoCurrency) -> &CryptoConfig {
        match currency {
            CryptoCurrency::Btc => &self.btc,
            CryptoCurrency::Ltc => &self.ltc,
        }
    }
}
