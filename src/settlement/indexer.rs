use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::CheckoutError;
use crate::models::CryptoCurrency;

/// One transaction paying into a watched address.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub txid: String,
    /// Total received by the watched address in this transaction
    pub amount: Decimal,
    pub confirmations: u32,
    /// Block time for mined transactions, lookup time for mempool ones
    pub first_seen_at: i64,
}

/// Read access to address activity on a chain.
#[async_trait]
pub trait ChainIndexer: Send + Sync {
    async fn address_activity(
        &self,
        currency: CryptoCurrency,
        address: &str,
    ) -> Result<Vec<Observation>, CheckoutError>;
}

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    #[serde(default)]
    vout: Vec<EsploraVout>,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    scriptpubkey_address: Option<String>,
    /// Base units (satoshis / litoshis)
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u64>,
    block_time: Option<i64>,
}

/// Esplora-compatible REST indexer (blockstream.info, mempool.space, litecoinspace.org).
#[derive(Debug, Clone)]
pub struct EsploraIndexer {
    client: Client,
    base_urls: HashMap<CryptoCurrency, String>,
}

impl EsploraIndexer {
    pub fn new(base_urls: HashMap<CryptoCurrency, String>) -> Self {
        Self {
            client: Client::new(),
            base_urls: base_urls
                .into_iter()
                .map(|(c, url)| (c, url.trim_end_matches('/').to_string()))
                .collect(),
        }
    }

    fn base_url(&self, currency: CryptoCurrency) -> Result<&str, CheckoutError> {
        self.base_urls
            .get(&currency)
            .map(String::as_str)
            .ok_or_else(|| CheckoutError::UnsupportedCurrency(currency.as_ref().to_string()))
    }

    async fn get_text(&self, url: &str) -> Result<String, CheckoutError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CheckoutError::upstream(format!("Indexer request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(CheckoutError::upstream(format!(
                "Indexer returned {} for {}",
                response.status(),
                url
            )));
        }
        response
            .text()
            .await
            .map_err(|e| CheckoutError::upstream(format!("Indexer response unreadable: {}", e)))
    }
}

#[async_trait]
impl ChainIndexer for EsploraIndexer {
    async fn address_activity(
        &self,
        currency: CryptoCurrency,
        address: &str,
    ) -> Result<Vec<Observation>, CheckoutError> {
        let base = self.base_url(currency)?;
        let now = chrono::Utc::now().timestamp();

        let tip_text = self.get_text(&format!("{}/blocks/tip/height", base)).await?;
        let tip_height: u64 = tip_text
            .trim()
            .parse()
            .map_err(|_| CheckoutError::upstream(format!("Invalid tip height: {}", tip_text.trim())))?;

        let body = self.get_text(&format!("{}/address/{}/txs", base, address)).await?;
        let txs: Vec<EsploraTx> = serde_json::from_str(&body)
            .map_err(|e| CheckoutError::upstream(format!("Failed to parse indexer response: {}", e)))?;

        Ok(observations_from(txs, address, tip_height, now))
    }
}

fn observations_from(txs: Vec<EsploraTx>, address: &str, tip_height: u64, now: i64) -> Vec<Observation> {
    txs.into_iter()
        .filter_map(|tx| {
            let received: u64 = tx
                .vout
                .iter()
                .filter(|out| out.scriptpubkey_address.as_deref() == Some(address))
                .map(|out| out.value)
                .sum();
            if received == 0 {
                return None;
            }

            let confirmations = match (tx.status.confirmed, tx.status.block_height) {
                (true, Some(height)) if tip_height >= height => {
                    u32::try_from(tip_height - height + 1).unwrap_or(u32::MAX)
                }
                (true, _) => 1,
                _ => 0,
            };
            let first_seen_at = if tx.status.confirmed {
                tx.status.block_time.unwrap_or(now)
            } else {
                now
            };

            Some(Observation {
                txid: tx.txid,
                amount: Decimal::from(received) / Decimal::from(100_000_000u64),
                confirmations,
                first_seen_at,
            })
        })
        .collect()
}
