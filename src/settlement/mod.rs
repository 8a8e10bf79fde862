//! Crypto settlement: deciding whether chain activity pays an intent, and the
//! background task that keeps asking until it does or the intent expires.

mod indexer;
mod watcher;

pub use indexer::*;
pub use watcher::*;

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::models::{CryptoCurrency, PaymentIntent};

/// Acceptance rules for observed transactions.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub btc_min_confirmations: u32,
    pub ltc_min_confirmations: u32,
    /// Accepted deviation either side of the quoted amount, in basis points
    pub tolerance_bps: u32,
    /// Allowance for block timestamps that run behind wall-clock time
    pub clock_skew_seconds: i64,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            btc_min_confirmations: 2,
            ltc_min_confirmations: 6,
            tolerance_bps: 50,
            clock_skew_seconds: 0,
        }
    }
}

impl SettlementPolicy {
    pub fn min_confirmations(&self, currency: CryptoCurrency) -> u32 {
        match currency {
            CryptoCurrency::Btc => self.btc_min_confirmations,
            CryptoCurrency::Ltc => self.ltc_min_confirmations,
        }
    }

    /// Smallest amount accepted as payment of `expected`.
    pub fn floor(&self, expected: Decimal) -> Decimal {
        let bps = Decimal::from(self.tolerance_bps.min(10_000));
        expected * (Decimal::from(10_000) - bps) / Decimal::from(10_000)
    }

    /// Largest amount accepted as payment of `expected`.
    ///
    /// Anything above belongs to some other payment sent to the shared address.
    pub fn ceiling(&self, expected: Decimal) -> Decimal {
        let bps = Decimal::from(self.tolerance_bps.min(10_000));
        expected * (Decimal::from(10_000) + bps) / Decimal::from(10_000)
    }

    pub fn matches(&self, expected: Decimal, amount: Decimal) -> bool {
        amount >= self.floor(expected) && amount <= self.ceiling(expected)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Paid { txid: String, amount: Decimal },
    NotYetPaid,
    Expired,
    UnderpaidMismatch {
        txid: String,
        received: Decimal,
        expected: Decimal,
    },
}

/// Evaluate chain activity for `intent` as of `observed_at`.
///
/// `observed_at` is the instant the lookup was issued. At or past `expires_at`
/// the intent is expired regardless of what the lookup returned. Transactions
/// seen before the intent was created (less the policy's clock skew), already
/// claimed by another intent, or larger than the tolerance band allows are ignored.
pub fn poll(
    intent: &PaymentIntent,
    observations: &[Observation],
    claimed: &HashSet<String>,
    observed_at: i64,
    policy: &SettlementPolicy,
) -> PollOutcome {
    if intent.is_expired_at(observed_at) {
        return PollOutcome::Expired;
    }

    let window_start = intent.created_at - policy.clock_skew_seconds.max(0);
    let min_confirmations = policy.min_confirmations(intent.currency);
    let expected = intent.crypto_amount;
    let ceiling = policy.ceiling(expected);

    let mut candidates: Vec<&Observation> = observations
        .iter()
        .filter(|o| o.first_seen_at >= window_start)
        .filter(|o| !claimed.contains(&o.txid))
        .filter(|o| o.amount <= ceiling)
        .collect();
    candidates.sort_by(|a, b| {
        a.first_seen_at
            .cmp(&b.first_seen_at)
            .then_with(|| a.txid.cmp(&b.txid))
    });

    if let Some(paid) = candidates
        .iter()
        .find(|o| o.confirmations >= min_confirmations && policy.matches(expected, o.amount))
    {
        return PollOutcome::Paid {
            txid: paid.txid.clone(),
            amount: paid.amount,
        };
    }

    // A sufficient payment still gathering confirmations outranks an underpayment.
    if candidates.iter().any(|o| policy.matches(expected, o.amount)) {
        return PollOutcome::NotYetPaid;
    }

    match candidates
        .iter()
        .find(|o| o.confirmations >= min_confirmations)
    {
        Some(short) => PollOutcome::UnderpaidMismatch {
            txid: short.txid.clone(),
            received: short.amount,
            expected,
        },
        None => PollOutcome::NotYetPaid,
    }
}
