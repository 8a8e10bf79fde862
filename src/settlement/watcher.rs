use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::checkout::{ConfirmOutcome, cancel_pending_order, confirm_crypto_payment};
use crate::db::{IntentSettlement, OrderRepository};
use crate::error::CheckoutError;
use crate::models::{IntentState, PaymentIntent};

use super::{ChainIndexer, PollOutcome, SettlementPolicy, poll};

#[derive(Debug, Clone, Copy)]
pub struct WatcherTiming {
    /// Wait before the first lookup for a fresh intent
    pub observation_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for WatcherTiming {
    fn default() -> Self {
        Self {
            observation_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// How a watch task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEnd {
    Confirmed,
    Expired,
    Mismatch,
    /// The intent was settled elsewhere or disappeared
    Stopped,
}

/// Runs one background task per open payment intent.
pub struct SettlementWatcher {
    repo: Arc<dyn OrderRepository>,
    indexer: Arc<dyn ChainIndexer>,
    policy: SettlementPolicy,
    timing: WatcherTiming,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Time left until `expires_at` (unix seconds), zero once past.
fn until(expires_at: i64) -> Duration {
    let remaining_ms = expires_at
        .saturating_mul(1000)
        .saturating_sub(chrono::Utc::now().timestamp_millis());
    Duration::from_millis(u64::try_from(remaining_ms).unwrap_or(0))
}

impl SettlementWatcher {
    pub fn new(
        repo: Arc<dyn OrderRepository>,
        indexer: Arc<dyn ChainIndexer>,
        policy: SettlementPolicy,
        timing: WatcherTiming,
    ) -> Self {
        Self {
            repo,
            indexer,
            policy,
            timing,
        }
    }

    pub fn spawn(self: &Arc<Self>, order_id: String, intent: PaymentIntent) -> JoinHandle<WatchEnd> {
        let watcher = Arc::clone(self);
        tokio::spawn(async move { watcher.run(order_id, intent).await })
    }

    /// Re-attach watchers to intents left open by a previous process.
    ///
    /// Intents already past expiry are expired immediately instead.
    pub async fn resume_open_intents(self: &Arc<Self>) -> Result<usize, CheckoutError> {
        let open = self.repo.list_open_intents()?;
        let mut resumed = 0;
        for (order_id, intent) in open {
            if intent.is_expired_at(now()) {
                self.expire(&order_id, &intent);
                continue;
            }
            tracing::info!(
                "Resuming settlement watch: intent={}, expires_at={}",
                intent.id,
                intent.expires_at
            );
            self.spawn(order_id, intent);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Watch `intent` until it settles, mismatches or expires.
    pub async fn run(&self, order_id: String, intent: PaymentIntent) -> WatchEnd {
        if intent.state == IntentState::AwaitingPayment {
            tokio::time::sleep(self.timing.observation_delay.min(until(intent.expires_at))).await;
            if let Err(e) = self.repo.mark_intent_verifying(&intent.id) {
                tracing::warn!("Failed to mark intent {} verifying: {}", intent.id, e);
            }
        }

        loop {
            let observed_at = now();

            match self.repo.get_intent(&intent.id) {
                Ok(Some(stored)) if stored.state.is_terminal() => return WatchEnd::Stopped,
                Ok(None) => {
                    tracing::warn!("Intent {} vanished, stopping watch", intent.id);
                    return WatchEnd::Stopped;
                }
                Ok(Some(_)) => {}
                Err(e) => tracing::warn!("Failed to reload intent {}: {}", intent.id, e),
            }

            if intent.is_expired_at(observed_at) {
                self.expire(&order_id, &intent);
                return WatchEnd::Expired;
            }

            if let Some(end) = self.check(&order_id, &intent, observed_at).await {
                return end;
            }

            tokio::time::sleep(self.timing.poll_interval.min(until(intent.expires_at))).await;
        }
    }

    /// One lookup. `None` means keep watching.
    async fn check(&self, order_id: &str, intent: &PaymentIntent, observed_at: i64) -> Option<WatchEnd> {
        let claimed = match self.repo.claimed_txids(intent.currency) {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::warn!("Failed to load claimed txids: {}", e);
                return None;
            }
        };

        let observations = match self
            .indexer
            .address_activity(intent.currency, &intent.address)
            .await
        {
            Ok(observations) => observations,
            Err(e) => {
                tracing::warn!("Chain lookup failed for intent {}, retrying: {}", intent.id, e);
                return None;
            }
        };

        match poll(intent, &observations, &claimed, observed_at, &self.policy) {
            PollOutcome::NotYetPaid => None,
            PollOutcome::Expired => {
                self.expire(order_id, intent);
                Some(WatchEnd::Expired)
            }
            PollOutcome::Paid { txid, amount } => {
                match confirm_crypto_payment(self.repo.as_ref(), order_id, intent, &txid, amount, observed_at) {
                    Ok(ConfirmOutcome::Confirmed(_)) | Ok(ConfirmOutcome::AlreadyConfirmed(_)) => {
                        Some(WatchEnd::Confirmed)
                    }
                    Ok(ConfirmOutcome::NotPending(_)) => Some(WatchEnd::Stopped),
                    Err(CheckoutError::IntentExpired) => Some(WatchEnd::Expired),
                    Err(e) => {
                        tracing::error!("Failed to confirm intent {} with tx {}: {}", intent.id, txid, e);
                        None
                    }
                }
            }
            PollOutcome::UnderpaidMismatch {
                txid,
                received,
                expected,
            } => {
                tracing::warn!(
                    "Underpayment for intent {}: tx={}, received={}, expected={}",
                    intent.id,
                    txid,
                    received,
                    expected
                );
                let settlement = IntentSettlement {
                    intent_id: intent.id.clone(),
                    state: IntentState::Mismatch,
                    txid: Some(txid),
                    received_amount: Some(received),
                };
                match cancel_pending_order(self.repo.as_ref(), order_id, Some(&settlement)) {
                    Ok(_) => Some(WatchEnd::Mismatch),
                    Err(e) => {
                        tracing::error!("Failed to record mismatch for intent {}: {}", intent.id, e);
                        None
                    }
                }
            }
        }
    }

    fn expire(&self, order_id: &str, intent: &PaymentIntent) {
        let settlement = IntentSettlement {
            intent_id: intent.id.clone(),
            state: IntentState::Expired,
            txid: None,
            received_amount: None,
        };
        match cancel_pending_order(self.repo.as_ref(), order_id, Some(&settlement)) {
            Ok(true) => tracing::info!("Payment intent expired: intent={}", intent.id),
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to expire intent {}: {}", intent.id, e),
        }
    }
}
