use rust_decimal::Decimal;

use crate::db::{IntentSettlement, OrderRepository};
use crate::error::CheckoutError;
use crate::models::{IntentState, Order, PaymentIntent};

/// Result of a confirmation attempt. Only `Confirmed` changed anything.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    Confirmed(Order),
    /// Payment was already confirmed earlier (replay, or another path won the race)
    AlreadyConfirmed(Order),
    /// Order left the pending state without being paid (cancelled, refunded)
    NotPending(Order),
}

impl ConfirmOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Confirmed(o) | Self::AlreadyConfirmed(o) | Self::NotPending(o) => o,
        }
    }
}

/// Confirm the card order behind a hosted session.
pub fn confirm_card_payment(
    repo: &dyn OrderRepository,
    session_id: &str,
) -> Result<ConfirmOutcome, CheckoutError> {
    let order = repo
        .get_order_by_payment_ref(session_id)?
        .ok_or(CheckoutError::OrderNotFound)?;
    apply_confirmation(repo, order, session_id, None)
}

/// Confirm a crypto order paid by `txid`.
///
/// `observed_at` is when the paying transaction was looked up. If that is not
/// before the intent's expiry the order is cancelled and `IntentExpired` returned.
pub fn confirm_crypto_payment(
    repo: &dyn OrderRepository,
    order_id: &str,
    intent: &PaymentIntent,
    txid: &str,
    received: Decimal,
    observed_at: i64,
) -> Result<ConfirmOutcome, CheckoutError> {
    let order = repo.get_order(order_id)?.ok_or(CheckoutError::OrderNotFound)?;
    if order.is_settled() {
        return Ok(ConfirmOutcome::AlreadyConfirmed(order));
    }

    if intent.is_expired_at(observed_at) {
        let settlement = IntentSettlement {
            intent_id: intent.id.clone(),
            state: IntentState::Expired,
            txid: None,
            received_amount: None,
        };
        cancel_pending_order(repo, order_id, Some(&settlement))?;
        return Err(CheckoutError::IntentExpired);
    }

    let settlement = IntentSettlement {
        intent_id: intent.id.clone(),
        state: IntentState::Confirmed,
        txid: Some(txid.to_string()),
        received_amount: Some(received),
    };
    apply_confirmation(repo, order, txid, Some(&settlement))
}

fn apply_confirmation(
    repo: &dyn OrderRepository,
    order: Order,
    confirmation_ref: &str,
    settlement: Option<&IntentSettlement>,
) -> Result<ConfirmOutcome, CheckoutError> {
    if order.is_settled() {
        return Ok(ConfirmOutcome::AlreadyConfirmed(order));
    }

    let won = repo.confirm_order(&order.id, confirmation_ref, settlement)?;
    let current = repo.get_order(&order.id)?.ok_or(CheckoutError::OrderNotFound)?;

    if won {
        tracing::info!(
            "Payment confirmed: order={}, method={}, ref={}",
            current.order_number,
            current.payment_method.as_ref(),
            confirmation_ref
        );
        Ok(ConfirmOutcome::Confirmed(current))
    } else if current.is_settled() {
        Ok(ConfirmOutcome::AlreadyConfirmed(current))
    } else {
        tracing::warn!(
            "Confirmation ignored, order {} is {}",
            current.order_number,
            current.status.as_ref()
        );
        Ok(ConfirmOutcome::NotPending(current))
    }
}

/// Move a pending order to cancelled. Confirmed orders are left alone.
///
/// Returns whether this call cancelled the order.
pub fn cancel_pending_order(
    repo: &dyn OrderRepository,
    order_id: &str,
    settlement: Option<&IntentSettlement>,
) -> Result<bool, CheckoutError> {
    let cancelled = repo.cancel_order(order_id, settlement)?;
    if cancelled {
        tracing::info!("Order cancelled: order_id={}", order_id);
    }
    Ok(cancelled)
}
