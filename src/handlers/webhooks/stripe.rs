use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};

use crate::checkout::{ConfirmOutcome, cancel_pending_order, confirm_card_payment};
use crate::db::AppState;
use crate::error::CheckoutError;
use crate::payments::{StripeCheckoutSession, StripeWebhookEvent, verify_stripe_signature};

const PROVIDER: &str = "stripe";

pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(secret) = state.stripe_webhook_secret.as_deref() else {
        tracing::error!("Stripe webhook received but STRIPE_WEBHOOK_SECRET is not set");
        return (StatusCode::SERVICE_UNAVAILABLE, "Stripe not configured");
    };

    let signature = match headers.get("stripe-signature") {
        Some(sig) => match sig.to_str() {
            Ok(s) => s,
            Err(_) => return (StatusCode::BAD_REQUEST, "Invalid signature header"),
        },
        None => return (StatusCode::BAD_REQUEST, "Missing stripe-signature header"),
    };

    if !verify_stripe_signature(secret, &body, signature, chrono::Utc::now().timestamp()) {
        return (StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    match state.orders.webhook_event_seen(PROVIDER, &event.id) {
        Ok(true) => return (StatusCode::OK, "Already processed"),
        Ok(false) => {}
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    }

    let response = match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            handle_session_paid(&state, &event)
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            handle_session_failed(&state, &event)
        }
        _ => return (StatusCode::OK, "Event ignored"),
    };

    if response.0.is_success() {
        if let Err(e) = state.orders.record_webhook_event(PROVIDER, &event.id) {
            tracing::warn!("Failed to record Stripe event {}: {}", event.id, e);
        }
    }
    response
}

fn parse_session(event: &StripeWebhookEvent) -> Result<StripeCheckoutSession, (StatusCode, &'static str)> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse checkout session: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid checkout session")
    })
}

/// Payment collected: confirm the order behind the session.
fn handle_session_paid(state: &AppState, event: &StripeWebhookEvent) -> (StatusCode, &'static str) {
    let session = match parse_session(event) {
        Ok(s) => s,
        Err(response) => return response,
    };

    // Delayed methods complete the session before funds arrive
    if session.payment_status != "paid" {
        return (StatusCode::OK, "Payment not completed");
    }

    match confirm_card_payment(state.orders.as_ref(), &session.id) {
        Ok(ConfirmOutcome::Confirmed(order)) => {
            tracing::info!(
                "Stripe checkout completed: session={}, order={}, event={}",
                session.id,
                order.order_number,
                event.id
            );
            (StatusCode::OK, "OK")
        }
        Ok(ConfirmOutcome::AlreadyConfirmed(_)) => (StatusCode::OK, "Already processed"),
        Ok(ConfirmOutcome::NotPending(order)) => {
            tracing::warn!(
                "Paid Stripe session {} for order {} which is {}; needs manual review",
                session.id,
                order.order_number,
                order.status.as_ref()
            );
            (StatusCode::OK, "Order not pending")
        }
        Err(CheckoutError::OrderNotFound) => {
            tracing::warn!("No order for Stripe session {}", session.id);
            (StatusCode::OK, "Order not found")
        }
        Err(e) => {
            tracing::error!("Failed to confirm Stripe session {}: {}", session.id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to confirm order")
        }
    }
}

/// Session expired or the delayed payment failed: cancel the order if still pending.
fn handle_session_failed(state: &AppState, event: &StripeWebhookEvent) -> (StatusCode, &'static str) {
    let session = match parse_session(event) {
        Ok(s) => s,
        Err(response) => return response,
    };

    let order = match state.orders.get_order_by_payment_ref(&session.id) {
        Ok(Some(o)) => o,
        Ok(None) => return (StatusCode::OK, "Order not found"),
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    match cancel_pending_order(state.orders.as_ref(), &order.id, None) {
        Ok(true) => {
            tracing::info!(
                "Stripe session {} ended without payment ({}), order {} cancelled",
                session.id,
                event.event_type,
                order.order_number
            );
            (StatusCode::OK, "OK")
        }
        Ok(false) => (StatusCode::OK, "Order not pending"),
        Err(e) => {
            tracing::error!("Failed to cancel order {}: {}", order.order_number, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to cancel order")
        }
    }
}
