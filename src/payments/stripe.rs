use std::collections::HashMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::CheckoutError;

use super::{HostedSession, HostedSessionRequest, PaymentGateway};

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a signed webhook before it is treated as a replay.
pub const WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

#[derive(Debug, Deserialize)]
struct CheckoutSessionResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.into(),
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Form parameters for a one-off payment session.
    ///
    /// The session charges a single summary line for the order total so that
    /// discount and tax match what was stored; the item list goes in the description.
    fn session_params(request: &HostedSessionRequest) -> Vec<(String, String)> {
        let description = request
            .line_items
            .iter()
            .map(|item| format!("{} x{}", item.name, item.quantity))
            .collect::<Vec<_>>()
            .join(", ");

        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("customer_email".to_string(), request.customer_email.clone()),
            ("client_reference_id".to_string(), request.order_number.clone()),
            ("metadata[order_number]".to_string(), request.order_number.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                format!("Order {}", request.order_number),
            ),
        ];
        if !description.is_empty() {
            params.push((
                "line_items[0][price_data][product_data][description]".to_string(),
                description,
            ));
        }
        params
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<StripeErrorBody>(&text) {
            Ok(body) => body.error.message.unwrap_or_else(|| status.to_string()),
            Err(_) => format!("{}: {}", status, text),
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_session(&self, request: &HostedSessionRequest) -> Result<HostedSession, CheckoutError> {
        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::session_params(request))
            .send()
            .await
            .map_err(|e| CheckoutError::upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let message = Self::error_message(response).await;
            return Err(CheckoutError::upstream(format!("Stripe API error: {}", message)));
        }

        let session: CheckoutSessionResponse = response
            .json()
            .await
            .map_err(|e| CheckoutError::upstream(format!("Failed to parse Stripe response: {}", e)))?;

        let url = session
            .url
            .ok_or_else(|| CheckoutError::upstream("Stripe session has no checkout URL"))?;

        Ok(HostedSession { id: session.id, url })
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), CheckoutError> {
        let response = self
            .client
            .post(format!("{}/checkout/sessions/{}/expire", self.api_base, session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| CheckoutError::upstream(format!("Stripe API error: {}", e)))?;

        if !response.status().is_success() {
            let message = Self::error_message(response).await;
            return Err(CheckoutError::upstream(format!("Stripe API error: {}", message)));
        }
        Ok(())
    }
}

/// Check a `Stripe-Signature` header (`t=...,v1=...`) against the raw payload.
///
/// Any `v1` entry may match. Signatures older or newer than
/// [`WEBHOOK_TOLERANCE_SECONDS`] relative to `now` are rejected.
pub fn verify_stripe_signature(secret: &str, payload: &[u8], header: &str, now: i64) -> bool {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };
    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > WEBHOOK_TOLERANCE_SECONDS {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    signatures
        .iter()
        .any(|sig| bool::from(expected.as_bytes().ct_eq(sig.as_bytes())))
}

/// Compute a header value in the format Stripe sends. Used by tests and local tooling.
pub fn sign_stripe_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub payment_status: String,
    pub client_reference_id: Option<String>,
    pub customer_email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}
