mod intent;
mod rates;
mod stripe;

pub use intent::*;
pub use rates::*;
pub use stripe::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CheckoutError;

/// A redirect-based checkout created at the hosted payment provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionLineItem {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone)]
pub struct HostedSessionRequest {
    pub order_number: String,
    pub line_items: Vec<SessionLineItem>,
    /// Amount to charge in minor units: the order total after discount and tax
    pub amount: i64,
    pub currency: String,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Hosted payment provider used for card checkout.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &HostedSessionRequest) -> Result<HostedSession, CheckoutError>;

    /// Void a session that will not be used (e.g. the order could not be stored).
    async fn expire_session(&self, session_id: &str) -> Result<(), CheckoutError>;
}

/// Stand-in used when no card provider is configured; every call fails upstream.
pub struct UnconfiguredGateway;

#[async_trait]
impl PaymentGateway for UnconfiguredGateway {
    async fn create_session(&self, _request: &HostedSessionRequest) -> Result<HostedSession, CheckoutError> {
        Err(CheckoutError::UpstreamPaymentError(
            "Card payments are not configured".into(),
        ))
    }

    async fn expire_session(&self, _session_id: &str) -> Result<(), CheckoutError> {
        Ok(())
    }
}
