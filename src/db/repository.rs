//! Storage interfaces the checkout core depends on, with the SQLite implementation.

use std::collections::HashSet;

use crate::error::CheckoutError;
use crate::models::*;

use super::{DbPool, queries};

pub use super::queries::IntentSettlement;

type RepoResult<T> = std::result::Result<T, CheckoutError>;

pub trait ProductRepository: Send + Sync {
    fn get_product(&self, id: &str) -> RepoResult<Option<Product>>;
    fn get_product_by_slug(&self, slug: &str) -> RepoResult<Option<Product>>;
    fn list_products(&self) -> RepoResult<Vec<Product>>;
    fn create_product(&self, input: &CreateProduct) -> RepoResult<Product>;
}

/// Orders are created once and afterwards only moved through compare-and-set transitions.
pub trait OrderRepository: Send + Sync {
    fn create_order(&self, order: &NewOrder) -> RepoResult<Order>;

    /// Persist a crypto order and its intent atomically.
    fn create_order_with_intent(&self, order: &NewOrder, intent: &PaymentIntent) -> RepoResult<Order>;

    fn get_order(&self, id: &str) -> RepoResult<Option<Order>>;
    fn get_order_by_number(&self, order_number: &str) -> RepoResult<Option<Order>>;
    fn get_order_by_payment_ref(&self, payment_ref: &str) -> RepoResult<Option<Order>>;

    fn get_intent(&self, intent_id: &str) -> RepoResult<Option<PaymentIntent>>;
    fn get_intent_for_order(&self, order_id: &str) -> RepoResult<Option<PaymentIntent>>;
    /// Non-terminal intents with their order ids.
    fn list_open_intents(&self) -> RepoResult<Vec<(String, PaymentIntent)>>;
    fn mark_intent_verifying(&self, intent_id: &str) -> RepoResult<()>;
    fn claimed_txids(&self, currency: CryptoCurrency) -> RepoResult<HashSet<String>>;

    /// Pending → Completed/Confirmed. `Ok(false)` when the order was not pending.
    fn confirm_order(
        &self,
        order_id: &str,
        confirmation_ref: &str,
        settlement: Option<&IntentSettlement>,
    ) -> RepoResult<bool>;

    /// Pending → Cancelled/Failed. `Ok(false)` when the order was not pending.
    fn cancel_order(&self, order_id: &str, settlement: Option<&IntentSettlement>) -> RepoResult<bool>;

    fn webhook_event_seen(&self, provider: &str, event_id: &str) -> RepoResult<bool>;

    /// `Ok(false)` if this provider event was already recorded.
    fn record_webhook_event(&self, provider: &str, event_id: &str) -> RepoResult<bool>;
}

#[derive(Clone)]
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn conn(&self) -> RepoResult<r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>> {
        self.pool.get().map_err(CheckoutError::persistence)
    }
}

impl ProductRepository for SqliteRepository {
    fn get_product(&self, id: &str) -> RepoResult<Option<Product>> {
        let conn = self.conn()?;
        queries::get_product_by_id(&conn, id).map_err(CheckoutError::persistence)
    }

    fn get_product_by_slug(&self, slug: &str) -> RepoResult<Option<Product>> {
        let conn = self.conn()?;
        queries::get_product_by_slug(&conn, slug).map_err(CheckoutError::persistence)
    }

    fn list_products(&self) -> RepoResult<Vec<Product>> {
        let conn = self.conn()?;
        queries::list_products(&conn, false).map_err(CheckoutError::persistence)
    }

    fn create_product(&self, input: &CreateProduct) -> RepoResult<Product> {
        let mut conn = self.conn()?;
        queries::create_product(&mut conn, input).map_err(CheckoutError::persistence)
    }
}

impl OrderRepository for SqliteRepository {
    fn create_order(&self, order: &NewOrder) -> RepoResult<Order> {
        let mut conn = self.conn()?;
        queries::create_order(&mut conn, order).map_err(CheckoutError::persistence)
    }

    fn create_order_with_intent(&self, order: &NewOrder, intent: &PaymentIntent) -> RepoResult<Order> {
        let mut conn = self.conn()?;
        queries::create_order_with_intent(&mut conn, order, intent)
            .map_err(CheckoutError::persistence)
    }

    fn get_order(&self, id: &str) -> RepoResult<Option<Order>> {
        let conn = self.conn()?;
        queries::get_order_by_id(&conn, id).map_err(CheckoutError::persistence)
    }

    fn get_order_by_number(&self, order_number: &str) -> RepoResult<Option<Order>> {
        let conn = self.conn()?;
        queries::get_order_by_number(&conn, order_number).map_err(CheckoutError::persistence)
    }

    fn get_order_by_payment_ref(&self, payment_ref: &str) -> RepoResult<Option<Order>> {
        let conn = self.conn()?;
        queries::get_order_by_payment_ref(&conn, payment_ref)
            .map_err(CheckoutError::persistence)
    }

    fn get_intent(&self, intent_id: &str) -> RepoResult<Option<PaymentIntent>> {
        let conn = self.conn()?;
        queries::get_payment_intent(&conn, intent_id).map_err(CheckoutError::persistence)
    }

    fn get_intent_for_order(&self, order_id: &str) -> RepoResult<Option<PaymentIntent>> {
        let conn = self.conn()?;
        queries::get_payment_intent_for_order(&conn, order_id)
            .map_err(CheckoutError::persistence)
    }

    fn list_open_intents(&self) -> RepoResult<Vec<(String, PaymentIntent)>> {
        let conn = self.conn()?;
        queries::list_open_payment_intents(&conn).map_err(CheckoutError::persistence)
    }

    fn mark_intent_verifying(&self, intent_id: &str) -> RepoResult<()> {
        let conn = self.conn()?;
        queries::mark_payment_intent_verifying(&conn, intent_id)
            .map(|_| ())
            .map_err(CheckoutError::persistence)
    }

    fn claimed_txids(&self, currency: CryptoCurrency) -> RepoResult<HashSet<String>> {
        let conn = self.conn()?;
        queries::list_claimed_txids(&conn, currency)
            .map(|ids| ids.into_iter().collect())
            .map_err(CheckoutError::persistence)
    }

    fn confirm_order(
        &self,
        order_id: &str,
        confirmation_ref: &str,
        settlement: Option<&IntentSettlement>,
    ) -> RepoResult<bool> {
        let mut conn = self.conn()?;
        queries::try_confirm_order(&mut conn, order_id, confirmation_ref, settlement)
            .map_err(CheckoutError::persistence)
    }

    fn cancel_order(&self, order_id: &str, settlement: Option<&IntentSettlement>) -> RepoResult<bool> {
        let mut conn = self.conn()?;
        queries::try_cancel_order(&mut conn, order_id, settlement)
            .map_err(CheckoutError::persistence)
    }

    fn webhook_event_seen(&self, provider: &str, event_id: &str) -> RepoResult<bool> {
        let conn = self.conn()?;
        queries::webhook_event_exists(&conn, provider, event_id)
            .map_err(CheckoutError::persistence)
    }

    fn record_webhook_event(&self, provider: &str, event_id: &str) -> RepoResult<bool> {
        let conn = self.conn()?;
        queries::try_record_webhook_event(&conn, provider, event_id)
            .map_err(CheckoutError::persistence)
    }
}
