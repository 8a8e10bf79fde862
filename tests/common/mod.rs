//! Shared fixtures: in-memory store, fake payment gateway, scripted chain indexer.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

pub use digistore::checkout::*;
pub use digistore::db::{
    self, AppState, DbPool, IntentSettlement, OrderRepository, ProductRepository, SqliteRepository,
    queries,
};
pub use digistore::error::CheckoutError;
pub use digistore::models::*;
pub use digistore::payments::*;
pub use digistore::settlement::*;

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const SUCCESS_PAGE: &str = "https://shop.test/success";
pub const BTC_ADDRESS: &str = "bc1qtestaddress";
pub const LTC_ADDRESS: &str = "Ltestaddress";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Single-connection in-memory pool so every checkout sees the same database.
pub fn memory_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        db::init_db(&conn).unwrap();
    }
    pool
}

/// File-backed pool for tests that need several connections at once.
pub fn file_pool(dir: &tempfile::TempDir) -> DbPool {
    let path = dir.path().join("digistore-test.db");
    let pool = db::create_pool(path.to_str().unwrap()).unwrap();
    {
        let conn = pool.get().unwrap();
        db::init_db(&conn).unwrap();
    }
    pool
}

pub fn count_orders(pool: &DbPool) -> i64 {
    let conn = pool.get().unwrap();
    conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))
        .unwrap()
}

// ============ Fakes ============

#[derive(Default)]
pub struct FakeGateway {
    pub created: Mutex<Vec<HostedSessionRequest>>,
    pub expired: Mutex<Vec<String>>,
    pub fail_create: bool,
    pub fail_expire: bool,
    counter: AtomicUsize,
}

impl FakeGateway {
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<HostedSessionRequest> {
        self.created.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(&self, request: &HostedSessionRequest) -> Result<HostedSession, CheckoutError> {
        if self.fail_create {
            return Err(CheckoutError::UpstreamPaymentError("gateway down".into()));
        }
        self.created.lock().unwrap().push(request.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("cs_test_{}", n);
        Ok(HostedSession {
            url: format!("https://pay.test/{}", id),
            id,
        })
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), CheckoutError> {
        self.expired.lock().unwrap().push(session_id.to_string());
        if self.fail_expire {
            return Err(CheckoutError::UpstreamPaymentError("expire failed".into()));
        }
        Ok(())
    }
}

/// Returns queued responses in order, repeating the last one once the queue runs dry.
#[derive(Default)]
pub struct ScriptedIndexer {
    script: Mutex<VecDeque<Result<Vec<Observation>, String>>>,
    last: Mutex<Option<Vec<Observation>>>,
    pub calls: AtomicUsize,
}

impl ScriptedIndexer {
    pub fn push(&self, observations: Vec<Observation>) {
        self.script.lock().unwrap().push_back(Ok(observations));
    }

    pub fn push_error(&self, message: &str) {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainIndexer for ScriptedIndexer {
    async fn address_activity(
        &self,
        _currency: CryptoCurrency,
        _address: &str,
    ) -> Result<Vec<Observation>, CheckoutError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(observations)) => {
                *self.last.lock().unwrap() = Some(observations.clone());
                Ok(observations)
            }
            Some(Err(message)) => Err(CheckoutError::UpstreamPaymentError(message)),
            None => Ok(self.last.lock().unwrap().clone().unwrap_or_default()),
        }
    }
}

/// Delegates to SQLite but fails every order insert.
pub struct FailingOrderStore(pub SqliteRepository);

impl OrderRepository for FailingOrderStore {
    fn create_order(&self, _order: &NewOrder) -> Result<Order, CheckoutError> {
        Err(CheckoutError::PersistenceError("disk full".into()))
    }
    fn create_order_with_intent(&self, _order: &NewOrder, _intent: &PaymentIntent) -> Result<Order, CheckoutError> {
        Err(CheckoutError::PersistenceError("disk full".into()))
    }
    fn get_order(&self, id: &str) -> Result<Option<Order>, CheckoutError> {
        self.0.get_order(id)
    }
    fn get_order_by_number(&self, n: &str) -> Result<Option<Order>, CheckoutError> {
        self.0.get_order_by_number(n)
    }
    fn get_order_by_payment_ref(&self, r: &str) -> Result<Option<Order>, CheckoutError> {
        self.0.get_order_by_payment_ref(r)
    }
    fn get_intent(&self, id: &str) -> Result<Option<PaymentIntent>, CheckoutError> {
        self.0.get_intent(id)
    }
    fn get_intent_for_order(&self, id: &str) -> Result<Option<PaymentIntent>, CheckoutError> {
        self.0.get_intent_for_order(id)
    }
    fn list_open_intents(&self) -> Result<Vec<(String, PaymentIntent)>, CheckoutError> {
        self.0.list_open_intents()
    }
    fn mark_intent_verifying(&self, id: &str) -> Result<(), CheckoutError> {
        self.0.mark_intent_verifying(id)
    }
    fn claimed_txids(&self, c: CryptoCurrency) -> Result<HashSet<String>, CheckoutError> {
        self.0.claimed_txids(c)
    }
    fn confirm_order(&self, id: &str, r: &str, s: Option<&IntentSettlement>) -> Result<bool, CheckoutError> {
        self.0.confirm_order(id, r, s)
    }
    fn cancel_order(&self, id: &str, s: Option<&IntentSettlement>) -> Result<bool, CheckoutError> {
        self.0.cancel_order(id, s)
    }
    fn webhook_event_seen(&self, p: &str, e: &str) -> Result<bool, CheckoutError> {
        self.0.webhook_event_seen(p, e)
    }
    fn record_webhook_event(&self, p: &str, e: &str) -> Result<bool, CheckoutError> {
        self.0.record_webhook_event(p, e)
    }
}

// ============ App assembly ============

pub fn intent_builder() -> IntentBuilder {
    let rates = StaticRateSource::new([
        (CryptoCurrency::Btc, dec!(43250)),
        (CryptoCurrency::Ltc, dec!(72.5)),
    ])
    .unwrap();
    let addresses = HashMap::from([
        (CryptoCurrency::Btc, BTC_ADDRESS.to_string()),
        (CryptoCurrency::Ltc, LTC_ADDRESS.to_string()),
    ]);
    IntentBuilder::new(Arc::new(rates), addresses)
}

/// Watchers spawned by checkout in tests stay idle for the test's lifetime.
pub fn idle_timing() -> WatcherTiming {
    WatcherTiming {
        observation_delay: Duration::from_secs(3600),
        poll_interval: Duration::from_secs(3600),
    }
}

pub fn fast_timing() -> WatcherTiming {
    WatcherTiming {
        observation_delay: Duration::from_millis(0),
        poll_interval: Duration::from_millis(20),
    }
}

pub fn test_policy() -> SettlementPolicy {
    SettlementPolicy {
        btc_min_confirmations: 2,
        ltc_min_confirmations: 6,
        tolerance_bps: 50,
        clock_skew_seconds: 0,
    }
}

pub struct TestApp {
    pub pool: DbPool,
    pub repo: Arc<SqliteRepository>,
    pub gateway: Arc<FakeGateway>,
    pub indexer: Arc<ScriptedIndexer>,
    pub checkout: Arc<Checkout>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(memory_pool(), FakeGateway::default(), dec!(0.08))
    }

    pub fn with_tax(tax_rate: Decimal) -> Self {
        Self::build(memory_pool(), FakeGateway::default(), tax_rate)
    }

    pub fn with_gateway(gateway: FakeGateway) -> Self {
        Self::build(memory_pool(), gateway, dec!(0.08))
    }

    pub fn build(pool: DbPool, gateway: FakeGateway, tax_rate: Decimal) -> Self {
        let repo = Arc::new(SqliteRepository::new(pool.clone()));
        let gateway = Arc::new(gateway);
        let indexer = Arc::new(ScriptedIndexer::default());
        let watcher = Arc::new(SettlementWatcher::new(
            repo.clone(),
            indexer.clone(),
            test_policy(),
            idle_timing(),
        ));
        let checkout = Arc::new(Checkout::new(
            repo.clone(),
            gateway.clone(),
            intent_builder(),
            watcher,
            CouponBook::default(),
            settings(tax_rate),
        ));
        let state = AppState {
            orders: repo.clone(),
            products: repo.clone(),
            checkout: checkout.clone(),
            success_page_url: SUCCESS_PAGE.into(),
            stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        };
        Self {
            pool,
            repo,
            gateway,
            indexer,
            checkout,
            state,
        }
    }

    pub fn router(&self) -> Router {
        digistore::handlers::router(self.state.clone())
    }

    pub fn watcher(&self, timing: WatcherTiming) -> Arc<SettlementWatcher> {
        Arc::new(SettlementWatcher::new(
            self.repo.clone(),
            self.indexer.clone(),
            test_policy(),
            timing,
        ))
    }

    pub fn create_product(&self, slug: &str, name: &str, price: Decimal) -> Product {
        self.repo
            .create_product(&CreateProduct {
                slug: slug.into(),
                name: name.into(),
                description: None,
                price,
                variants: vec![],
            })
            .unwrap()
    }
}

pub fn settings(tax_rate: Decimal) -> CheckoutSettings {
    CheckoutSettings {
        tax_rate,
        currency: "usd".into(),
        success_url: "https://api.shop.test/checkout/success?session_id={CHECKOUT_SESSION_ID}".into(),
        cancel_url: "https://shop.test/cart".into(),
    }
}

pub fn cart_with(product: &Product, quantity: u32) -> Cart {
    let mut cart = Cart::new();
    cart.add(&product.id, &product.name, product.price, quantity, OptionSelection::new())
        .unwrap();
    cart
}

pub fn request(cart: Cart, method: PaymentMethod, coupon: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        cart,
        email: "Jane@Example.com".into(),
        name: Some("Jane".into()),
        method,
        coupon_code: coupon.map(String::from),
    }
}

/// Store a pending crypto order directly, with full control over the intent's timing.
pub fn seed_crypto_order(
    repo: &SqliteRepository,
    crypto_amount: Decimal,
    created_at: i64,
    expires_at: i64,
) -> (Order, PaymentIntent) {
    let intent = PaymentIntent {
        id: uuid::Uuid::new_v4().to_string(),
        currency: CryptoCurrency::Btc,
        fiat_amount: dec!(29.99),
        rate: dec!(43250),
        crypto_amount,
        address: BTC_ADDRESS.into(),
        created_at,
        expires_at,
        state: IntentState::AwaitingPayment,
        txid: None,
        received_amount: None,
    };
    let order = repo
        .create_order_with_intent(
            &NewOrder {
                order_number: generate_order_number(),
                lines: vec![OrderLine {
                    product_id: "p1".into(),
                    name: "Ebook".into(),
                    quantity: 1,
                    unit_price: dec!(29.99),
                    line_total: dec!(29.99),
                    options: OptionSelection::new(),
                }],
                totals: Totals {
                    subtotal: dec!(29.99),
                    discount: dec!(0),
                    tax: dec!(0),
                    total: dec!(29.99),
                },
                coupon_code: None,
                payment_method: PaymentMethod::Bitcoin,
                customer_email: "jane@example.com".into(),
                customer_name: None,
                payment_ref: Some(intent.id.clone()),
            },
            &intent,
        )
        .unwrap();
    (order, intent)
}

pub fn observation(txid: &str, amount: Decimal, confirmations: u32, first_seen_at: i64) -> Observation {
    Observation {
        txid: txid.into(),
        amount,
        confirmations,
        first_seen_at,
    }
}
