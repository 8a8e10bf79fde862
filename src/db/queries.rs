use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    ORDER_COLS, ORDER_LINE_COLS, PAYMENT_INTENT_COLS, PRODUCT_COLS, PRODUCT_VARIANT_COLS,
    query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

// ============ Products ============

pub fn create_product(conn: &mut Connection, input: &CreateProduct) -> Result<Product> {
    if input.price < Decimal::ZERO {
        return Err(AppError::BadRequest("Price cannot be negative".into()));
    }

    let id = gen_id();
    let now = now();
    let tx = conn.transaction()?;

    tx.execute(
        "INSERT INTO products (id, slug, name, description, price, active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![&id, &input.slug, &input.name, &input.description, input.price.to_string(), now],
    )?;

    let mut variants = Vec::with_capacity(input.variants.len());
    for v in &input.variants {
        let variant = ProductVariant {
            id: gen_id(),
            product_id: id.clone(),
            name: v.name.clone(),
            value: v.value.clone(),
            price_adjust: v.price_adjust,
        };
        tx.execute(
            "INSERT INTO product_variants (id, product_id, name, value, price_adjust)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &variant.id,
                &variant.product_id,
                &variant.name,
                &variant.value,
                variant.price_adjust.to_string()
            ],
        )?;
        variants.push(variant);
    }

    tx.commit()?;

    Ok(Product {
        id,
        slug: input.slug.clone(),
        name: input.name.clone(),
        description: input.description.clone(),
        price: input.price,
        active: true,
        variants,
        created_at: now,
    })
}

/// Show or hide a product from the storefront. Existing orders are unaffected.
pub fn set_product_active(conn: &Connection, slug: &str, active: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE products SET active = ?1 WHERE slug = ?2",
        params![active, slug],
    )?;
    Ok(affected > 0)
}

fn with_variants(conn: &Connection, product: Option<Product>) -> Result<Option<Product>> {
    let Some(mut product) = product else {
        return Ok(None);
    };
    product.variants = list_variants_for_product(conn, &product.id)?;
    Ok(Some(product))
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    let product = query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        params![id],
    )?;
    with_variants(conn, product)
}

pub fn get_product_by_slug(conn: &Connection, slug: &str) -> Result<Option<Product>> {
    let product = query_one(
        conn,
        &format!("SELECT {} FROM products WHERE slug = ?1", PRODUCT_COLS),
        params![slug],
    )?;
    with_variants(conn, product)
}

pub fn list_products(conn: &Connection, include_inactive: bool) -> Result<Vec<Product>> {
    let sql = if include_inactive {
        format!("SELECT {} FROM products ORDER BY created_at DESC", PRODUCT_COLS)
    } else {
        format!(
            "SELECT {} FROM products WHERE active = 1 ORDER BY created_at DESC",
            PRODUCT_COLS
        )
    };
    let mut products: Vec<Product> = query_all(conn, &sql, [])?;
    for product in &mut products {
        product.variants = list_variants_for_product(conn, &product.id)?;
    }
    Ok(products)
}

pub fn list_variants_for_product(conn: &Connection, product_id: &str) -> Result<Vec<ProductVariant>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM product_variants WHERE product_id = ?1 ORDER BY name, value",
            PRODUCT_VARIANT_COLS
        ),
        params![product_id],
    )
}

// ============ Orders ============

fn insert_order(conn: &Connection, id: &str, input: &NewOrder, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO orders (id, order_number, subtotal, discount, tax, total, coupon_code,
                             status, payment_status, payment_method, customer_email, customer_name,
                             payment_ref, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)",
        params![
            id,
            &input.order_number,
            input.totals.subtotal.to_string(),
            input.totals.discount.to_string(),
            input.totals.tax.to_string(),
            input.totals.total.to_string(),
            &input.coupon_code,
            OrderStatus::Pending.as_ref(),
            PaymentStatus::Pending.as_ref(),
            input.payment_method.as_ref(),
            &input.customer_email,
            &input.customer_name,
            &input.payment_ref,
            now,
        ],
    )?;

    for (position, line) in input.lines.iter().enumerate() {
        let options = serde_json::to_string(&line.options)
            .map_err(|e| AppError::Internal(format!("Failed to encode line options: {}", e)))?;
        conn.execute(
            "INSERT INTO order_lines (order_id, position, product_id, name, quantity, unit_price,
                                      line_total, options)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                position as i64,
                &line.product_id,
                &line.name,
                line.quantity,
                line.unit_price.to_string(),
                line.line_total.to_string(),
                options,
            ],
        )?;
    }
    Ok(())
}

fn new_order_record(id: String, input: &NewOrder, now: i64) -> Order {
    Order {
        id,
        order_number: input.order_number.clone(),
        lines: input.lines.clone(),
        totals: input.totals,
        coupon_code: input.coupon_code.clone(),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_method: input.payment_method,
        customer_email: input.customer_email.clone(),
        customer_name: input.customer_name.clone(),
        payment_ref: input.payment_ref.clone(),
        confirmation_ref: None,
        created_at: now,
        updated_at: now,
    }
}

/// Create an order and its lines in one transaction.
pub fn create_order(conn: &mut Connection, input: &NewOrder) -> Result<Order> {
    let id = gen_id();
    let now = now();
    let tx = conn.transaction()?;
    insert_order(&tx, &id, input, now)?;
    tx.commit()?;
    Ok(new_order_record(id, input, now))
}

/// Create a crypto order together with the intent that settles it.
/// Either both rows exist afterwards or neither does.
pub fn create_order_with_intent(
    conn: &mut Connection,
    input: &NewOrder,
    intent: &PaymentIntent,
) -> Result<Order> {
    let id = gen_id();
    let now = now();
    let tx = conn.transaction()?;
    insert_order(&tx, &id, input, now)?;
    tx.execute(
        "INSERT INTO payment_intents (id, order_id, currency, fiat_amount, rate, crypto_amount,
                                      address, created_at, expires_at, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            &intent.id,
            &id,
            intent.currency.as_ref(),
            intent.fiat_amount.to_string(),
            intent.rate.to_string(),
            intent.crypto_amount.to_string(),
            &intent.address,
            intent.created_at,
            intent.expires_at,
            intent.state.as_ref(),
        ],
    )?;
    tx.commit()?;
    Ok(new_order_record(id, input, now))
}

fn load_lines(conn: &Connection, order: &mut Order) -> Result<()> {
    order.lines = query_all(
        conn,
        &format!(
            "SELECT {} FROM order_lines WHERE order_id = ?1 ORDER BY position",
            ORDER_LINE_COLS
        ),
        params![&order.id],
    )?;
    Ok(())
}

fn with_lines(conn: &Connection, order: Option<Order>) -> Result<Option<Order>> {
    let Some(mut order) = order else {
        return Ok(None);
    };
    load_lines(conn, &mut order)?;
    Ok(Some(order))
}

pub fn list_orders(conn: &Connection, filter: &OrderFilter) -> Result<Vec<Order>> {
    let mut where_clause = String::from("WHERE 1=1");
    let mut filter_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(status) = filter.status {
        where_clause.push_str(" AND status = ?");
        filter_params.push(Box::new(status.as_ref().to_string()));
    }
    if let Some(payment_status) = filter.payment_status {
        where_clause.push_str(" AND payment_status = ?");
        filter_params.push(Box::new(payment_status.as_ref().to_string()));
    }
    if let Some(method) = filter.payment_method {
        where_clause.push_str(" AND payment_method = ?");
        filter_params.push(Box::new(method.as_ref().to_string()));
    }
    filter_params.push(Box::new(filter.limit()));

    let sql = format!(
        "SELECT {} FROM orders {} ORDER BY created_at DESC, rowid DESC LIMIT ?",
        ORDER_COLS, where_clause
    );
    let param_refs: Vec<&dyn rusqlite::ToSql> = filter_params.iter().map(|b| b.as_ref()).collect();
    let mut orders: Vec<Order> = query_all(conn, &sql, param_refs.as_slice())?;
    for order in &mut orders {
        load_lines(conn, order)?;
    }
    Ok(orders)
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    let order = query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        params![id],
    )?;
    with_lines(conn, order)
}

pub fn get_order_by_number(conn: &Connection, order_number: &str) -> Result<Option<Order>> {
    let order = query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE order_number = ?1", ORDER_COLS),
        params![order_number],
    )?;
    with_lines(conn, order)
}

pub fn get_order_by_payment_ref(conn: &Connection, payment_ref: &str) -> Result<Option<Order>> {
    let order = query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE payment_ref = ?1", ORDER_COLS),
        params![payment_ref],
    )?;
    with_lines(conn, order)
}

/// Terminal intent fields written in the same transaction as the order transition.
#[derive(Debug, Clone)]
pub struct IntentSettlement {
    pub intent_id: String,
    pub state: IntentState,
    pub txid: Option<String>,
    pub received_amount: Option<Decimal>,
}

fn settle_intent(conn: &Connection, settlement: &IntentSettlement) -> Result<()> {
    conn.execute(
        "UPDATE payment_intents SET state = ?1, txid = ?2, received_amount = ?3
         WHERE id = ?4 AND state IN ('awaiting_payment', 'verifying')",
        params![
            settlement.state.as_ref(),
            &settlement.txid,
            settlement.received_amount.map(|a| a.to_string()),
            &settlement.intent_id,
        ],
    )?;
    Ok(())
}

/// Atomically move a pending order to completed/confirmed, returning whether this call won.
///
/// Uses compare-and-swap so concurrent confirmations (webhook, watcher, replays)
/// apply at most once.
///
/// Returns:
/// - `Ok(true)` if this call confirmed the order
/// - `Ok(false)` if the order was no longer pending
pub fn try_confirm_order(
    conn: &mut Connection,
    order_id: &str,
    confirmation_ref: &str,
    settlement: Option<&IntentSettlement>,
) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let affected = tx.execute(
        "UPDATE orders SET status = ?1, payment_status = ?2, confirmation_ref = ?3, updated_at = ?4
         WHERE id = ?5 AND status = 'pending' AND payment_status = 'pending'",
        params![
            OrderStatus::Completed.as_ref(),
            PaymentStatus::Confirmed.as_ref(),
            confirmation_ref,
            now(),
            order_id,
        ],
    )?;
    if affected == 0 {
        return Ok(false);
    }
    if let Some(settlement) = settlement {
        settle_intent(&tx, settlement)?;
    }
    tx.commit()?;
    Ok(true)
}

/// Atomically move a pending order to cancelled/failed. Orders are never deleted.
pub fn try_cancel_order(
    conn: &mut Connection,
    order_id: &str,
    settlement: Option<&IntentSettlement>,
) -> Result<bool> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let affected = tx.execute(
        "UPDATE orders SET status = ?1, payment_status = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'pending' AND payment_status = 'pending'",
        params![
            OrderStatus::Cancelled.as_ref(),
            PaymentStatus::Failed.as_ref(),
            now(),
            order_id,
        ],
    )?;
    if affected == 0 {
        return Ok(false);
    }
    if let Some(settlement) = settlement {
        settle_intent(&tx, settlement)?;
    }
    tx.commit()?;
    Ok(true)
}

/// Move a paid order whose status is one of `from` to `to`.
///
/// Single compare-and-swap UPDATE; `Ok(false)` when the order is not in a
/// matching state (unpaid, already moved, or unknown).
fn transition_paid_order(
    conn: &Connection,
    order_id: &str,
    from: &[OrderStatus],
    to: OrderStatus,
    to_payment: PaymentStatus,
) -> Result<bool> {
    let from_list = from
        .iter()
        .map(|status| format!("'{}'", status.as_ref()))
        .collect::<Vec<_>>()
        .join(", ");
    let affected = conn.execute(
        &format!(
            "UPDATE orders SET status = ?1, payment_status = ?2, updated_at = ?3
             WHERE id = ?4 AND payment_status = 'confirmed' AND status IN ({})",
            from_list
        ),
        params![to.as_ref(), to_payment.as_ref(), now(), order_id],
    )?;
    Ok(affected > 0)
}

/// Completed → Processing: the merchant has started delivering a paid order.
pub fn try_start_processing(conn: &Connection, order_id: &str) -> Result<bool> {
    transition_paid_order(
        conn,
        order_id,
        &[OrderStatus::Completed],
        OrderStatus::Processing,
        PaymentStatus::Confirmed,
    )
}

/// Completed/Processing → Fulfilled.
pub fn try_fulfil_order(conn: &Connection, order_id: &str) -> Result<bool> {
    transition_paid_order(
        conn,
        order_id,
        &[OrderStatus::Completed, OrderStatus::Processing],
        OrderStatus::Fulfilled,
        PaymentStatus::Confirmed,
    )
}

/// Any paid order → Refunded, payment included. The money moves at the provider.
pub fn try_refund_order(conn: &Connection, order_id: &str) -> Result<bool> {
    transition_paid_order(
        conn,
        order_id,
        &[OrderStatus::Completed, OrderStatus::Processing, OrderStatus::Fulfilled],
        OrderStatus::Refunded,
        PaymentStatus::Refunded,
    )
}

// ============ Payment Intents ============

pub fn get_payment_intent(conn: &Connection, id: &str) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!("SELECT {} FROM payment_intents WHERE id = ?1", PAYMENT_INTENT_COLS),
        params![id],
    )
}

pub fn get_payment_intent_for_order(conn: &Connection, order_id: &str) -> Result<Option<PaymentIntent>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM payment_intents WHERE order_id = ?1",
            PAYMENT_INTENT_COLS
        ),
        params![order_id],
    )
}

/// Intents still waiting for settlement, paired with their order id.
pub fn list_open_payment_intents(conn: &Connection) -> Result<Vec<(String, PaymentIntent)>> {
    query_all(
        conn,
        &format!(
            "SELECT order_id, {} FROM payment_intents
             WHERE state IN ('awaiting_payment', 'verifying')
             ORDER BY created_at",
            PAYMENT_INTENT_COLS
        ),
        [],
    )
}

pub fn mark_payment_intent_verifying(conn: &Connection, id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE payment_intents SET state = 'verifying' WHERE id = ?1 AND state = 'awaiting_payment'",
        params![id],
    )?;
    Ok(affected > 0)
}

/// Transactions already attributed to some intent.
pub fn list_claimed_txids(conn: &Connection, currency: CryptoCurrency) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT txid FROM payment_intents WHERE currency = ?1 AND txid IS NOT NULL",
    )?;
    let rows = stmt.query_map(params![currency.as_ref()], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

// ============ Webhook Event Deduplication ============

/// Atomically record a webhook event, returning true if this is a new event.
/// Returns false if the event was already processed (replay).
///
/// Uses INSERT OR IGNORE for atomicity - if the (provider, event_id) pair
/// already exists, the insert is silently ignored and we return false.
pub fn try_record_webhook_event(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let id = gen_id();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, provider, event_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, provider, event_id, now()],
    )?;
    Ok(affected > 0)
}

pub fn webhook_event_exists(conn: &Connection, provider: &str, event_id: &str) -> Result<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM webhook_events WHERE provider = ?1 AND event_id = ?2)",
        params![provider, event_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}
