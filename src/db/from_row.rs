//! Row mapping helpers: column lists kept next to the `FromRow` impls that read them.

use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Params, Row, types::Type};
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::*;

pub const PRODUCT_COLS: &str = "id, slug, name, description, price, active, created_at";

pub const PRODUCT_VARIANT_COLS: &str = "id, product_id, name, value, price_adjust";

pub const ORDER_COLS: &str = "id, order_number, subtotal, discount, tax, total, coupon_code, \
     status, payment_status, payment_method, customer_email, customer_name, payment_ref, \
     confirmation_ref, created_at, updated_at";

pub const ORDER_LINE_COLS: &str = "product_id, name, quantity, unit_price, line_total, options";

pub const PAYMENT_INTENT_COLS: &str = "id, currency, fiat_amount, rate, crypto_amount, address, \
     created_at, expires_at, state, txid, received_amount";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params, T::from_row).optional()?)
}

pub fn query_all<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, T::from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Decimals are stored as TEXT to keep exact precision.
pub fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_error(idx, e))
}

pub fn opt_decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Decimal::from_str(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn enum_at<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = strum::ParseError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            price: decimal_at(row, 4)?,
            active: row.get(5)?,
            variants: Vec::new(),
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for ProductVariant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ProductVariant {
            id: row.get(0)?,
            product_id: row.get(1)?,
            name: row.get(2)?,
            value: row.get(3)?,
            price_adjust: decimal_at(row, 4)?,
        })
    }
}

/// Lines are loaded separately.
impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            order_number: row.get(1)?,
            lines: Vec::new(),
            totals: Totals {
                subtotal: decimal_at(row, 2)?,
                discount: decimal_at(row, 3)?,
                tax: decimal_at(row, 4)?,
                total: decimal_at(row, 5)?,
            },
            coupon_code: row.get(6)?,
            status: enum_at(row, 7)?,
            payment_status: enum_at(row, 8)?,
            payment_method: enum_at(row, 9)?,
            customer_email: row.get(10)?,
            customer_name: row.get(11)?,
            payment_ref: row.get(12)?,
            confirmation_ref: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl FromRow for OrderLine {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let options: String = row.get(5)?;
        Ok(OrderLine {
            product_id: row.get(0)?,
            name: row.get(1)?,
            quantity: row.get(2)?,
            unit_price: decimal_at(row, 3)?,
            line_total: decimal_at(row, 4)?,
            options: serde_json::from_str(&options).map_err(|e| conversion_error(5, e))?,
        })
    }
}

/// Reads intent columns starting at `offset`.
fn intent_at(row: &Row, offset: usize) -> rusqlite::Result<PaymentIntent> {
    Ok(PaymentIntent {
        id: row.get(offset)?,
        currency: enum_at(row, offset + 1)?,
        fiat_amount: decimal_at(row, offset + 2)?,
        rate: decimal_at(row, offset + 3)?,
        crypto_amount: decimal_at(row, offset + 4)?,
        address: row.get(offset + 5)?,
        created_at: row.get(offset + 6)?,
        expires_at: row.get(offset + 7)?,
        state: enum_at(row, offset + 8)?,
        txid: row.get(offset + 9)?,
        received_amount: opt_decimal_at(row, offset + 10)?,
    })
}

impl FromRow for PaymentIntent {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        intent_at(row, 0)
    }
}

/// An open intent with the id of the order it settles (selected first).
impl FromRow for (String, PaymentIntent) {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok((row.get(0)?, intent_at(row, 1)?))
    }
}
