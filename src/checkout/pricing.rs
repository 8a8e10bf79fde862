use rust_decimal::Decimal;

use crate::models::{Cart, Totals};
use crate::util::round_cents;

/// Price a cart: coupon discount on the subtotal, then tax on what remains.
///
/// Each step is rounded half-up to cents, so `total = subtotal - discount + tax` holds exactly.
pub fn price(cart: &Cart, tax_rate: Decimal) -> Totals {
    let subtotal = round_cents(cart.subtotal());
    let discount = cart
        .coupon()
        .map(|c| c.discount_for(subtotal))
        .unwrap_or(Decimal::ZERO);
    let taxable = subtotal - discount;
    let tax = round_cents(taxable * tax_rate);

    Totals {
        subtotal,
        discount,
        tax,
        total: taxable + tax,
    }
}
