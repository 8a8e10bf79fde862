use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CheckoutError;
use crate::util::round_cents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountRule {
    /// Percentage of the subtotal, e.g. 10 for 10% off
    PercentOff(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub rule: DiscountRule,
}

impl Coupon {
    pub fn percent_off(code: &str, percent: Decimal) -> Self {
        Self {
            code: code.to_uppercase(),
            rule: DiscountRule::PercentOff(percent),
        }
    }

    /// Discount for a subtotal, rounded half-up to cents and never above the subtotal.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match self.rule {
            DiscountRule::PercentOff(percent) => subtotal * percent / Decimal::ONE_HUNDRED,
        };
        round_cents(raw).min(subtotal).max(Decimal::ZERO)
    }
}

/// The set of codes the store accepts.
#[derive(Debug, Clone)]
pub struct CouponBook {
    coupons: Vec<Coupon>,
}

impl Default for CouponBook {
    fn default() -> Self {
        Self {
            coupons: vec![Coupon::percent_off("SAVE10", Decimal::TEN)],
        }
    }
}

impl CouponBook {
    pub fn new(coupons: Vec<Coupon>) -> Self {
        Self { coupons }
    }

    /// Look up a code, ignoring case and surrounding whitespace.
    pub fn resolve(&self, code: &str) -> Result<Coupon, CheckoutError> {
        let normalized = code.trim().to_uppercase();
        self.coupons
            .iter()
            .find(|c| c.code == normalized)
            .cloned()
            .ok_or_else(|| CheckoutError::InvalidCoupon(code.trim().to_string()))
    }
}
