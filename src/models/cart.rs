use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CheckoutError;
use crate::models::{Coupon, CouponBook};
use crate::util::is_valid_email;

/// Option name → chosen value, e.g. {"License": "Extended"}
pub type OptionSelection = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    pub quantity: u32,
    /// Captured when the line was added; later catalog price changes don't apply
    pub unit_price: Decimal,
    #[serde(default)]
    pub options: OptionSelection,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    fn same_item(&self, product_id: &str, options: &OptionSelection) -> bool {
        self.product_id == product_id && &self.options == options
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
    coupon: Option<Coupon>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a line, merging with an existing line for the same product and options.
    /// A merged line keeps its original price snapshot.
    pub fn add(
        &mut self,
        product_id: &str,
        name: &str,
        unit_price: Decimal,
        quantity: u32,
        options: OptionSelection,
    ) -> Result<(), CheckoutError> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity);
        }
        if unit_price < Decimal::ZERO {
            return Err(CheckoutError::InvalidAmount);
        }

        if let Some(line) = self
            .lines
            .iter_mut()
            .find(|l| l.same_item(product_id, &options))
        {
            line.quantity = line.quantity.saturating_add(quantity);
            return Ok(());
        }

        self.lines.push(CartLine {
            product_id: product_id.to_string(),
            name: name.to_string(),
            quantity,
            unit_price,
            options,
        });
        Ok(())
    }

    /// Returns false if no such line exists.
    pub fn set_quantity(
        &mut self,
        product_id: &str,
        options: &OptionSelection,
        quantity: u32,
    ) -> Result<bool, CheckoutError> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity);
        }
        match self
            .lines
            .iter_mut()
            .find(|l| l.same_item(product_id, options))
        {
            Some(line) => {
                line.quantity = quantity;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn remove(&mut self, product_id: &str, options: &OptionSelection) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| !l.same_item(product_id, options));
        self.lines.len() != before
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn coupon(&self) -> Option<&Coupon> {
        self.coupon.as_ref()
    }

    /// Apply a coupon code. Re-applying the applied code is a no-op;
    /// a second, different code is rejected.
    pub fn apply_coupon(&mut self, code: &str, book: &CouponBook) -> Result<&Coupon, CheckoutError> {
        let coupon = book.resolve(code)?;
        if let Some(applied) = &self.coupon {
            if applied.code != coupon.code {
                return Err(CheckoutError::InvalidCoupon(format!(
                    "{} (coupon {} already applied)",
                    coupon.code, applied.code
                )));
            }
        }
        Ok(self.coupon.insert(coupon))
    }
}

/// Contact details for a guest checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    pub name: Option<String>,
}

impl Customer {
    /// Validate and normalize (trimmed, lowercased email; blank name dropped).
    pub fn new(email: &str, name: Option<&str>) -> Result<Self, CheckoutError> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(CheckoutError::InvalidCustomer(format!(
                "'{}' is not a valid email address",
                email
            )));
        }
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(String::from);
        Ok(Self { email, name })
    }
}
