use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub active: bool,
    pub variants: Vec<ProductVariant>,
    pub created_at: i64,
}

/// One selectable option value, e.g. name "License", value "Extended".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub value: String,
    /// Added to the base price when this option is selected (may be negative)
    pub price_adjust: Decimal,
}

impl Product {
    /// Price of one unit with the given option selection.
    ///
    /// Returns `None` if any selected option does not exist on this product.
    pub fn unit_price(&self, options: &BTreeMap<String, String>) -> Option<Decimal> {
        let mut price = self.price;
        for (name, value) in options {
            let variant = self
                .variants
                .iter()
                .find(|v| v.name.eq_ignore_ascii_case(name) && v.value.eq_ignore_ascii_case(value))?;
            price += variant.price_adjust;
        }
        Some(price)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub variants: Vec<CreateProductVariant>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProductVariant {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub price_adjust: Decimal,
}
