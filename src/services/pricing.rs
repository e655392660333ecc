//! Prices a cart against a catalog snapshot.
//!
//! Pure: no I/O. The caller loads the products and persists the result.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

/// One requested cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// A cart line frozen at catalog values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedCart {
    pub items: Vec<PricedLine>,
    pub total_amount: Decimal,
    /// Lines whose product no longer exists
    pub skipped: Vec<Uuid>,
}

impl PricedCart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Prices `lines` in order.
///
/// Lines for unknown products are skipped and reported in
/// [`PricedCart::skipped`]. A line asking for more than the product's stock
/// fails the whole cart with `InsufficientStock`.
pub fn price_cart(
    lines: &[CartLine],
    catalog: &HashMap<Uuid, product::Model>,
) -> Result<PricedCart, ServiceError> {
    let mut items = Vec::with_capacity(lines.len());
    let mut skipped = Vec::new();
    let mut total_amount = Decimal::ZERO;

    for line in lines {
        if line.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity for product {} must be positive",
                line.product_id
            )));
        }

        let Some(product) = catalog.get(&line.product_id) else {
            warn!(product_id = %line.product_id, "Skipping cart line for missing product");
            skipped.push(line.product_id);
            continue;
        };

        if line.quantity > product.stock {
            return Err(ServiceError::InsufficientStock(product.name.clone()));
        }

        let priced = PricedLine {
            product_id: product.id,
            product_name: product.name.clone(),
            quantity: line.quantity,
            unit_price: product.price,
        };
        total_amount += priced.line_total();
        items.push(priced);
    }

    Ok(PricedCart {
        items,
        total_amount,
        skipped,
    })
}
