use std::collections::HashMap;

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::product;
use crate::errors::ServiceError;

/// Tax applied on top of the item subtotal, in percent.
pub const TAX_RATE_PERCENT: u32 = 2;

/// One product/quantity pair from a cart or checkout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Price fields of a catalog product, as used by the pricing rules.
/// Either field may be absent or zero for incompletely entered products.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogPrice {
    pub price: Option<Decimal>,
    pub offer_price: Option<Decimal>,
}

impl From<&product::Model> for CatalogPrice {
    fn from(p: &product::Model) -> Self {
        CatalogPrice {
            price: p.price,
            offer_price: p.offer_price,
        }
    }
}

/// Subtotal, tax, and final amount for a priced set of lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedTotal {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub amount: Decimal,
}

/// Effective unit price: the offer price when one is set and non-zero,
/// otherwise the list price, otherwise zero. A missing product prices at
/// zero rather than failing the whole checkout.
pub fn unit_price(price: Option<&CatalogPrice>) -> Decimal {
    let Some(p) = price else {
        return Decimal::ZERO;
    };
    match p.offer_price {
        Some(offer) if !offer.is_zero() => offer,
        _ => p.price.unwrap_or(Decimal::ZERO),
    }
}

/// Price a set of lines against a catalog lookup. Tax is a flat
/// percentage of the subtotal, rounded down to the nearest whole unit.
pub fn compute_total(lines: &[CartLine], catalog: &HashMap<Uuid, CatalogPrice>) -> PricedTotal {
    let subtotal: Decimal = lines
        .iter()
        .map(|line| unit_price(catalog.get(&line.product_id)) * Decimal::from(line.quantity))
        .sum();
    let tax = (subtotal * Decimal::from(TAX_RATE_PERCENT) / Decimal::from(100)).floor();
    PricedTotal {
        subtotal,
        tax,
        amount: subtotal + tax,
    }
}

/// Load current catalog prices for the referenced products and price the
/// lines against them. Always reads fresh rows so the stored amount can
/// never be steered by a stale or forged client total.
#[instrument(skip(db))]
pub async fn total_for_lines(
    db: &DatabaseConnection,
    lines: &[CartLine],
) -> Result<PricedTotal, ServiceError> {
    if lines.is_empty() {
        return Ok(PricedTotal {
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            amount: Decimal::ZERO,
        });
    }

    let ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();
    let products = product::Entity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(db)
        .await?;

    let catalog: HashMap<Uuid, CatalogPrice> = products
        .iter()
        .map(|p| (p.id, CatalogPrice::from(p)))
        .collect();

    Ok(compute_total(lines, &catalog))
}
