//! Cart pricing.
//!
//! Pure computation: cart lines plus a catalog snapshot in, a fully priced
//! cart out. No clock, no randomness, no I/O, so identical inputs always
//! produce identical output. The order service prices every order from this
//! module at creation time; client-submitted totals are never used.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{config::AppConfig, errors::ServiceError};

/// Business constants for fee and tax computation.
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub free_delivery_threshold: Decimal,
    pub delivery_fee: Decimal,
    pub handling_charge: Decimal,
    pub platform_fee: Decimal,
    pub gst_rate_percent: Decimal,
}

impl PricingConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            free_delivery_threshold: cfg.free_delivery_threshold,
            delivery_fee: cfg.delivery_fee,
            handling_charge: cfg.handling_charge,
            platform_fee: cfg.platform_fee,
            gst_rate_percent: cfg.gst_rate_percent,
        }
    }
}

/// One requested cart line, as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// Catalog data needed to price one (product, variant) pair.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub stock: i32,
}

/// Point-in-time catalog snapshot the engine prices against.
#[derive(Debug, Clone, Default)]
pub struct PricingCatalog {
    entries: HashMap<(Uuid, Option<Uuid>), CatalogEntry>,
}

impl PricingCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, product_id: Uuid, variant_id: Option<Uuid>, entry: CatalogEntry) {
        self.entries.insert((product_id, variant_id), entry);
    }

    pub fn get(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Option<&CatalogEntry> {
        self.entries.get(&(product_id, variant_id))
    }
}

/// A priced cart line with its price snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub line_total: Decimal,
}

/// Output of the pricing engine. Invariant:
/// `total == subtotal - discount + delivery_fee + handling_charge +
/// platform_fee + gst`, exact to the minor unit, and `total >= 0`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub delivery_fee: Decimal,
    pub handling_charge: Decimal,
    pub platform_fee: Decimal,
    pub gst: Decimal,
    pub total: Decimal,
    pub savings: Decimal,
}

/// Round-half-up at two decimals; the single rounding rule for all money.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Prices a cart against a catalog snapshot.
///
/// Fails atomically: any unknown line or bad quantity rejects the whole
/// computation with nothing partially priced. The stock check here is
/// fail-fast only; reservation re-checks transactionally.
pub fn price(
    config: &PricingConfig,
    lines: &[CartLine],
    catalog: &PricingCatalog,
    discount: Decimal,
) -> Result<PricedCart, ServiceError> {
    if lines.is_empty() {
        return Err(ServiceError::ValidationError(
            "cart must contain at least one item".into(),
        ));
    }

    let mut priced_lines = Vec::with_capacity(lines.len());
    let mut subtotal = Decimal::ZERO;

    for line in lines {
        if line.quantity < 1 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be at least 1 for product {}",
                line.product_id
            )));
        }
        let entry = catalog.get(line.product_id, line.variant_id).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "unknown product {} in cart",
                line.product_id
            ))
        })?;
        if line.quantity > entry.stock {
            return Err(ServiceError::InsufficientStock(format!(
                "{} (requested {}, available {})",
                entry.name, line.quantity, entry.stock
            )));
        }

        let line_total = round_money(entry.unit_price * Decimal::from(line.quantity));
        subtotal += line_total;
        priced_lines.push(PricedLine {
            product_id: line.product_id,
            variant_id: line.variant_id,
            name: entry.name.clone(),
            sku: entry.sku.clone(),
            unit_price: entry.unit_price,
            quantity: line.quantity,
            line_total,
        });
    }

    let subtotal = round_money(subtotal);
    let discount = round_money(discount.clamp(Decimal::ZERO, subtotal));

    let delivery_waived = subtotal >= config.free_delivery_threshold;
    let delivery_fee = if delivery_waived {
        Decimal::ZERO
    } else {
        round_money(config.delivery_fee)
    };
    let handling_charge = round_money(config.handling_charge);
    let platform_fee = round_money(config.platform_fee);
    let gst = round_money(
        (subtotal - discount) * config.gst_rate_percent / Decimal::ONE_HUNDRED,
    );

    // Every component is already rounded, so the sum decomposes exactly.
    let total = subtotal - discount + delivery_fee + handling_charge + platform_fee + gst;
    let savings = discount
        + if delivery_waived {
            round_money(config.delivery_fee)
        } else {
            Decimal::ZERO
        };

    Ok(PricedCart {
        lines: priced_lines,
        subtotal,
        discount,
        delivery_fee,
        handling_charge,
        platform_fee,
        gst,
        total,
        savings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> PricingConfig {
        PricingConfig {
            free_delivery_threshold: dec!(199),
            delivery_fee: dec!(29),
            handling_charge: dec!(5),
            platform_fee: dec!(3),
            gst_rate_percent: dec!(5),
        }
    }

    fn catalog_with(entries: &[(Uuid, Option<Uuid>, &str, Decimal, i32)]) -> PricingCatalog {
        let mut catalog = PricingCatalog::new();
        for (pid, vid, name, price, stock) in entries {
            catalog.insert(
                *pid,
                *vid,
                CatalogEntry {
                    name: name.to_string(),
                    sku: format!("SKU-{}", name.to_uppercase().replace(' ', "-")),
                    unit_price: *price,
                    stock: *stock,
                },
            );
        }
        catalog
    }

    #[test]
    fn prices_a_cart_above_the_free_delivery_threshold() {
        let pid = Uuid::new_v4();
        let catalog = catalog_with(&[(pid, None, "Basmati Rice 5kg", dec!(125), 10)]);
        let lines = vec![CartLine {
            product_id: pid,
            variant_id: None,
            quantity: 2,
        }];

        let priced = price(&config(), &lines, &catalog, Decimal::ZERO).unwrap();
        assert_eq!(priced.subtotal, dec!(250));
        assert_eq!(priced.delivery_fee, dec!(0));
        assert_eq!(priced.handling_charge, dec!(5));
        assert_eq!(priced.platform_fee, dec!(3));
        assert_eq!(priced.gst, dec!(12.50));
        assert_eq!(priced.total, dec!(270.50));
        assert_eq!(priced.savings, dec!(29));
    }

    #[test]
    fn charges_delivery_below_the_threshold() {
        let pid = Uuid::new_v4();
        let catalog = catalog_with(&[(pid, None, "Curd 400g", dec!(35), 20)]);
        let lines = vec![CartLine {
            product_id: pid,
            variant_id: None,
            quantity: 2,
        }];

        let priced = price(&config(), &lines, &catalog, Decimal::ZERO).unwrap();
        assert_eq!(priced.subtotal, dec!(70));
        assert_eq!(priced.delivery_fee, dec!(29));
        assert_eq!(priced.gst, dec!(3.50));
        assert_eq!(priced.total, dec!(110.50));
        assert_eq!(priced.savings, dec!(0));
    }

    #[test]
    fn gst_is_computed_after_discount() {
        let pid = Uuid::new_v4();
        let catalog = catalog_with(&[(pid, None, "Ghee 1L", dec!(300), 4)]);
        let lines = vec![CartLine {
            product_id: pid,
            variant_id: None,
            quantity: 1,
        }];

        let priced = price(&config(), &lines, &catalog, dec!(50)).unwrap();
        assert_eq!(priced.discount, dec!(50));
        // 5% of (300 - 50)
        assert_eq!(priced.gst, dec!(12.50));
        assert_eq!(priced.total, dec!(300) - dec!(50) + dec!(5) + dec!(3) + dec!(12.50));
        assert_eq!(priced.savings, dec!(79));
    }

    #[test]
    fn variant_price_wins_over_product_price() {
        let pid = Uuid::new_v4();
        let vid = Uuid::new_v4();
        let catalog = catalog_with(&[
            (pid, None, "Milk 1L", dec!(60), 5),
            (pid, Some(vid), "Milk 500ml", dec!(32), 7),
        ]);
        let lines = vec![CartLine {
            product_id: pid,
            variant_id: Some(vid),
            quantity: 3,
        }];

        let priced = price(&config(), &lines, &catalog, Decimal::ZERO).unwrap();
        assert_eq!(priced.lines[0].unit_price, dec!(32));
        assert_eq!(priced.lines[0].line_total, dec!(96));
    }

    #[test]
    fn unknown_product_fails_the_whole_computation() {
        let pid = Uuid::new_v4();
        let catalog = catalog_with(&[(pid, None, "Bread", dec!(40), 5)]);
        let lines = vec![
            CartLine {
                product_id: pid,
                variant_id: None,
                quantity: 1,
            },
            CartLine {
                product_id: Uuid::new_v4(),
                variant_id: None,
                quantity: 1,
            },
        ];

        let err = price(&config(), &lines, &catalog, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn over_stock_quantity_is_rejected_fast() {
        let pid = Uuid::new_v4();
        let catalog = catalog_with(&[(pid, None, "Paneer 200g", dec!(90), 2)]);
        let lines = vec![CartLine {
            product_id: pid,
            variant_id: None,
            quantity: 5,
        }];

        let err = price(&config(), &lines, &catalog, Decimal::ZERO).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientStock(_)));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let pid = Uuid::new_v4();
        let catalog = catalog_with(&[(pid, None, "Eggs 6pc", dec!(48), 10)]);
        let lines = vec![CartLine {
            product_id: pid,
            variant_id: None,
            quantity: 0,
        }];

        assert!(matches!(
            price(&config(), &lines, &catalog, Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn empty_cart_is_rejected() {
        let catalog = PricingCatalog::new();
        assert!(matches!(
            price(&config(), &[], &catalog, Decimal::ZERO),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn discount_is_clamped_to_subtotal() {
        let pid = Uuid::new_v4();
        let catalog = catalog_with(&[(pid, None, "Salt 1kg", dec!(20), 10)]);
        let lines = vec![CartLine {
            product_id: pid,
            variant_id: None,
            quantity: 1,
        }];

        let priced = price(&config(), &lines, &catalog, dec!(500)).unwrap();
        assert_eq!(priced.discount, dec!(20));
        // Fees still apply, so the floor is fees + gst(0), not a negative total.
        assert_eq!(priced.total, dec!(29) + dec!(5) + dec!(3));
        assert!(priced.total >= Decimal::ZERO);
    }

    #[test]
    fn rounding_is_half_up_at_two_decimals() {
        assert_eq!(round_money(dec!(1.005)), dec!(1.01));
        assert_eq!(round_money(dec!(1.004)), dec!(1.00));
        assert_eq!(round_money(dec!(12.345)), dec!(12.35));
    }
}
