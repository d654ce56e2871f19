//! Property-based tests for the pricing engine and the gateway hash scheme.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use freshbasket_api::services::payu::{format_amount, request_hash, response_hash};
use freshbasket_api::services::pricing::{
    price, CartLine, CatalogEntry, PricingCatalog, PricingConfig,
};

fn pricing_config() -> PricingConfig {
    PricingConfig {
        free_delivery_threshold: dec!(199),
        delivery_fee: dec!(29),
        handling_charge: dec!(5),
        platform_fee: dec!(3),
        gst_rate_percent: dec!(5),
    }
}

/// (unit price in paise, quantity); stock is held above any generated
/// quantity so pricing always succeeds.
fn cart_strategy() -> impl Strategy<Value = Vec<(u64, i32)>> {
    prop::collection::vec((100u64..=50_000, 1i32..=9), 1..=8)
}

fn build_cart(entries: &[(u64, i32)]) -> (Vec<CartLine>, PricingCatalog) {
    let mut catalog = PricingCatalog::new();
    let mut lines = Vec::new();
    for (index, (paise, quantity)) in entries.iter().enumerate() {
        let product_id = Uuid::from_u128(index as u128 + 1);
        catalog.insert(
            product_id,
            None,
            CatalogEntry {
                name: format!("Item {index}"),
                sku: format!("SKU-{index}"),
                unit_price: Decimal::new(*paise as i64, 2),
                stock: 100,
            },
        );
        lines.push(CartLine {
            product_id,
            variant_id: None,
            quantity: *quantity,
        });
    }
    (lines, catalog)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// For fixed inputs, pricing twice yields identical output.
    #[test]
    fn pricing_is_deterministic(entries in cart_strategy(), discount_paise in 0u64..=10_000) {
        let (lines, catalog) = build_cart(&entries);
        let discount = Decimal::new(discount_paise as i64, 2);
        let config = pricing_config();

        let first = price(&config, &lines, &catalog, discount).unwrap();
        let second = price(&config, &lines, &catalog, discount).unwrap();
        prop_assert_eq!(first, second);
    }

    /// total == subtotal - discount + delivery + handling + platform + gst,
    /// exact to the cent, and total is never negative.
    #[test]
    fn total_decomposes_exactly(entries in cart_strategy(), discount_paise in 0u64..=100_000) {
        let (lines, catalog) = build_cart(&entries);
        let discount = Decimal::new(discount_paise as i64, 2);
        let priced = price(&pricing_config(), &lines, &catalog, discount).unwrap();

        let recomposed = priced.subtotal - priced.discount
            + priced.delivery_fee
            + priced.handling_charge
            + priced.platform_fee
            + priced.gst;
        prop_assert_eq!(priced.total, recomposed);
        prop_assert!(priced.total >= Decimal::ZERO);
        // Every component is already at minor-unit precision.
        prop_assert_eq!(priced.total, priced.total.round_dp(2));
    }

    /// Line totals always sum to the subtotal.
    #[test]
    fn line_totals_sum_to_subtotal(entries in cart_strategy()) {
        let (lines, catalog) = build_cart(&entries);
        let priced = price(&pricing_config(), &lines, &catalog, Decimal::ZERO).unwrap();
        let sum: Decimal = priced.lines.iter().map(|l| l.line_total).sum();
        prop_assert_eq!(priced.subtotal, sum);
    }

    /// Amount serialization: integral values carry no decimals, fractional
    /// values exactly two, and the string parses back to the rounded value.
    #[test]
    fn amount_formatting_round_trips(paise in 1u64..=10_000_000) {
        let amount = Decimal::new(paise as i64, 2);
        let formatted = format_amount(amount);
        if amount.fract().is_zero() {
            prop_assert!(!formatted.contains('.'), "integral amount got decimals: {formatted}");
        } else {
            let (_, frac) = formatted.split_once('.').expect("fractional amount lost decimals");
            prop_assert_eq!(frac.len(), 2);
        }
        prop_assert_eq!(formatted.parse::<Decimal>().unwrap(), amount);
    }

    /// Request and response hashes are 128 hex chars and any single-field
    /// change produces a different digest.
    #[test]
    fn hashes_are_sensitive_to_every_field(
        txn_suffix in 0u64..=999_999,
        amount_paise in 100u64..=1_000_000,
    ) {
        let txnid = format!("TXN1700000000000{txn_suffix:06}");
        let amount = format_amount(Decimal::new(amount_paise as i64, 2));

        let base = response_hash(
            "gtKFFx", "eCwWELxi", "success",
            "asha@example.com", "Asha", "ORD-1A2B3C4D", &amount, &txnid,
        );
        prop_assert_eq!(base.len(), 128);

        let other_amount = format_amount(Decimal::new(amount_paise as i64 + 1, 2));
        let tampered_amount = response_hash(
            "gtKFFx", "eCwWELxi", "success",
            "asha@example.com", "Asha", "ORD-1A2B3C4D", &other_amount, &txnid,
        );
        prop_assert_ne!(&base, &tampered_amount);

        let tampered_status = response_hash(
            "gtKFFx", "eCwWELxi", "failure",
            "asha@example.com", "Asha", "ORD-1A2B3C4D", &amount, &txnid,
        );
        prop_assert_ne!(&base, &tampered_status);

        let tampered_email = response_hash(
            "gtKFFx", "eCwWELxi", "success",
            "asha@example.org", "Asha", "ORD-1A2B3C4D", &amount, &txnid,
        );
        prop_assert_ne!(&base, &tampered_email);
    }

    /// The request-side digest is stable and key/salt dependent.
    #[test]
    fn request_hash_depends_on_credentials(amount_paise in 100u64..=1_000_000) {
        let amount = format_amount(Decimal::new(amount_paise as i64, 2));
        let a = request_hash("gtKFFx", "eCwWELxi", "TXN1", &amount, "ORD-1", "Asha", "a@b.com");
        let b = request_hash("gtKFFx", "eCwWELxi", "TXN1", &amount, "ORD-1", "Asha", "a@b.com");
        prop_assert_eq!(&a, &b);
        let other_salt = request_hash("gtKFFx", "different", "TXN1", &amount, "ORD-1", "Asha", "a@b.com");
        prop_assert_ne!(&a, &other_salt);
    }
}
