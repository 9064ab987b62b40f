//! Property-based tests for the ledger's pure derivations.
//!
//! Delivery rollup, status derivation and stock arithmetic are checked
//! against generated inputs, independent of any database.

use order_ledger::{
    config::PenaltyMode,
    entities::purchase_order::PurchaseOrderStatus,
    services::{
        delivery_rollup::{compute_rollup, ContributingLine},
        inventory_ledger::StockLevels,
        po_status::{classify, derive_status, next_status, ItemDelivery},
    },
};
use proptest::prelude::*;
use rust_decimal::Decimal;

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..100_000, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale))
}

fn price_strategy() -> impl Strategy<Value = Option<Decimal>> {
    prop::option::of((0i64..1_000_000).prop_map(|cents| Decimal::new(cents, 2)))
}

fn line_strategy() -> impl Strategy<Value = ContributingLine> {
    ("INV-[0-9]{1,3}", quantity_strategy(), price_strategy()).prop_map(
        |(invoice_no, quantity, unit_price)| ContributingLine {
            invoice_no,
            quantity,
            unit_price,
        },
    )
}

fn status_strategy() -> impl Strategy<Value = PurchaseOrderStatus> {
    prop_oneof![
        Just(PurchaseOrderStatus::Approved),
        Just(PurchaseOrderStatus::PartiallyDelivered),
        Just(PurchaseOrderStatus::DeliveredCompleted),
    ]
}

fn rank(status: PurchaseOrderStatus) -> u8 {
    match status {
        PurchaseOrderStatus::Approved => 0,
        PurchaseOrderStatus::PartiallyDelivered => 1,
        PurchaseOrderStatus::DeliveredCompleted => 2,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn balance_is_ordered_minus_delivered(
        ordered in quantity_strategy(),
        lines in prop::collection::vec(line_strategy(), 0..8),
        pct in prop::option::of(0i64..50).prop_map(|p| p.map(Decimal::from)),
    ) {
        let rollup = compute_rollup(ordered, pct, &lines, PenaltyMode::Derived);
        let delivered: Decimal = lines.iter().map(|l| l.quantity).sum();

        prop_assert_eq!(rollup.delivered_quantity, delivered);
        prop_assert_eq!(rollup.balance_quantity_undelivered, ordered - delivered);
        match rollup.delivered_unit_price {
            Some(price) => prop_assert_eq!(rollup.delivered_total_price, delivered * price),
            None => prop_assert_eq!(rollup.delivered_total_price, Decimal::ZERO),
        }
        prop_assert_eq!(rollup.invoice_no.is_none(), lines.is_empty());
    }

    #[test]
    fn suppressed_penalty_is_never_written(
        ordered in quantity_strategy(),
        lines in prop::collection::vec(line_strategy(), 0..8),
        pct in (0i64..50).prop_map(Decimal::from),
    ) {
        let rollup = compute_rollup(ordered, Some(pct), &lines, PenaltyMode::Suppressed);
        prop_assert_eq!(rollup.penalty_amount, None);
    }

    #[test]
    fn status_derivation_is_idempotent(
        current in status_strategy(),
        items in prop::collection::vec((quantity_strategy(), quantity_strategy()), 0..6),
    ) {
        let deliveries: Vec<ItemDelivery> =
            items.iter().map(|(q, d)| classify(*q, *d)).collect();

        let once = next_status(current, deliveries.iter().copied()).unwrap_or(current);
        let twice = next_status(once, deliveries.iter().copied());
        prop_assert_eq!(twice, None);
    }

    #[test]
    fn growing_deliveries_never_lower_the_derived_status(
        items in prop::collection::vec((quantity_strategy(), quantity_strategy(), quantity_strategy()), 1..6),
    ) {
        let before = derive_status(items.iter().map(|(q, d, _)| classify(*q, *d)));
        let after = derive_status(items.iter().map(|(q, d, extra)| classify(*q, *d + *extra)));

        let before_rank = before.map(rank).unwrap_or(0);
        let after_rank = after.map(rank).unwrap_or(0);
        prop_assert!(after_rank >= before_rank, "{:?} -> {:?}", before, after);
    }

    #[test]
    fn stock_balance_tracks_receipts_minus_sales(
        receipts in prop::collection::vec(quantity_strategy(), 1..6),
        sales in prop::collection::vec(quantity_strategy(), 0..6),
        price in (0i64..100_000).prop_map(|c| Decimal::new(c, 2)),
    ) {
        let mut levels = StockLevels::new(Decimal::ZERO, price);
        for incoming in &receipts {
            levels = levels.receive(*incoming);
        }
        for requested in &sales {
            if let Ok(next) = levels.consume(*requested) {
                levels = next;
            }
            prop_assert!(levels.balance() >= Decimal::ZERO);
        }

        prop_assert_eq!(levels.balance(), levels.quantity - levels.sold_quantity);
        prop_assert_eq!(levels.balance_amount(), levels.balance() * price);
    }
}
