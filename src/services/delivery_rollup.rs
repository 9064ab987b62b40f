//! Delivered-state rollup for a single purchase-order item.
//!
//! Pure arithmetic over the invoice lines that match the item's
//! [`DeliveryKey`](super::matching::DeliveryKey). The reconciliation service
//! gathers the lines; this module only folds them.

use crate::config::PenaltyMode;
use crate::entities::purchase_order_item;
use rust_decimal::Decimal;
use serde::Serialize;

/// One invoice line counted against an item, in the order it was read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributingLine {
    pub invoice_no: String,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

/// The derived fields of a purchase-order item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveredRollup {
    pub delivered_quantity: Decimal,
    pub delivered_unit_price: Option<Decimal>,
    pub delivered_total_price: Decimal,
    pub balance_quantity_undelivered: Decimal,
    pub penalty_amount: Option<Decimal>,
    pub invoice_no: Option<String>,
}

impl DeliveredRollup {
    pub fn of_item(item: &purchase_order_item::Model) -> Self {
        Self {
            delivered_quantity: item.delivered_quantity,
            delivered_unit_price: item.delivered_unit_price,
            delivered_total_price: item.delivered_total_price,
            balance_quantity_undelivered: item.balance_quantity_undelivered,
            penalty_amount: item.penalty_amount,
            invoice_no: item.invoice_no.clone(),
        }
    }
}

pub fn compute_rollup(
    ordered_quantity: Decimal,
    penalty_percentage: Option<Decimal>,
    lines: &[ContributingLine],
    penalty_mode: PenaltyMode,
) -> DeliveredRollup {
    let delivered_quantity: Decimal = lines.iter().map(|l| l.quantity).sum();

    // first priced line wins
    let delivered_unit_price = lines.iter().find_map(|l| l.unit_price);

    let delivered_total_price = delivered_unit_price
        .map(|price| delivered_quantity * price)
        .unwrap_or(Decimal::ZERO);

    let mut invoice_numbers: Vec<&str> = Vec::new();
    for line in lines {
        if !line.invoice_no.is_empty() && !invoice_numbers.contains(&line.invoice_no.as_str()) {
            invoice_numbers.push(&line.invoice_no);
        }
    }
    let invoice_no = if invoice_numbers.is_empty() {
        None
    } else {
        Some(invoice_numbers.join(","))
    };

    DeliveredRollup {
        delivered_quantity,
        delivered_unit_price,
        delivered_total_price,
        balance_quantity_undelivered: ordered_quantity - delivered_quantity,
        penalty_amount: penalty_amount(penalty_percentage, delivered_total_price, penalty_mode),
        invoice_no,
    }
}

pub fn penalty_amount(
    penalty_percentage: Option<Decimal>,
    delivered_total_price: Decimal,
    mode: PenaltyMode,
) -> Option<Decimal> {
    match mode {
        PenaltyMode::Suppressed => None,
        PenaltyMode::Derived => penalty_percentage
            .filter(|_| !delivered_total_price.is_zero())
            .map(|pct| pct * delivered_total_price / Decimal::ONE_HUNDRED),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(invoice_no: &str, quantity: Decimal, unit_price: Option<Decimal>) -> ContributingLine {
        ContributingLine {
            invoice_no: invoice_no.to_string(),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn no_lines_means_nothing_delivered() {
        let r = compute_rollup(dec!(100), None, &[], PenaltyMode::Derived);
        assert_eq!(r.delivered_quantity, Decimal::ZERO);
        assert_eq!(r.delivered_unit_price, None);
        assert_eq!(r.delivered_total_price, Decimal::ZERO);
        assert_eq!(r.balance_quantity_undelivered, dec!(100));
        assert_eq!(r.invoice_no, None);
        assert_eq!(r.penalty_amount, None);
    }

    #[test]
    fn sums_quantities_and_takes_first_priced_line() {
        let lines = [
            line("INV-1", dec!(10), None),
            line("INV-2", dec!(15), Some(dec!(3.00))),
            line("INV-3", dec!(5), Some(dec!(9.99))),
        ];
        let r = compute_rollup(dec!(50), None, &lines, PenaltyMode::Suppressed);
        assert_eq!(r.delivered_quantity, dec!(30));
        assert_eq!(r.delivered_unit_price, Some(dec!(3)));
        assert_eq!(r.delivered_total_price, dec!(90));
        assert_eq!(r.balance_quantity_undelivered, dec!(20));
    }

    #[test]
    fn total_is_zero_without_any_price() {
        let lines = [line("INV-1", dec!(10), None)];
        let r = compute_rollup(dec!(10), None, &lines, PenaltyMode::Derived);
        assert_eq!(r.delivered_total_price, Decimal::ZERO);
        assert_eq!(r.balance_quantity_undelivered, Decimal::ZERO);
    }

    #[test]
    fn over_delivery_gives_negative_balance() {
        let lines = [line("INV-1", dec!(12), Some(dec!(1)))];
        let r = compute_rollup(dec!(10), None, &lines, PenaltyMode::Suppressed);
        assert_eq!(r.balance_quantity_undelivered, dec!(-2));
    }

    #[test]
    fn invoice_numbers_are_distinct_in_encounter_order() {
        let lines = [
            line("INV-9", dec!(1), None),
            line("INV-2", dec!(1), None),
            line("INV-9", dec!(1), None),
            line("INV-5", dec!(1), None),
        ];
        let r = compute_rollup(dec!(10), None, &lines, PenaltyMode::Suppressed);
        assert_eq!(r.invoice_no.as_deref(), Some("INV-9,INV-2,INV-5"));
    }

    #[test]
    fn suppressed_mode_always_writes_null_penalty() {
        let lines = [line("INV-1", dec!(10), Some(dec!(20)))];
        let r = compute_rollup(dec!(10), Some(dec!(5)), &lines, PenaltyMode::Suppressed);
        assert_eq!(r.penalty_amount, None);
    }

    #[test]
    fn derived_mode_applies_percentage_of_total() {
        let lines = [line("INV-1", dec!(10), Some(dec!(20)))];
        let r = compute_rollup(dec!(10), Some(dec!(5)), &lines, PenaltyMode::Derived);
        assert_eq!(r.penalty_amount, Some(dec!(10)));
    }

    #[test]
    fn derived_mode_needs_percentage_and_nonzero_total() {
        assert_eq!(penalty_amount(None, dec!(100), PenaltyMode::Derived), None);
        assert_eq!(
            penalty_amount(Some(dec!(5)), Decimal::ZERO, PenaltyMode::Derived),
            None
        );
    }

    #[test]
    fn stored_scale_does_not_make_a_rollup_differ() {
        let lines = [line("I", dec!(40), Some(dec!(2.5)))];
        let a = compute_rollup(dec!(100), None, &lines, PenaltyMode::Suppressed);
        let mut b = a.clone();
        b.delivered_quantity = dec!(40.0000);
        b.delivered_unit_price = Some(dec!(2.5000));
        assert_eq!(a, b);
        b.invoice_no = None;
        assert_ne!(a, b);
    }
}
