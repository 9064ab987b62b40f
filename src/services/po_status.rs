//! Purchase-order lifecycle derivation.
//!
//! The status of an order is a function of its items' delivery state. The
//! deriver only advances an order out of `approved`; an order with no delivery
//! activity keeps whatever status it already carries.

use crate::entities::purchase_order::PurchaseOrderStatus;
use crate::entities::purchase_order_item;
use rust_decimal::Decimal;
use serde::Serialize;

/// Historical statuses that fold into `approved`.
pub const LEGACY_APPROVED_STATUSES: &[&str] = &["draft", "pending", "rejected"];

/// Historical statuses that fold into `delivered_completed`.
pub const LEGACY_COMPLETED_STATUSES: &[&str] = &["completed", "delivered"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemDelivery {
    Undelivered,
    Partial,
    FullyDelivered,
}

/// Classifies one item. Zero delivered is always `Undelivered`, even for a zero-quantity item.
pub fn classify(quantity: Decimal, delivered_quantity: Decimal) -> ItemDelivery {
    if delivered_quantity.is_zero() {
        ItemDelivery::Undelivered
    } else if delivered_quantity >= quantity {
        ItemDelivery::FullyDelivered
    } else {
        ItemDelivery::Partial
    }
}

pub fn classify_item(item: &purchase_order_item::Model) -> ItemDelivery {
    classify(item.quantity, item.delivered_quantity)
}

/// Status implied by the item classifications, or `None` when the order shows no delivery.
pub fn derive_status<I>(items: I) -> Option<PurchaseOrderStatus>
where
    I: IntoIterator<Item = ItemDelivery>,
{
    let mut any_item = false;
    let mut all_full = true;
    let mut any_delivery = false;

    for delivery in items {
        any_item = true;
        match delivery {
            ItemDelivery::FullyDelivered => any_delivery = true,
            ItemDelivery::Partial => {
                any_delivery = true;
                all_full = false;
            }
            ItemDelivery::Undelivered => all_full = false,
        }
    }

    if any_item && all_full {
        Some(PurchaseOrderStatus::DeliveredCompleted)
    } else if any_delivery {
        Some(PurchaseOrderStatus::PartiallyDelivered)
    } else {
        None
    }
}

/// The status to write, if any: the derived status when it differs from `current`.
pub fn next_status<I>(current: PurchaseOrderStatus, items: I) -> Option<PurchaseOrderStatus>
where
    I: IntoIterator<Item = ItemDelivery>,
{
    derive_status(items).filter(|derived| *derived != current)
}

/// Maps a stored status string, including historical values, onto the current enum.
/// Drives the legacy-status migration, so it is the one place the mapping lives.
pub fn normalize_legacy_status(raw: &str) -> PurchaseOrderStatus {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "approved" => PurchaseOrderStatus::Approved,
        "partially_delivered" => PurchaseOrderStatus::PartiallyDelivered,
        "delivered_completed" => PurchaseOrderStatus::DeliveredCompleted,
        s if LEGACY_COMPLETED_STATUSES.contains(&s) => PurchaseOrderStatus::DeliveredCompleted,
        s if LEGACY_APPROVED_STATUSES.contains(&s) => PurchaseOrderStatus::Approved,
        // anything unrecognised restarts the lifecycle
        _ => PurchaseOrderStatus::Approved,
    }
}
