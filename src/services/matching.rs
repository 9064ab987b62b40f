//! Typed match keys used to decide whether two independently-entered records
//! describe the same stock lineage or the same order line.
//!
//! Keys are compared field by field. Optional text fields collapse `None` and
//! `""` into a single empty value, so a posting with a missing description
//! matches another posting with a missing description but never one that
//! carries text.

use rust_decimal::Decimal;
use serde::Serialize;

/// Optional identifying text with `None` and `""` folded together.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MatchText(Option<String>);

impl MatchText {
    pub fn new(value: Option<&str>) -> Self {
        match value {
            Some(text) if !text.is_empty() => Self(Some(text.to_string())),
            _ => Self(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl std::fmt::Display for MatchText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0.as_deref().unwrap_or("<empty>"))
    }
}

/// Identity of an inventory record: `(project_no, part_no, description, unit_price)`.
///
/// `unit_price` is a decimal compared by value, so `2.5` and `2.50` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InventoryKey {
    pub project_no: MatchText,
    pub part_no: String,
    pub description: MatchText,
    pub unit_price: Decimal,
}

impl InventoryKey {
    pub fn new(
        project_no: Option<&str>,
        part_no: &str,
        description: Option<&str>,
        unit_price: Decimal,
    ) -> Self {
        Self {
            project_no: MatchText::new(project_no),
            part_no: part_no.to_string(),
            description: MatchText::new(description),
            unit_price: unit_price.normalize(),
        }
    }

    /// Key for an invoice line posted to stock. A line without a price posts at zero cost.
    pub fn for_posting(
        project_no: Option<&str>,
        part_no: &str,
        description: Option<&str>,
        unit_price: Option<Decimal>,
    ) -> Self {
        Self::new(
            project_no,
            part_no,
            description,
            unit_price.unwrap_or(Decimal::ZERO),
        )
    }

    pub fn of_record(record: &crate::entities::inventory_record::Model) -> Self {
        Self::new(
            record.project_no.as_deref(),
            &record.part_no,
            record.description.as_deref(),
            record.unit_price,
        )
    }

    pub fn matches(&self, record: &crate::entities::inventory_record::Model) -> bool {
        *self == Self::of_record(record)
    }
}

impl std::fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "project {} / part {} / {} @ {}",
            self.project_no, self.part_no, self.description, self.unit_price
        )
    }
}

/// Identity used to count an invoice line against a purchase-order item:
/// `(po_number, part_no, material_no)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeliveryKey {
    pub po_number: String,
    pub part_no: String,
    pub material_no: MatchText,
}

impl DeliveryKey {
    pub fn new(po_number: &str, part_no: &str, material_no: Option<&str>) -> Self {
        Self {
            po_number: po_number.to_string(),
            part_no: part_no.to_string(),
            material_no: MatchText::new(material_no),
        }
    }

    pub fn of_item(po_number: &str, item: &crate::entities::purchase_order_item::Model) -> Self {
        Self::new(po_number, &item.part_no, item.material_no.as_deref())
    }
}
