//! Stock ledger postings.
//!
//! Every posting runs on the caller's connection, normally the transaction
//! that also writes the invoice header and lines. A failure anywhere rolls
//! back the whole invoice.
//!
//! Records are never split or merged: a receipt with a new
//! [`InventoryKey`] opens a new record, and a sale draws only from the oldest
//! record carrying its key.

use std::collections::HashMap;

use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::entities::inventory_record::{self, Entity as InventoryRecord};
use crate::errors::ServiceError;
use crate::services::matching::InventoryKey;

/// Quantity arithmetic for one record, kept apart from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StockLevels {
    pub quantity: Decimal,
    pub sold_quantity: Decimal,
    pub unit_price: Decimal,
}

impl StockLevels {
    pub fn new(quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            quantity,
            sold_quantity: Decimal::ZERO,
            unit_price,
        }
    }

    pub fn of_record(record: &inventory_record::Model) -> Self {
        Self {
            quantity: record.quantity,
            sold_quantity: record.sold_quantity,
            unit_price: record.unit_price,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.quantity - self.sold_quantity
    }

    pub fn balance_amount(&self) -> Decimal {
        self.balance() * self.unit_price
    }

    pub fn receive(self, incoming: Decimal) -> Self {
        Self {
            quantity: self.quantity + incoming,
            ..self
        }
    }

    /// Fails with the available balance when `requested` exceeds it.
    pub fn consume(self, requested: Decimal) -> Result<Self, Decimal> {
        let available = self.balance();
        if requested > available {
            return Err(available);
        }
        Ok(Self {
            sold_quantity: self.sold_quantity + requested,
            ..self
        })
    }
}

/// One invoice line as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockPosting {
    pub invoice_no: String,
    pub project_no: Option<String>,
    pub part_no: String,
    pub description: Option<String>,
    pub material_no: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

impl StockPosting {
    pub fn key(&self) -> InventoryKey {
        InventoryKey::for_posting(
            self.project_no.as_deref(),
            &self.part_no,
            self.description.as_deref(),
            self.unit_price,
        )
    }
}

/// All records carrying `key`, oldest first.
pub async fn find_matching<C>(
    conn: &C,
    key: &InventoryKey,
) -> Result<Vec<inventory_record::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let candidates = InventoryRecord::find()
        .filter(inventory_record::Column::PartNo.eq(key.part_no.as_str()))
        .order_by_asc(inventory_record::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(candidates
        .into_iter()
        .filter(|record| key.matches(record))
        .collect())
}

/// Oldest record carrying `key`, the one a sale draws from.
pub async fn find_oldest<C>(
    conn: &C,
    key: &InventoryKey,
) -> Result<Option<inventory_record::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(find_matching(conn, key).await?.into_iter().next())
}

/// Supplier-side posting: add to the matching record or open a new one.
#[instrument(skip(conn, posting), fields(part_no = %posting.part_no, invoice_no = %posting.invoice_no))]
pub async fn receive<C>(
    conn: &C,
    posting: &StockPosting,
) -> Result<inventory_record::Model, ServiceError>
where
    C: ConnectionTrait,
{
    ensure_positive(posting)?;
    let key = posting.key();
    let now = Utc::now();

    let record = match find_oldest(conn, &key).await? {
        Some(existing) => {
            let levels = StockLevels::of_record(&existing).receive(posting.quantity);
            let mut active: inventory_record::ActiveModel = existing.into();
            active.quantity = Set(levels.quantity);
            active.balance = Set(levels.balance());
            active.balance_amount = Set(levels.balance_amount());
            active.last_invoice_no = Set(Some(posting.invoice_no.clone()));
            active.updated_at = Set(now);
            active.update(conn).await.map_err(ServiceError::db_error)?
        }
        None => {
            let levels = StockLevels::new(posting.quantity, key.unit_price);
            inventory_record::ActiveModel {
                project_no: Set(key.project_no.as_deref().map(str::to_string)),
                part_no: Set(posting.part_no.clone()),
                description: Set(key.description.as_deref().map(str::to_string)),
                material_no: Set(posting.material_no.clone()),
                unit_price: Set(levels.unit_price),
                quantity: Set(levels.quantity),
                sold_quantity: Set(levels.sold_quantity),
                balance: Set(levels.balance()),
                balance_amount: Set(levels.balance_amount()),
                last_invoice_no: Set(Some(posting.invoice_no.clone())),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(conn)
            .await
            .map_err(ServiceError::db_error)?
        }
    };

    counter!("order_ledger.stock_receipts", 1);
    debug!(record_id = record.id, balance = %record.balance, "Stock received");
    Ok(record)
}

/// Customer-side posting: draw from the oldest matching record only.
#[instrument(skip(conn, posting), fields(part_no = %posting.part_no, invoice_no = %posting.invoice_no))]
pub async fn consume<C>(
    conn: &C,
    posting: &StockPosting,
) -> Result<inventory_record::Model, ServiceError>
where
    C: ConnectionTrait,
{
    ensure_positive(posting)?;
    let key = posting.key();

    let existing = find_oldest(conn, &key)
        .await?
        .ok_or_else(|| ServiceError::NoMatchingInventory(key.to_string()))?;

    let levels = StockLevels::of_record(&existing)
        .consume(posting.quantity)
        .map_err(|available| insufficient(&key, posting.quantity, available))?;

    let mut active: inventory_record::ActiveModel = existing.into();
    active.sold_quantity = Set(levels.sold_quantity);
    active.balance = Set(levels.balance());
    active.balance_amount = Set(levels.balance_amount());
    active.last_invoice_no = Set(Some(posting.invoice_no.clone()));
    active.updated_at = Set(Utc::now());
    let record = active.update(conn).await.map_err(ServiceError::db_error)?;

    counter!("order_ledger.stock_consumptions", 1);
    debug!(record_id = record.id, balance = %record.balance, "Stock consumed");
    Ok(record)
}

/// Checks every sale line before anything is written.
///
/// Demand is summed per resolved record, so two lines drawing on the same
/// stock cannot jointly overdraw it.
#[instrument(skip(conn, postings), fields(lines = postings.len()))]
pub async fn prevalidate_consumption<C>(
    conn: &C,
    postings: &[StockPosting],
) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let mut demand: HashMap<i64, (inventory_record::Model, Decimal)> = HashMap::new();

    for posting in postings {
        ensure_positive(posting)?;
        let key = posting.key();
        let record = find_oldest(conn, &key).await?.ok_or_else(|| {
            warn!(key = %key, "Sale line has no matching stock");
            ServiceError::NoMatchingInventory(key.to_string())
        })?;

        if record.balance <= Decimal::ZERO {
            return Err(insufficient(&key, posting.quantity, record.balance));
        }

        let entry = demand
            .entry(record.id)
            .or_insert_with(|| (record, Decimal::ZERO));
        entry.1 += posting.quantity;

        let available = StockLevels::of_record(&entry.0).balance();
        if entry.1 > available {
            return Err(insufficient(&key, entry.1, available));
        }
    }

    Ok(())
}

fn ensure_positive(posting: &StockPosting) -> Result<(), ServiceError> {
    if posting.quantity <= Decimal::ZERO {
        return Err(ServiceError::InvalidInput(format!(
            "Posting quantity for part {} must be positive, got {}",
            posting.part_no, posting.quantity
        )));
    }
    Ok(())
}

fn insufficient(key: &InventoryKey, requested: Decimal, available: Decimal) -> ServiceError {
    ServiceError::InsufficientStock(format!(
        "{}: requested {}, available {}",
        key, requested, available
    ))
}
