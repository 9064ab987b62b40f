use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    db::DbPool,
    entities::{
        purchase_order::{self, Entity as PurchaseOrder, OrderType, PurchaseOrderStatus},
        purchase_order_item::{self, Entity as PurchaseOrderItem},
    },
    errors::ServiceError,
    events::{emit, Event, EventSender},
    services::reconciliation::ReconciliationService,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PurchaseOrderItemInput {
    #[validate(length(min = 1, message = "part_no must not be empty"))]
    pub part_no: String,
    pub material_no: Option<String>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub penalty_percentage: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderCommand {
    /// Left empty to have one assigned as `PO-<year>-<seq>`
    #[validate(length(min = 1, message = "po_number must not be empty when given"))]
    pub po_number: Option<String>,
    pub order_type: OrderType,
    pub project_no: Option<String>,
    pub counterparty: Option<String>,
    pub order_date: Option<NaiveDate>,
    /// Customer order this supplier order fulfils
    pub linked_po_id: Option<i64>,
    pub items: Vec<PurchaseOrderItemInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchaseOrderWithItems {
    pub order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
}

/// Formats the `seq`-th order number of `year`.
pub fn format_po_number(year: i32, seq: u32) -> String {
    format!("PO-{}-{:04}", year, seq)
}

/// Sequence part of a generated number for `year`, if `po_number` is one.
pub fn parse_po_sequence(po_number: &str, year: i32) -> Option<u32> {
    po_number
        .strip_prefix(&format!("PO-{}-", year))
        .and_then(|seq| seq.parse().ok())
}

fn validate_items(items: &[PurchaseOrderItemInput]) -> Result<(), ServiceError> {
    let mut errors = ValidationErrors::new();
    for item in items {
        item.validate()?;
        if item.quantity < Decimal::ZERO {
            let mut err = ValidationError::new("quantity");
            err.message = Some(format!("quantity for part {} must not be negative", item.part_no).into());
            errors.add("items", err);
        }
        if item.unit_price.is_some_and(|p| p < Decimal::ZERO)
            || item.penalty_percentage.is_some_and(|p| p < Decimal::ZERO)
        {
            let mut err = ValidationError::new("amount");
            err.message =
                Some(format!("prices for part {} must not be negative", item.part_no).into());
            errors.add("items", err);
        }
    }
    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

/// Purchase-order write paths. Each one reconciles the order after commit,
/// so derived fields always reflect the invoices on file.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
    reconciliation: ReconciliationService,
}

impl PurchaseOrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<EventSender>,
        reconciliation: ReconciliationService,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            reconciliation,
        }
    }

    #[instrument(skip(self, cmd), fields(order_type = ?cmd.order_type))]
    pub async fn create_purchase_order(
        &self,
        cmd: CreatePurchaseOrderCommand,
    ) -> Result<PurchaseOrderWithItems, ServiceError> {
        cmd.validate()?;
        validate_items(&cmd.items)?;

        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let po_number = match cmd.po_number.as_deref().map(str::trim) {
            Some(given) if !given.is_empty() => given.to_string(),
            _ => {
                let year = cmd.order_date.unwrap_or_else(|| Utc::now().date_naive()).year();
                next_po_number(&txn, year).await?
            }
        };

        if find_order(&txn, &po_number).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Purchase order {} already exists",
                po_number
            )));
        }

        if let Some(customer_po_id) = cmd.linked_po_id {
            if cmd.order_type != OrderType::Supplier {
                return Err(ServiceError::InvalidLinkage(format!(
                    "Only supplier orders can be linked; {} is a customer order",
                    po_number
                )));
            }
            ensure_linkable(&txn, None, customer_po_id).await?;
        }

        let now = Utc::now();
        let order = purchase_order::ActiveModel {
            po_number: Set(po_number.clone()),
            order_type: Set(cmd.order_type),
            status: Set(PurchaseOrderStatus::Approved),
            linked_po_id: Set(cmd.linked_po_id),
            project_no: Set(cmd.project_no.clone()),
            counterparty: Set(cmd.counterparty.clone()),
            order_date: Set(cmd.order_date),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        insert_items(&txn, order.id, &cmd.items).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(po_number = %po_number, items = cmd.items.len(), "Purchase order created");

        if let Some(customer_po_id) = order.linked_po_id {
            emit(
                &self.event_sender,
                Event::PurchaseOrderLinked {
                    supplier_po_id: order.id,
                    customer_po_id: Some(customer_po_id),
                },
            )
            .await;
        }

        // invoices may already reference this number
        self.reconciliation.reconcile_after_commit(&po_number).await;
        self.find_by_po_number(&po_number).await
    }

    /// Bulk item edit: the order's items are replaced in one transaction.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn replace_items(
        &self,
        po_id: i64,
        items: Vec<PurchaseOrderItemInput>,
    ) -> Result<PurchaseOrderWithItems, ServiceError> {
        validate_items(&items)?;

        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let order = PurchaseOrder::find_by_id(po_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| order_not_found(po_id))?;

        PurchaseOrderItem::delete_many()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(order.id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        insert_items(&txn, order.id, &items).await?;

        let mut active: purchase_order::ActiveModel = order.clone().into();
        active.updated_at = Set(Utc::now());
        active.update(&txn).await.map_err(ServiceError::db_error)?;

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(po_number = %order.po_number, "Purchase order items replaced");

        self.reconciliation
            .reconcile_after_commit(&order.po_number)
            .await;
        self.find_by_po_number(&order.po_number).await
    }

    /// Manual penalty edit. `penalty_amount` follows on the reconciliation that runs afterwards.
    #[instrument(skip(self))]
    pub async fn set_penalty_percentage(
        &self,
        item_id: i64,
        penalty_percentage: Option<Decimal>,
    ) -> Result<purchase_order_item::Model, ServiceError> {
        if penalty_percentage.is_some_and(|p| p < Decimal::ZERO) {
            return Err(ServiceError::InvalidInput(
                "penalty_percentage must not be negative".to_string(),
            ));
        }

        let db = self.db_pool.as_ref();
        let item = PurchaseOrderItem::find_by_id(item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order item {} not found", item_id)))?;
        let order = PurchaseOrder::find_by_id(item.purchase_order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| order_not_found(item.purchase_order_id))?;

        let mut active: purchase_order_item::ActiveModel = item.into();
        active.penalty_percentage = Set(penalty_percentage);
        active.updated_at = Set(Utc::now());
        active.update(db).await.map_err(ServiceError::db_error)?;

        self.reconciliation
            .reconcile_after_commit(&order.po_number)
            .await;

        PurchaseOrderItem::find_by_id(item_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order item {} not found", item_id)))
    }

    /// Links a supplier order to the customer order it fulfils.
    #[instrument(skip(self))]
    pub async fn link_orders(
        &self,
        supplier_po_id: i64,
        customer_po_id: i64,
    ) -> Result<purchase_order::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let supplier = PurchaseOrder::find_by_id(supplier_po_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| order_not_found(supplier_po_id))?;
        if supplier.order_type != OrderType::Supplier {
            return Err(ServiceError::InvalidLinkage(format!(
                "{} is not a supplier order",
                supplier.po_number
            )));
        }
        ensure_linkable(&txn, Some(supplier.id), customer_po_id).await?;

        let mut active: purchase_order::ActiveModel = supplier.into();
        active.linked_po_id = Set(Some(customer_po_id));
        active.updated_at = Set(Utc::now());
        let supplier = active.update(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(supplier = %supplier.po_number, customer_po_id, "Purchase orders linked");
        emit(
            &self.event_sender,
            Event::PurchaseOrderLinked {
                supplier_po_id: supplier.id,
                customer_po_id: Some(customer_po_id),
            },
        )
        .await;
        Ok(supplier)
    }

    #[instrument(skip(self))]
    pub async fn unlink_order(
        &self,
        supplier_po_id: i64,
    ) -> Result<purchase_order::Model, ServiceError> {
        let db = self.db_pool.as_ref();
        let supplier = PurchaseOrder::find_by_id(supplier_po_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| order_not_found(supplier_po_id))?;
        if supplier.order_type != OrderType::Supplier {
            return Err(ServiceError::InvalidLinkage(format!(
                "{} is not a supplier order",
                supplier.po_number
            )));
        }

        let mut active: purchase_order::ActiveModel = supplier.into();
        active.linked_po_id = Set(None);
        active.updated_at = Set(Utc::now());
        let supplier = active.update(db).await.map_err(ServiceError::db_error)?;

        emit(
            &self.event_sender,
            Event::PurchaseOrderLinked {
                supplier_po_id: supplier.id,
                customer_po_id: None,
            },
        )
        .await;
        Ok(supplier)
    }

    pub async fn find_by_po_number(
        &self,
        po_number: &str,
    ) -> Result<PurchaseOrderWithItems, ServiceError> {
        let db = self.db_pool.as_ref();
        let order = find_order(db, po_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", po_number)))?;
        let items = PurchaseOrderItem::find()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(order.id))
            .order_by_asc(purchase_order_item::Column::LineNo)
            .order_by_asc(purchase_order_item::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;
        Ok(PurchaseOrderWithItems { order, items })
    }
}

fn order_not_found(id: i64) -> ServiceError {
    ServiceError::NotFound(format!("Purchase order {} not found", id))
}

async fn find_order<C>(conn: &C, po_number: &str) -> Result<Option<purchase_order::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    PurchaseOrder::find()
        .filter(purchase_order::Column::PoNumber.eq(po_number))
        .one(conn)
        .await
        .map_err(ServiceError::db_error)
}

async fn next_po_number(txn: &DatabaseTransaction, year: i32) -> Result<String, ServiceError> {
    let prefix = format!("PO-{}-", year);
    let highest = PurchaseOrder::find()
        .filter(purchase_order::Column::PoNumber.starts_with(&prefix))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?
        .iter()
        .filter_map(|order| parse_po_sequence(&order.po_number, year))
        .max()
        .unwrap_or(0);
    let next = highest.checked_add(1).ok_or_else(|| {
        ServiceError::Conflict(format!(
            "Purchase order numbers for {} are exhausted; give the number explicitly",
            year
        ))
    })?;
    Ok(format_po_number(year, next))
}

/// A customer order accepts at most one supplier order; `supplier_id` may already hold the link.
async fn ensure_linkable(
    txn: &DatabaseTransaction,
    supplier_id: Option<i64>,
    customer_po_id: i64,
) -> Result<(), ServiceError> {
    let customer = PurchaseOrder::find_by_id(customer_po_id)
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| order_not_found(customer_po_id))?;
    if customer.order_type != OrderType::Customer {
        return Err(ServiceError::InvalidLinkage(format!(
            "{} is not a customer order",
            customer.po_number
        )));
    }

    let mut existing = PurchaseOrder::find()
        .filter(purchase_order::Column::LinkedPoId.eq(customer_po_id));
    if let Some(id) = supplier_id {
        existing = existing.filter(purchase_order::Column::Id.ne(id));
    }
    if let Some(other) = existing.one(txn).await.map_err(ServiceError::db_error)? {
        return Err(ServiceError::InvalidLinkage(format!(
            "{} is already linked to supplier order {}",
            customer.po_number, other.po_number
        )));
    }
    Ok(())
}

async fn insert_items(
    txn: &DatabaseTransaction,
    purchase_order_id: i64,
    items: &[PurchaseOrderItemInput],
) -> Result<(), ServiceError> {
    let now = Utc::now();
    for (idx, item) in items.iter().enumerate() {
        purchase_order_item::ActiveModel {
            purchase_order_id: Set(purchase_order_id),
            line_no: Set(idx as i32 + 1),
            part_no: Set(item.part_no.clone()),
            material_no: Set(item.material_no.clone()),
            description: Set(item.description.clone()),
            quantity: Set(item.quantity),
            unit_price: Set(item.unit_price),
            delivered_quantity: Set(Decimal::ZERO),
            delivered_unit_price: Set(None),
            delivered_total_price: Set(Decimal::ZERO),
            balance_quantity_undelivered: Set(item.quantity),
            penalty_percentage: Set(item.penalty_percentage),
            penalty_amount: Set(None),
            invoice_no: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(())
}
