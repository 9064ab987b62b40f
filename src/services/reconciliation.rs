use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::ReconciliationConfig,
    db::DbPool,
    entities::{
        customer_invoice::{self, Entity as CustomerInvoice},
        customer_invoice_line::{self, Entity as CustomerInvoiceLine},
        purchase_order::{self, Entity as PurchaseOrder, OrderType, PurchaseOrderStatus},
        purchase_order_item::{self, Entity as PurchaseOrderItem},
        supplier_invoice::{self, Entity as SupplierInvoice},
        supplier_invoice_line::{self, Entity as SupplierInvoiceLine},
    },
    errors::ServiceError,
    events::{emit, Event, EventSender},
    services::{
        delivery_rollup::{compute_rollup, ContributingLine, DeliveredRollup},
        matching::DeliveryKey,
        po_status::{classify, next_status},
    },
};

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub po_number: String,
    pub items_examined: usize,
    pub items_updated: usize,
    pub previous_status: PurchaseOrderStatus,
    pub status: PurchaseOrderStatus,
}

impl ReconciliationReport {
    pub fn status_changed(&self) -> bool {
        self.previous_status != self.status
    }
}

/// Recomputes delivered fields and status for one purchase order at a time.
///
/// Writes are independent statements on the pool, not a transaction: a run
/// that fails halfway leaves the rows it already wrote, and the next run
/// converges on the current invoice set.
#[derive(Clone)]
pub struct ReconciliationService {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
    config: ReconciliationConfig,
    order_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ReconciliationService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<EventSender>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            config,
            order_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Reconciles one order. Returns `None` when no order carries `po_number`.
    #[instrument(skip(self))]
    pub async fn reconcile(
        &self,
        po_number: &str,
    ) -> Result<Option<ReconciliationReport>, ServiceError> {
        counter!("order_ledger.reconciliation_runs", 1);

        if !self.config.serialize_per_order {
            return self.reconcile_unlocked(po_number).await;
        }

        let lock = self
            .order_locks
            .entry(po_number.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_unlocked(po_number).await
        };

        // Held only by the map and this run: nobody else is waiting.
        self.order_locks
            .remove_if(po_number, |_, held| Arc::strong_count(held) == 2);
        result
    }

    /// Runs after the triggering write has committed. Failures are logged,
    /// counted and announced, never returned.
    pub async fn reconcile_after_commit(&self, po_number: &str) -> Option<ReconciliationReport> {
        match self.reconcile(po_number).await {
            Ok(report) => report,
            Err(e) => {
                counter!("order_ledger.reconciliation_failures", 1);
                let failure = ServiceError::ReconciliationFailure(format!("{}: {}", po_number, e));
                error!(po_number = %po_number, error = %failure, "Reconciliation failed; derived fields left stale");
                emit(
                    &self.event_sender,
                    Event::ReconciliationFailed {
                        po_number: po_number.to_string(),
                        reason: e.to_string(),
                        timestamp: Utc::now(),
                    },
                )
                .await;
                None
            }
        }
    }

    /// Reconciles every order, oldest first. Stops at the first failure.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<Vec<ReconciliationReport>, ServiceError> {
        let po_numbers: Vec<String> = PurchaseOrder::find()
            .order_by_asc(purchase_order::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .map(|order| order.po_number)
            .collect();

        let mut reports = Vec::with_capacity(po_numbers.len());
        for po_number in po_numbers {
            if let Some(report) = self.reconcile(&po_number).await? {
                reports.push(report);
            }
        }
        info!(orders = reports.len(), "Reconciled all purchase orders");
        Ok(reports)
    }

    async fn reconcile_unlocked(
        &self,
        po_number: &str,
    ) -> Result<Option<ReconciliationReport>, ServiceError> {
        let db = self.db_pool.as_ref();

        let Some(order) = PurchaseOrder::find()
            .filter(purchase_order::Column::PoNumber.eq(po_number))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        else {
            warn!(po_number = %po_number, "No purchase order for reconciliation; skipping");
            return Ok(None);
        };

        let items = PurchaseOrderItem::find()
            .filter(purchase_order_item::Column::PurchaseOrderId.eq(order.id))
            .order_by_asc(purchase_order_item::Column::LineNo)
            .order_by_asc(purchase_order_item::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let lines_by_key = delivery_lines(db, &order.po_number, order.order_type).await?;

        let mut deliveries = Vec::with_capacity(items.len());
        let mut items_updated = 0;
        let now = Utc::now();

        for item in &items {
            let key = DeliveryKey::of_item(&order.po_number, item);
            let lines = lines_by_key.get(&key).map(Vec::as_slice).unwrap_or(&[]);
            let rollup = compute_rollup(
                item.quantity,
                item.penalty_percentage,
                lines,
                self.config.penalty_mode,
            );
            deliveries.push(classify(item.quantity, rollup.delivered_quantity));

            if rollup == DeliveredRollup::of_item(item) {
                continue;
            }

            let mut active: purchase_order_item::ActiveModel = item.clone().into();
            active.delivered_quantity = Set(rollup.delivered_quantity);
            active.delivered_unit_price = Set(rollup.delivered_unit_price);
            active.delivered_total_price = Set(rollup.delivered_total_price);
            active.balance_quantity_undelivered = Set(rollup.balance_quantity_undelivered);
            active.penalty_amount = Set(rollup.penalty_amount);
            active.invoice_no = Set(rollup.invoice_no);
            active.updated_at = Set(now);
            active.update(db).await.map_err(ServiceError::db_error)?;
            items_updated += 1;
        }

        let previous_status = order.status;
        let mut status = previous_status;
        if let Some(next) = next_status(previous_status, deliveries) {
            let mut active: purchase_order::ActiveModel = order.clone().into();
            active.status = Set(next);
            active.updated_at = Set(now);
            active.update(db).await.map_err(ServiceError::db_error)?;
            status = next;

            info!(po_number = %order.po_number, from = %previous_status, to = %next, "Purchase order status derived");
            emit(
                &self.event_sender,
                Event::PurchaseOrderStatusChanged {
                    po_number: order.po_number.clone(),
                    old_status: previous_status,
                    new_status: next,
                },
            )
            .await;
        }

        debug!(
            po_number = %order.po_number,
            items = items.len(),
            items_updated,
            "Reconciliation complete"
        );

        Ok(Some(ReconciliationReport {
            po_number: order.po_number,
            items_examined: items.len(),
            items_updated,
            previous_status,
            status,
        }))
    }
}

/// An invoice line reduced to the fields the rollup reads.
struct DeliveredLine {
    invoice_id: i64,
    part_no: String,
    material_no: Option<String>,
    quantity: Decimal,
    unit_price: Option<Decimal>,
}

/// Invoice lines of the order's own side, grouped by delivery key in read order.
async fn delivery_lines<C>(
    conn: &C,
    po_number: &str,
    order_type: OrderType,
) -> Result<HashMap<DeliveryKey, Vec<ContributingLine>>, ServiceError>
where
    C: ConnectionTrait,
{
    let (numbers, lines): (HashMap<i64, String>, Vec<DeliveredLine>) = match order_type {
        OrderType::Supplier => {
            let numbers: HashMap<i64, String> = SupplierInvoice::find()
                .filter(supplier_invoice::Column::PoNumber.eq(po_number))
                .all(conn)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|h| (h.id, h.invoice_no))
                .collect();
            if numbers.is_empty() {
                return Ok(HashMap::new());
            }
            let lines = SupplierInvoiceLine::find()
                .filter(supplier_invoice_line::Column::InvoiceId.is_in(numbers.keys().copied()))
                .order_by_asc(supplier_invoice_line::Column::InvoiceId)
                .order_by_asc(supplier_invoice_line::Column::Id)
                .all(conn)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|l| DeliveredLine {
                    invoice_id: l.invoice_id,
                    part_no: l.part_no,
                    material_no: l.material_no,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect();
            (numbers, lines)
        }
        OrderType::Customer => {
            let numbers: HashMap<i64, String> = CustomerInvoice::find()
                .filter(customer_invoice::Column::PoNumber.eq(po_number))
                .all(conn)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|h| (h.id, h.invoice_no))
                .collect();
            if numbers.is_empty() {
                return Ok(HashMap::new());
            }
            let lines = CustomerInvoiceLine::find()
                .filter(customer_invoice_line::Column::InvoiceId.is_in(numbers.keys().copied()))
                .order_by_asc(customer_invoice_line::Column::InvoiceId)
                .order_by_asc(customer_invoice_line::Column::Id)
                .all(conn)
                .await
                .map_err(ServiceError::db_error)?
                .into_iter()
                .map(|l| DeliveredLine {
                    invoice_id: l.invoice_id,
                    part_no: l.part_no,
                    material_no: l.material_no,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect();
            (numbers, lines)
        }
    };

    Ok(group_by_delivery_key(po_number, &numbers, lines))
}

fn group_by_delivery_key(
    po_number: &str,
    invoice_numbers: &HashMap<i64, String>,
    lines: Vec<DeliveredLine>,
) -> HashMap<DeliveryKey, Vec<ContributingLine>> {
    let mut grouped: HashMap<DeliveryKey, Vec<ContributingLine>> = HashMap::new();
    for line in lines {
        grouped
            .entry(DeliveryKey::new(
                po_number,
                &line.part_no,
                line.material_no.as_deref(),
            ))
            .or_default()
            .push(ContributingLine {
                invoice_no: invoice_numbers
                    .get(&line.invoice_id)
                    .cloned()
                    .unwrap_or_default(),
                quantity: line.quantity,
                unit_price: line.unit_price,
            });
    }
    grouped
}
