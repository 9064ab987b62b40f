#![allow(dead_code)]

use std::sync::Arc;

use order_ledger::{
    config::{PenaltyMode, ReconciliationConfig},
    db::{self, DbConfig, DbPool},
    entities::{
        inventory_record::{self, Entity as InventoryRecord},
        purchase_order::OrderType,
    },
    events::{Event, EventSender},
    services::{
        invoices::{CreateInvoiceCommand, InvoiceLineInput},
        purchase_orders::{CreatePurchaseOrderCommand, PurchaseOrderItemInput, PurchaseOrderWithItems},
    },
    ServiceContainer, ServiceFactory,
};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tokio::sync::mpsc;

/// Services over a fresh, migrated in-memory SQLite database.
pub struct TestLedger {
    pub db: Arc<DbPool>,
    pub services: ServiceContainer,
    pub events: mpsc::Receiver<Event>,
}

impl TestLedger {
    pub async fn new() -> Self {
        Self::with_config(ReconciliationConfig::default()).await
    }

    pub async fn with_penalty_mode(penalty_mode: PenaltyMode) -> Self {
        Self::with_config(ReconciliationConfig {
            penalty_mode,
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: ReconciliationConfig) -> Self {
        // One connection, or every checkout would see its own empty database.
        let cfg = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        };
        let pool = db::establish_connection_with_config(&cfg)
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");
        let db = Arc::new(pool);

        let (sender, events) = EventSender::channel(1024);
        let factory = ServiceFactory::new(db.clone(), Some(sender), config);
        let services = ServiceContainer::new(&factory);

        Self {
            db,
            services,
            events,
        }
    }

    pub async fn create_order(
        &self,
        po_number: &str,
        order_type: OrderType,
        items: Vec<PurchaseOrderItemInput>,
    ) -> PurchaseOrderWithItems {
        self.services
            .purchase_orders
            .create_purchase_order(CreatePurchaseOrderCommand {
                po_number: Some(po_number.to_string()),
                order_type,
                project_no: None,
                counterparty: None,
                order_date: None,
                linked_po_id: None,
                items,
            })
            .await
            .expect("failed to create purchase order")
    }

    pub async fn order(&self, po_number: &str) -> PurchaseOrderWithItems {
        self.services
            .purchase_orders
            .find_by_po_number(po_number)
            .await
            .expect("purchase order should exist")
    }

    pub async fn stock(&self, part_no: &str) -> Vec<inventory_record::Model> {
        InventoryRecord::find()
            .filter(inventory_record::Column::PartNo.eq(part_no))
            .order_by_asc(inventory_record::Column::Id)
            .all(self.db.as_ref())
            .await
            .expect("failed to read inventory")
    }

    /// Everything sent so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn item(part_no: &str, quantity: Decimal) -> PurchaseOrderItemInput {
    PurchaseOrderItemInput {
        part_no: part_no.to_string(),
        material_no: None,
        description: None,
        quantity,
        unit_price: None,
        penalty_percentage: None,
    }
}

pub fn line(part_no: &str, quantity: Decimal, unit_price: Option<Decimal>) -> InvoiceLineInput {
    InvoiceLineInput {
        part_no: part_no.to_string(),
        material_no: None,
        description: None,
        quantity,
        unit_price,
    }
}

pub fn invoice(invoice_no: &str, po_number: &str, lines: Vec<InvoiceLineInput>) -> CreateInvoiceCommand {
    CreateInvoiceCommand {
        invoice_no: invoice_no.to_string(),
        po_number: po_number.to_string(),
        project_no: None,
        counterparty: None,
        invoice_date: None,
        lines,
    }
}
