use std::sync::Arc;

use crate::{
    config::ReconciliationConfig,
    db::DbPool,
    events::EventSender,
    services::{
        invoices::InvoiceService, purchase_orders::PurchaseOrderService,
        reconciliation::ReconciliationService,
    },
};

/// Builds services that share one pool, one event sender and one reconciler.
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
    reconciliation: ReconciliationService,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<EventSender>,
        config: ReconciliationConfig,
    ) -> Self {
        let reconciliation =
            ReconciliationService::new(db_pool.clone(), event_sender.clone(), config);
        Self {
            db_pool,
            event_sender,
            reconciliation,
        }
    }

    /// The shared reconciler; clones share the per-order lock table
    pub fn reconciliation_service(&self) -> ReconciliationService {
        self.reconciliation.clone()
    }

    pub fn invoice_service(&self) -> InvoiceService {
        InvoiceService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.reconciliation.clone(),
        )
    }

    pub fn purchase_order_service(&self) -> PurchaseOrderService {
        PurchaseOrderService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.reconciliation.clone(),
        )
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub reconciliation: ReconciliationService,
    pub invoices: InvoiceService,
    pub purchase_orders: PurchaseOrderService,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            reconciliation: factory.reconciliation_service(),
            invoices: factory.invoice_service(),
            purchase_orders: factory.purchase_order_service(),
        }
    }
}
