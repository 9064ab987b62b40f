use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::entities::purchase_order::PurchaseOrderStatus;
use crate::errors::ServiceError;

/// Which side of the business an invoice belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvoiceKind {
    Supplier,
    Customer,
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end for `process_events`
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event, logging instead of failing when the receiver is gone
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Sends through an optional sender; services run fine without one.
pub(crate) async fn emit(sender: &Option<EventSender>, event: Event) {
    if let Some(sender) = sender {
        sender.send_or_log(event).await;
    }
}

/// Domain events raised by the ledger and reconciliation services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    InvoiceCreated {
        kind: InvoiceKind,
        invoice_id: i64,
        invoice_no: String,
        po_number: String,
    },
    InvoiceUpdated {
        kind: InvoiceKind,
        invoice_id: i64,
        po_number: String,
        previous_po_number: Option<String>,
    },
    InvoiceDeleted {
        kind: InvoiceKind,
        invoice_id: i64,
        po_number: String,
    },
    StockReceived {
        record_id: i64,
        part_no: String,
        quantity: Decimal,
        balance: Decimal,
    },
    StockConsumed {
        record_id: i64,
        part_no: String,
        quantity: Decimal,
        balance: Decimal,
    },
    PurchaseOrderStatusChanged {
        po_number: String,
        old_status: PurchaseOrderStatus,
        new_status: PurchaseOrderStatus,
    },
    PurchaseOrderLinked {
        supplier_po_id: i64,
        customer_po_id: Option<i64>,
    },
    ReconciliationFailed {
        po_number: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

// Handlers implementing this trait process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the channel, logging each event and passing it to the handlers.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Box<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ReconciliationFailed {
                po_number, reason, ..
            } => {
                warn!(po_number = %po_number, reason = %reason, "Reconciliation failure event");
            }
            Event::PurchaseOrderStatusChanged {
                po_number,
                old_status,
                new_status,
            } => {
                info!(po_number = %po_number, %old_status, %new_status, "Purchase order status changed");
            }
            other => info!("Received event: {:?}", other),
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!("Event handler failed: {}", e);
            }
        }
    }

    info!("Event processing loop stopped");
}
