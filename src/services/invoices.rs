use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, ModelTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    db::DbPool,
    entities::{
        customer_invoice::{self, Entity as CustomerInvoice},
        customer_invoice_line::{self, Entity as CustomerInvoiceLine},
        inventory_record,
        supplier_invoice::{self, Entity as SupplierInvoice},
        supplier_invoice_line::{self, Entity as SupplierInvoiceLine},
    },
    errors::ServiceError,
    events::{emit, Event, EventSender, InvoiceKind},
    services::{
        inventory_ledger::{self, StockPosting},
        reconciliation::ReconciliationService,
    },
};

/// One line of an incoming invoice.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InvoiceLineInput {
    #[validate(length(min = 1, message = "part_no must not be empty"))]
    pub part_no: String,
    pub material_no: Option<String>,
    pub description: Option<String>,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

/// Create request shared by supplier and customer invoices.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInvoiceCommand {
    #[validate(length(min = 1, message = "invoice_no must not be empty"))]
    pub invoice_no: String,
    #[validate(length(min = 1, message = "po_number must not be empty"))]
    pub po_number: String,
    pub project_no: Option<String>,
    /// Supplier name or customer name, depending on the invoice kind
    pub counterparty: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    #[validate(length(min = 1, message = "an invoice needs at least one line"))]
    pub lines: Vec<InvoiceLineInput>,
}

/// Full replace of an invoice's lines, optionally moving it to another order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateInvoiceCommand {
    #[validate(length(min = 1, message = "po_number must not be empty"))]
    pub po_number: Option<String>,
    #[validate(length(min = 1, message = "an invoice needs at least one line"))]
    pub lines: Vec<InvoiceLineInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceSummary {
    pub kind: InvoiceKind,
    pub id: i64,
    pub invoice_no: String,
    pub po_number: String,
    pub line_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub created: Vec<i64>,
    /// `(invoice_no, error)` for every invoice that was rolled back
    pub failed: Vec<(String, String)>,
    pub reconciled: Vec<String>,
}

fn validate_lines(lines: &[InvoiceLineInput]) -> Result<(), ServiceError> {
    let mut errors = ValidationErrors::new();
    for line in lines {
        line.validate()?;
        if line.quantity <= Decimal::ZERO {
            let mut err = ValidationError::new("quantity");
            err.message = Some(format!("quantity for part {} must be positive", line.part_no).into());
            errors.add("lines", err);
        }
        if line.unit_price.is_some_and(|price| price < Decimal::ZERO) {
            let mut err = ValidationError::new("unit_price");
            err.message =
                Some(format!("unit_price for part {} must not be negative", line.part_no).into());
            errors.add("lines", err);
        }
    }
    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

fn postings(invoice_no: &str, project_no: Option<&str>, lines: &[InvoiceLineInput]) -> Vec<StockPosting> {
    lines
        .iter()
        .map(|line| StockPosting {
            invoice_no: invoice_no.to_string(),
            project_no: project_no.map(str::to_string),
            part_no: line.part_no.clone(),
            description: line.description.clone(),
            material_no: line.material_no.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect()
}

/// Invoice write paths. Header, lines and ledger postings commit together;
/// reconciliation of the referenced order follows the commit.
#[derive(Clone)]
pub struct InvoiceService {
    db_pool: Arc<DbPool>,
    event_sender: Option<EventSender>,
    reconciliation: ReconciliationService,
}

impl InvoiceService {
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

    /// Records a supplier invoice and receives every line into stock.
    #[instrument(skip(self, cmd), fields(invoice_no = %cmd.invoice_no, po_number = %cmd.po_number))]
    pub async fn create_supplier_invoice(
        &self,
        cmd: CreateInvoiceCommand,
    ) -> Result<supplier_invoice::Model, ServiceError> {
        let (invoice, records) = self.insert_supplier_invoice(&cmd).await?;
        self.announce_created(InvoiceKind::Supplier, invoice.id, &cmd, &records)
            .await;
        self.reconciliation
            .reconcile_after_commit(&invoice.po_number)
            .await;
        Ok(invoice)
    }

    /// Records a sale. Every line is checked against stock before anything is written.
    #[instrument(skip(self, cmd), fields(invoice_no = %cmd.invoice_no, po_number = %cmd.po_number))]
    pub async fn create_customer_invoice(
        &self,
        cmd: CreateInvoiceCommand,
    ) -> Result<customer_invoice::Model, ServiceError> {
        cmd.validate()?;
        validate_lines(&cmd.lines)?;

        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;
        let sales = postings(&cmd.invoice_no, cmd.project_no.as_deref(), &cmd.lines);

        inventory_ledger::prevalidate_consumption(&txn, &sales).await?;

        let now = Utc::now();
        let invoice = customer_invoice::ActiveModel {
            invoice_no: Set(cmd.invoice_no.clone()),
            po_number: Set(cmd.po_number.clone()),
            project_no: Set(cmd.project_no.clone()),
            customer_name: Set(cmd.counterparty.clone()),
            invoice_date: Set(cmd.invoice_date),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        insert_customer_lines(&txn, invoice.id, &cmd.lines).await?;

        let mut records = Vec::with_capacity(sales.len());
        for sale in &sales {
            records.push(inventory_ledger::consume(&txn, sale).await?);
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(invoice_id = invoice.id, lines = cmd.lines.len(), "Customer invoice created");

        self.announce_created(InvoiceKind::Customer, invoice.id, &cmd, &records)
            .await;
        self.reconciliation
            .reconcile_after_commit(&invoice.po_number)
            .await;
        Ok(invoice)
    }

    /// Replaces all lines of an invoice and optionally re-points it at another order.
    ///
    /// Stock is not adjusted; only the create paths move inventory.
    #[instrument(skip(self, cmd))]
    pub async fn update_invoice(
        &self,
        kind: InvoiceKind,
        invoice_id: i64,
        cmd: UpdateInvoiceCommand,
    ) -> Result<InvoiceSummary, ServiceError> {
        cmd.validate()?;
        validate_lines(&cmd.lines)?;

        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;
        let now = Utc::now();

        let (summary, previous_po_number) = match kind {
            InvoiceKind::Supplier => {
                let invoice = SupplierInvoice::find_by_id(invoice_id)
                    .one(&txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| not_found(kind, invoice_id))?;
                let previous = invoice.po_number.clone();

                let mut active: supplier_invoice::ActiveModel = invoice.into();
                if let Some(po_number) = &cmd.po_number {
                    active.po_number = Set(po_number.clone());
                }
                active.updated_at = Set(now);
                let invoice = active.update(&txn).await.map_err(ServiceError::db_error)?;

                SupplierInvoiceLine::delete_many()
                    .filter(supplier_invoice_line::Column::InvoiceId.eq(invoice.id))
                    .exec(&txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                insert_supplier_lines(&txn, invoice.id, &cmd.lines).await?;

                (
                    InvoiceSummary {
                        kind,
                        id: invoice.id,
                        invoice_no: invoice.invoice_no,
                        po_number: invoice.po_number,
                        line_count: cmd.lines.len(),
                    },
                    previous,
                )
            }
            InvoiceKind::Customer => {
                let invoice = CustomerInvoice::find_by_id(invoice_id)
                    .one(&txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| not_found(kind, invoice_id))?;
                let previous = invoice.po_number.clone();

                let mut active: customer_invoice::ActiveModel = invoice.into();
                if let Some(po_number) = &cmd.po_number {
                    active.po_number = Set(po_number.clone());
                }
                active.updated_at = Set(now);
                let invoice = active.update(&txn).await.map_err(ServiceError::db_error)?;

                CustomerInvoiceLine::delete_many()
                    .filter(customer_invoice_line::Column::InvoiceId.eq(invoice.id))
                    .exec(&txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                insert_customer_lines(&txn, invoice.id, &cmd.lines).await?;

                (
                    InvoiceSummary {
                        kind,
                        id: invoice.id,
                        invoice_no: invoice.invoice_no,
                        po_number: invoice.po_number,
                        line_count: cmd.lines.len(),
                    },
                    previous,
                )
            }
        };

        txn.commit().await.map_err(ServiceError::db_error)?;

        let moved = previous_po_number != summary.po_number;
        emit(
            &self.event_sender,
            Event::InvoiceUpdated {
                kind,
                invoice_id: summary.id,
                po_number: summary.po_number.clone(),
                previous_po_number: moved.then(|| previous_po_number.clone()),
            },
        )
        .await;

        self.reconciliation
            .reconcile_after_commit(&previous_po_number)
            .await;
        if moved {
            self.reconciliation
                .reconcile_after_commit(&summary.po_number)
                .await;
        }
        Ok(summary)
    }

    /// Deletes an invoice with its lines. Stock is not adjusted.
    #[instrument(skip(self))]
    pub async fn delete_invoice(
        &self,
        kind: InvoiceKind,
        invoice_id: i64,
    ) -> Result<InvoiceSummary, ServiceError> {
        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let summary = match kind {
            InvoiceKind::Supplier => {
                let invoice = SupplierInvoice::find_by_id(invoice_id)
                    .one(&txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| not_found(kind, invoice_id))?;
                let removed = SupplierInvoiceLine::delete_many()
                    .filter(supplier_invoice_line::Column::InvoiceId.eq(invoice.id))
                    .exec(&txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                let summary = InvoiceSummary {
                    kind,
                    id: invoice.id,
                    invoice_no: invoice.invoice_no.clone(),
                    po_number: invoice.po_number.clone(),
                    line_count: removed.rows_affected as usize,
                };
                invoice.delete(&txn).await.map_err(ServiceError::db_error)?;
                summary
            }
            InvoiceKind::Customer => {
                let invoice = CustomerInvoice::find_by_id(invoice_id)
                    .one(&txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| not_found(kind, invoice_id))?;
                let removed = CustomerInvoiceLine::delete_many()
                    .filter(customer_invoice_line::Column::InvoiceId.eq(invoice.id))
                    .exec(&txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                let summary = InvoiceSummary {
                    kind,
                    id: invoice.id,
                    invoice_no: invoice.invoice_no.clone(),
                    po_number: invoice.po_number.clone(),
                    line_count: removed.rows_affected as usize,
                };
                invoice.delete(&txn).await.map_err(ServiceError::db_error)?;
                summary
            }
        };

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(invoice_id, kind = %kind, po_number = %summary.po_number, "Invoice deleted");

        emit(
            &self.event_sender,
            Event::InvoiceDeleted {
                kind,
                invoice_id: summary.id,
                po_number: summary.po_number.clone(),
            },
        )
        .await;
        self.reconciliation
            .reconcile_after_commit(&summary.po_number)
            .await;
        Ok(summary)
    }

    /// Bulk supplier import. Each invoice commits on its own; a failed one is
    /// reported and the batch continues. Every touched order is reconciled once.
    #[instrument(skip(self, cmds), fields(invoices = cmds.len()))]
    pub async fn import_supplier_invoices(
        &self,
        cmds: Vec<CreateInvoiceCommand>,
    ) -> Result<ImportSummary, ServiceError> {
        let mut summary = ImportSummary::default();

        for cmd in &cmds {
            match self.insert_supplier_invoice(cmd).await {
                Ok((invoice, records)) => {
                    self.announce_created(InvoiceKind::Supplier, invoice.id, cmd, &records)
                        .await;
                    summary.created.push(invoice.id);
                    if !summary.reconciled.contains(&invoice.po_number) {
                        summary.reconciled.push(invoice.po_number);
                    }
                }
                Err(e) => {
                    warn!(invoice_no = %cmd.invoice_no, error = %e, "Skipping invoice in import");
                    summary.failed.push((cmd.invoice_no.clone(), e.to_string()));
                }
            }
        }

        for po_number in &summary.reconciled {
            self.reconciliation.reconcile_after_commit(po_number).await;
        }

        info!(
            created = summary.created.len(),
            failed = summary.failed.len(),
            "Supplier invoice import finished"
        );
        Ok(summary)
    }

    async fn insert_supplier_invoice(
        &self,
        cmd: &CreateInvoiceCommand,
    ) -> Result<(supplier_invoice::Model, Vec<inventory_record::Model>), ServiceError> {
        cmd.validate()?;
        validate_lines(&cmd.lines)?;

        let db = self.db_pool.as_ref();
        let txn = db.begin().await.map_err(ServiceError::db_error)?;

        let now = Utc::now();
        let invoice = supplier_invoice::ActiveModel {
            invoice_no: Set(cmd.invoice_no.clone()),
            po_number: Set(cmd.po_number.clone()),
            project_no: Set(cmd.project_no.clone()),
            supplier_name: Set(cmd.counterparty.clone()),
            invoice_date: Set(cmd.invoice_date),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        insert_supplier_lines(&txn, invoice.id, &cmd.lines).await?;

        let receipts = postings(&cmd.invoice_no, cmd.project_no.as_deref(), &cmd.lines);
        let mut records = Vec::with_capacity(receipts.len());
        for receipt in &receipts {
            records.push(inventory_ledger::receive(&txn, receipt).await?);
        }

        txn.commit().await.map_err(ServiceError::db_error)?;
        info!(invoice_id = invoice.id, lines = cmd.lines.len(), "Supplier invoice created");
        Ok((invoice, records))
    }

    async fn announce_created(
        &self,
        kind: InvoiceKind,
        invoice_id: i64,
        cmd: &CreateInvoiceCommand,
        records: &[inventory_record::Model],
    ) {
        emit(
            &self.event_sender,
            Event::InvoiceCreated {
                kind,
                invoice_id,
                invoice_no: cmd.invoice_no.clone(),
                po_number: cmd.po_number.clone(),
            },
        )
        .await;

        for (record, line) in records.iter().zip(&cmd.lines) {
            let event = if kind == InvoiceKind::Supplier {
                Event::StockReceived {
                    record_id: record.id,
                    part_no: record.part_no.clone(),
                    quantity: line.quantity,
                    balance: record.balance,
                }
            } else {
                Event::StockConsumed {
                    record_id: record.id,
                    part_no: record.part_no.clone(),
                    quantity: line.quantity,
                    balance: record.balance,
                }
            };
            emit(&self.event_sender, event).await;
        }
    }
}

fn not_found(kind: InvoiceKind, invoice_id: i64) -> ServiceError {
    ServiceError::NotFound(format!("{} invoice {} not found", kind, invoice_id))
}

async fn insert_supplier_lines(
    txn: &DatabaseTransaction,
    invoice_id: i64,
    lines: &[InvoiceLineInput],
) -> Result<(), ServiceError> {
    let now = Utc::now();
    for (idx, line) in lines.iter().enumerate() {
        supplier_invoice_line::ActiveModel {
            invoice_id: Set(invoice_id),
            line_no: Set(idx as i32 + 1),
            part_no: Set(line.part_no.clone()),
            material_no: Set(line.material_no.clone()),
            description: Set(line.description.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(())
}

async fn insert_customer_lines(
    txn: &DatabaseTransaction,
    invoice_id: i64,
    lines: &[InvoiceLineInput],
) -> Result<(), ServiceError> {
    let now = Utc::now();
    for (idx, line) in lines.iter().enumerate() {
        customer_invoice_line::ActiveModel {
            invoice_id: Set(invoice_id),
            line_no: Set(idx as i32 + 1),
            part_no: Set(line.part_no.clone()),
            material_no: Set(line.material_no.clone()),
            description: Set(line.description.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            created_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;
    }
    Ok(())
}
