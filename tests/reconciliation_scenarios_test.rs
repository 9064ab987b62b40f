mod common;

use assert_matches::assert_matches;
use common::{invoice, item, line, TestLedger};
use order_ledger::{
    config::{PenaltyMode, ReconciliationConfig},
    entities::{
        purchase_order::{self, Entity as PurchaseOrder, OrderType, PurchaseOrderStatus},
        purchase_order_item::{self, Entity as PurchaseOrderItem},
        supplier_invoice::Entity as SupplierInvoice,
    },
    events::{Event, InvoiceKind},
    services::invoices::UpdateInvoiceCommand,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, PaginatorTrait, Set};

const PO: &str = "PO-2024-0001";

#[tokio::test]
async fn delivery_lifecycle_follows_the_invoice_set() {
    let ledger = TestLedger::new().await;
    let invoices = &ledger.services.invoices;

    // A: no invoices yet
    let created = ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-100", dec!(100))])
        .await;
    assert_eq!(created.order.status, PurchaseOrderStatus::Approved);
    assert_eq!(created.items[0].delivered_quantity, Decimal::ZERO);
    assert_eq!(created.items[0].balance_quantity_undelivered, dec!(100));

    // B: 40 delivered
    let first = invoices
        .create_supplier_invoice(invoice("INV-B", PO, vec![line("P-100", dec!(40), Some(dec!(2.5)))]))
        .await
        .expect("first invoice");
    let order = ledger.order(PO).await;
    assert_eq!(order.items[0].delivered_quantity, dec!(40));
    assert_eq!(order.items[0].balance_quantity_undelivered, dec!(60));
    assert_eq!(order.items[0].delivered_unit_price, Some(dec!(2.5)));
    assert_eq!(order.items[0].delivered_total_price, dec!(100));
    assert_eq!(order.items[0].invoice_no.as_deref(), Some("INV-B"));
    assert_eq!(order.order.status, PurchaseOrderStatus::PartiallyDelivered);

    // C: the remaining 60
    invoices
        .create_supplier_invoice(invoice("INV-C", PO, vec![line("P-100", dec!(60), Some(dec!(3)))]))
        .await
        .expect("second invoice");
    let order = ledger.order(PO).await;
    assert_eq!(order.items[0].delivered_quantity, dec!(100));
    assert_eq!(order.items[0].balance_quantity_undelivered, Decimal::ZERO);
    assert_eq!(order.items[0].delivered_unit_price, Some(dec!(2.5)));
    assert_eq!(order.items[0].invoice_no.as_deref(), Some("INV-B,INV-C"));
    assert_eq!(order.order.status, PurchaseOrderStatus::DeliveredCompleted);

    // D: drop the first invoice
    invoices
        .delete_invoice(InvoiceKind::Supplier, first.id)
        .await
        .expect("delete");
    let order = ledger.order(PO).await;
    assert_eq!(order.items[0].delivered_quantity, dec!(60));
    assert_eq!(order.items[0].balance_quantity_undelivered, dec!(40));
    assert_eq!(order.items[0].delivered_unit_price, Some(dec!(3)));
    assert_eq!(order.items[0].invoice_no.as_deref(), Some("INV-C"));
    assert_eq!(order.order.status, PurchaseOrderStatus::PartiallyDelivered);
}

#[tokio::test]
async fn reconcile_without_invoices_leaves_status_alone() {
    let ledger = TestLedger::new().await;
    let created = ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-1", dec!(5)), item("P-2", dec!(5))])
        .await;

    // a status advanced by hand is not pulled back
    let mut active: purchase_order::ActiveModel = created.order.clone().into();
    active.status = Set(PurchaseOrderStatus::PartiallyDelivered);
    active.update(ledger.db.as_ref()).await.expect("manual status");

    let report = ledger
        .services
        .reconciliation
        .reconcile(PO)
        .await
        .expect("reconcile")
        .expect("order exists");
    assert_eq!(report.items_examined, 2);
    assert_eq!(report.items_updated, 0);
    assert_eq!(report.status, PurchaseOrderStatus::PartiallyDelivered);
    assert!(!report.status_changed());
}

#[tokio::test]
async fn reconcile_unknown_order_is_a_no_op() {
    let ledger = TestLedger::new().await;
    let report = ledger
        .services
        .reconciliation
        .reconcile("PO-1999-0001")
        .await
        .expect("reconcile");
    assert_eq!(report, None);
}

#[tokio::test]
async fn order_with_no_items_is_never_completed() {
    let ledger = TestLedger::new().await;
    let created = ledger.create_order(PO, OrderType::Supplier, vec![]).await;
    assert_eq!(created.order.status, PurchaseOrderStatus::Approved);

    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", PO, vec![line("P-1", dec!(1), None)]))
        .await
        .expect("invoice");
    assert_eq!(ledger.order(PO).await.order.status, PurchaseOrderStatus::Approved);
}

#[tokio::test]
async fn only_lines_with_matching_part_and_material_count() {
    let ledger = TestLedger::new().await;
    let mut with_material = item("P-1", dec!(10));
    with_material.material_no = Some("M-1".into());
    ledger
        .create_order(PO, OrderType::Supplier, vec![with_material, item("P-2", dec!(10))])
        .await;

    let mut other_material = line("P-1", dec!(4), None);
    other_material.material_no = Some("M-2".into());
    let mut right_material = line("P-1", dec!(3), None);
    right_material.material_no = Some("M-1".into());
    let mut empty_material = line("P-2", dec!(2), None);
    empty_material.material_no = Some(String::new());

    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice(
            "INV-1",
            PO,
            vec![other_material, right_material, empty_material],
        ))
        .await
        .expect("invoice");
    // another order's invoice must not leak in
    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-2", "PO-2024-0099", vec![line("P-2", dec!(8), None)]))
        .await
        .expect("foreign invoice");

    let order = ledger.order(PO).await;
    assert_eq!(order.items[0].delivered_quantity, dec!(3));
    assert_eq!(order.items[1].delivered_quantity, dec!(2));
    assert_eq!(order.items[1].delivered_total_price, Decimal::ZERO);
}

#[tokio::test]
async fn customer_orders_roll_up_customer_invoices_only() {
    let ledger = TestLedger::new().await;
    ledger
        .create_order("PO-2024-0002", OrderType::Customer, vec![item("P-1", dec!(10))])
        .await;

    // a supplier invoice for the same number is not a delivery to the customer
    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("SUP-1", "PO-2024-0002", vec![line("P-1", dec!(10), Some(dec!(1)))]))
        .await
        .expect("supplier invoice");
    let order = ledger.order("PO-2024-0002").await;
    assert_eq!(order.items[0].delivered_quantity, Decimal::ZERO);
    assert_eq!(order.order.status, PurchaseOrderStatus::Approved);

    ledger
        .services
        .invoices
        .create_customer_invoice(invoice("CUS-1", "PO-2024-0002", vec![line("P-1", dec!(10), Some(dec!(1)))]))
        .await
        .expect("customer invoice");
    let order = ledger.order("PO-2024-0002").await;
    assert_eq!(order.items[0].delivered_quantity, dec!(10));
    assert_eq!(order.order.status, PurchaseOrderStatus::DeliveredCompleted);
}

#[tokio::test]
async fn moving_an_invoice_reconciles_both_orders() {
    let ledger = TestLedger::new().await;
    ledger
        .create_order("PO-2024-0001", OrderType::Supplier, vec![item("P-1", dec!(10))])
        .await;
    ledger
        .create_order("PO-2024-0002", OrderType::Supplier, vec![item("P-1", dec!(10))])
        .await;

    let inv = ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", "PO-2024-0001", vec![line("P-1", dec!(10), None)]))
        .await
        .expect("invoice");
    assert_eq!(
        ledger.order("PO-2024-0001").await.order.status,
        PurchaseOrderStatus::DeliveredCompleted
    );

    ledger
        .services
        .invoices
        .update_invoice(
            InvoiceKind::Supplier,
            inv.id,
            UpdateInvoiceCommand {
                po_number: Some("PO-2024-0002".into()),
                lines: vec![line("P-1", dec!(4), None)],
            },
        )
        .await
        .expect("update");

    let old = ledger.order("PO-2024-0001").await;
    assert_eq!(old.items[0].delivered_quantity, Decimal::ZERO);
    assert_eq!(old.items[0].invoice_no, None);
    // no delivery left, so the stored status stays where it was
    assert_eq!(old.order.status, PurchaseOrderStatus::DeliveredCompleted);

    let new = ledger.order("PO-2024-0002").await;
    assert_eq!(new.items[0].delivered_quantity, dec!(4));
    assert_eq!(new.order.status, PurchaseOrderStatus::PartiallyDelivered);
}

#[tokio::test]
async fn updating_lines_does_not_move_stock() {
    let ledger = TestLedger::new().await;
    ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-1", dec!(10))])
        .await;
    let inv = ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", PO, vec![line("P-1", dec!(10), Some(dec!(1)))]))
        .await
        .expect("invoice");

    ledger
        .services
        .invoices
        .update_invoice(
            InvoiceKind::Supplier,
            inv.id,
            UpdateInvoiceCommand {
                po_number: None,
                lines: vec![line("P-1", dec!(7), Some(dec!(1)))],
            },
        )
        .await
        .expect("update");
    ledger
        .services
        .invoices
        .delete_invoice(InvoiceKind::Supplier, inv.id)
        .await
        .expect("delete");

    let stock = ledger.stock("P-1").await;
    assert_eq!(stock.len(), 1);
    assert_eq!(stock[0].quantity, dec!(10));
    assert_eq!(stock[0].balance, dec!(10));
}

#[tokio::test]
async fn penalty_is_null_when_suppressed() {
    let ledger = TestLedger::new().await;
    let mut penalised = item("P-1", dec!(10));
    penalised.penalty_percentage = Some(dec!(5));
    ledger.create_order(PO, OrderType::Supplier, vec![penalised]).await;

    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", PO, vec![line("P-1", dec!(10), Some(dec!(20)))]))
        .await
        .expect("invoice");

    let order = ledger.order(PO).await;
    assert_eq!(order.items[0].delivered_total_price, dec!(200));
    assert_eq!(order.items[0].penalty_amount, None);
}

#[tokio::test]
async fn penalty_follows_percentage_when_derived() {
    let ledger = TestLedger::with_penalty_mode(PenaltyMode::Derived).await;
    let created = ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-1", dec!(10))])
        .await;

    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", PO, vec![line("P-1", dec!(10), Some(dec!(20)))]))
        .await
        .expect("invoice");
    assert_eq!(ledger.order(PO).await.items[0].penalty_amount, None);

    let updated = ledger
        .services
        .purchase_orders
        .set_penalty_percentage(created.items[0].id, Some(dec!(5)))
        .await
        .expect("penalty");
    assert_eq!(updated.penalty_percentage, Some(dec!(5)));
    assert_eq!(updated.penalty_amount, Some(dec!(10)));
}

#[tokio::test]
async fn serialized_runs_converge() {
    let ledger = TestLedger::with_config(ReconciliationConfig {
        serialize_per_order: true,
        ..Default::default()
    })
    .await;
    ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-1", dec!(10))])
        .await;
    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", PO, vec![line("P-1", dec!(6), None)]))
        .await
        .expect("invoice");

    let reconciler = ledger.services.reconciliation.clone();
    let (a, b) = tokio::join!(reconciler.reconcile(PO), reconciler.reconcile(PO));
    assert!(a.is_ok() && b.is_ok());

    let order = ledger.order(PO).await;
    assert_eq!(order.items[0].delivered_quantity, dec!(6));
    assert_eq!(order.order.status, PurchaseOrderStatus::PartiallyDelivered);
}

#[tokio::test]
async fn stale_derived_fields_are_repaired_on_the_next_run() {
    let ledger = TestLedger::new().await;
    let created = ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-1", dec!(10))])
        .await;
    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", PO, vec![line("P-1", dec!(4), None)]))
        .await
        .expect("invoice");

    // simulate a run that never landed
    let stale = PurchaseOrderItem::find_by_id(created.items[0].id)
        .one(ledger.db.as_ref())
        .await
        .expect("query")
        .expect("item");
    let mut active: purchase_order_item::ActiveModel = stale.into();
    active.delivered_quantity = Set(Decimal::ZERO);
    active.balance_quantity_undelivered = Set(dec!(10));
    active.update(ledger.db.as_ref()).await.expect("corrupt");

    let reports = ledger
        .services
        .reconciliation
        .reconcile_all()
        .await
        .expect("reconcile all");
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].items_updated, 1);

    let order = ledger.order(PO).await;
    assert_eq!(order.items[0].delivered_quantity, dec!(4));
    assert_eq!(order.items[0].balance_quantity_undelivered, dec!(6));
}

#[tokio::test]
async fn status_changes_are_announced() {
    let mut ledger = TestLedger::new().await;
    ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-1", dec!(10))])
        .await;
    ledger.drain_events();

    ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("INV-1", PO, vec![line("P-1", dec!(10), None)]))
        .await
        .expect("invoice");

    let events = ledger.drain_events();
    assert_matches!(events.first(), Some(Event::InvoiceCreated { kind: InvoiceKind::Supplier, .. }));
    assert!(events.iter().any(|e| matches!(e, Event::StockReceived { .. })));
    assert!(events.contains(&Event::PurchaseOrderStatusChanged {
        po_number: PO.to_string(),
        old_status: PurchaseOrderStatus::Approved,
        new_status: PurchaseOrderStatus::DeliveredCompleted,
    }));

    let stored = PurchaseOrder::find()
        .all(ledger.db.as_ref())
        .await
        .expect("orders");
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn failed_reconciliation_keeps_the_committed_invoice() {
    let mut ledger = TestLedger::new().await;
    ledger
        .create_order(PO, OrderType::Supplier, vec![item("P-100", dec!(10))])
        .await;
    ledger.drain_events();

    // Reconciliation reads items; without the table every run fails.
    ledger
        .db
        .execute_unprepared("DROP TABLE purchase_order_items")
        .await
        .expect("drop items table");

    let created = ledger
        .services
        .invoices
        .create_supplier_invoice(invoice("SUP-1", PO, vec![line("P-100", dec!(4), Some(dec!(2)))]))
        .await
        .expect("invoice write succeeds despite reconciliation failure");
    assert_eq!(created.invoice_no, "SUP-1");

    let headers = SupplierInvoice::find()
        .count(ledger.db.as_ref())
        .await
        .expect("count invoices");
    assert_eq!(headers, 1);
    assert_eq!(ledger.stock("P-100").await[0].quantity, dec!(4));

    let events = ledger.drain_events();
    assert_matches!(events.first(), Some(Event::InvoiceCreated { .. }));
    assert_matches!(
        events.last(),
        Some(Event::ReconciliationFailed { po_number, .. }) if po_number == PO
    );
}
