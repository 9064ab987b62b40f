use sea_orm::sea_query::{IndexCreateStatement, IntoIden, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend};
use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_purchase_orders_table::Migration),
            Box::new(m20240301_000002_create_purchase_order_items_table::Migration),
            Box::new(m20240301_000003_create_invoice_tables::Migration),
            Box::new(m20240301_000004_create_inventory_records_table::Migration),
            Box::new(m20240415_000005_normalize_legacy_po_statuses::Migration),
        ]
    }
}

#[derive(DeriveIden)]
pub(crate) enum PurchaseOrders {
    Table,
    Id,
    PoNumber,
    OrderType,
    Status,
    LinkedPoId,
    ProjectNo,
    Counterparty,
    OrderDate,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PurchaseOrderItems {
    Table,
    Id,
    PurchaseOrderId,
    LineNo,
    PartNo,
    MaterialNo,
    Description,
    Quantity,
    UnitPrice,
    DeliveredQuantity,
    DeliveredUnitPrice,
    DeliveredTotalPrice,
    BalanceQuantityUndelivered,
    PenaltyPercentage,
    PenaltyAmount,
    InvoiceNo,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SupplierInvoices {
    Table,
    SupplierName,
}

#[derive(DeriveIden)]
enum CustomerInvoices {
    Table,
    CustomerName,
}

#[derive(DeriveIden, Clone, Copy)]
enum SupplierInvoiceLines {
    Table,
}

#[derive(DeriveIden, Clone, Copy)]
enum CustomerInvoiceLines {
    Table,
}

/// Columns shared by both invoice header tables.
#[derive(DeriveIden)]
enum InvoiceHeader {
    Id,
    InvoiceNo,
    PoNumber,
    ProjectNo,
    InvoiceDate,
    CreatedAt,
    UpdatedAt,
}

/// Columns shared by both invoice line tables.
#[derive(DeriveIden)]
enum InvoiceLine {
    Id,
    InvoiceId,
    LineNo,
    PartNo,
    MaterialNo,
    Description,
    Quantity,
    UnitPrice,
    CreatedAt,
}

#[derive(DeriveIden)]
enum InventoryRecords {
    Table,
    Id,
    ProjectNo,
    PartNo,
    Description,
    MaterialNo,
    UnitPrice,
    Quantity,
    SoldQuantity,
    Balance,
    BalanceAmount,
    LastInvoiceNo,
    CreatedAt,
    UpdatedAt,
}

/// Decimal column for quantities and amounts. SQLite caps declared precision at 16.
fn money(backend: DatabaseBackend, col: impl IntoIden + 'static) -> ColumnDef {
    let precision = match backend {
        DatabaseBackend::Sqlite => 16,
        _ => 19,
    };
    ColumnDef::new(col).decimal_len(precision, 4).to_owned()
}

mod m20240301_000001_create_purchase_orders_table {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_purchase_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::PoNumber)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::OrderType).string_len(16).not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::Status)
                                .string_len(32)
                                .not_null()
                                .default("approved"),
                        )
                        .col(ColumnDef::new(PurchaseOrders::LinkedPoId).big_integer().null())
                        .col(ColumnDef::new(PurchaseOrders::ProjectNo).string().null())
                        .col(ColumnDef::new(PurchaseOrders::Counterparty).string().null())
                        .col(ColumnDef::new(PurchaseOrders::OrderDate).date().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_purchase_orders_linked_po_id")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::LinkedPoId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000002_create_purchase_order_items_table {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_purchase_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let backend = manager.get_database_backend();
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::PurchaseOrderId)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderItems::LineNo).integer().not_null())
                        .col(ColumnDef::new(PurchaseOrderItems::PartNo).string().not_null())
                        .col(ColumnDef::new(PurchaseOrderItems::MaterialNo).string().null())
                        .col(ColumnDef::new(PurchaseOrderItems::Description).text().null())
                        .col(money(backend, PurchaseOrderItems::Quantity).not_null())
                        .col(money(backend, PurchaseOrderItems::UnitPrice).null())
                        .col(
                            money(backend, PurchaseOrderItems::DeliveredQuantity)
                                .not_null()
                                .default(0),
                        )
                        .col(money(backend, PurchaseOrderItems::DeliveredUnitPrice).null())
                        .col(
                            money(backend, PurchaseOrderItems::DeliveredTotalPrice)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            money(backend, PurchaseOrderItems::BalanceQuantityUndelivered)
                                .not_null()
                                .default(0),
                        )
                        .col(money(backend, PurchaseOrderItems::PenaltyPercentage).null())
                        .col(money(backend, PurchaseOrderItems::PenaltyAmount).null())
                        .col(ColumnDef::new(PurchaseOrderItems::InvoiceNo).text().null())
                        .col(
                            ColumnDef::new(PurchaseOrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_order_id")
                                .from(
                                    PurchaseOrderItems::Table,
                                    PurchaseOrderItems::PurchaseOrderId,
                                )
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_purchase_order_items_order_id")
                        .table(PurchaseOrderItems::Table)
                        .col(PurchaseOrderItems::PurchaseOrderId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrderItems::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000003_create_invoice_tables {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_invoice_tables"
        }
    }

    fn header_table(
        table: impl IntoIden + 'static,
        party_column: impl IntoIden + 'static,
    ) -> TableCreateStatement {
        Table::create()
            .table(table)
            .if_not_exists()
            .col(
                ColumnDef::new(InvoiceHeader::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(InvoiceHeader::InvoiceNo).string().not_null())
            .col(ColumnDef::new(InvoiceHeader::PoNumber).string().not_null())
            .col(ColumnDef::new(InvoiceHeader::ProjectNo).string().null())
            .col(ColumnDef::new(party_column).string().null())
            .col(ColumnDef::new(InvoiceHeader::InvoiceDate).date().null())
            .col(
                ColumnDef::new(InvoiceHeader::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .col(
                ColumnDef::new(InvoiceHeader::UpdatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .to_owned()
    }

    fn line_table(
        backend: DatabaseBackend,
        table: impl IntoIden + Copy + 'static,
        header: impl IntoIden + 'static,
        fk_name: &str,
    ) -> TableCreateStatement {
        Table::create()
            .table(table)
            .if_not_exists()
            .col(
                ColumnDef::new(InvoiceLine::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(InvoiceLine::InvoiceId).big_integer().not_null())
            .col(ColumnDef::new(InvoiceLine::LineNo).integer().not_null())
            .col(ColumnDef::new(InvoiceLine::PartNo).string().not_null())
            .col(ColumnDef::new(InvoiceLine::MaterialNo).string().null())
            .col(ColumnDef::new(InvoiceLine::Description).text().null())
            .col(money(backend, InvoiceLine::Quantity).not_null())
            .col(money(backend, InvoiceLine::UnitPrice).null())
            .col(
                ColumnDef::new(InvoiceLine::CreatedAt)
                    .timestamp_with_time_zone()
                    .not_null(),
            )
            .foreign_key(
                ForeignKey::create()
                    .name(fk_name)
                    .from(table, InvoiceLine::InvoiceId)
                    .to(header, InvoiceHeader::Id)
                    .on_delete(ForeignKeyAction::Cascade),
            )
            .to_owned()
    }

    fn po_number_index(name: &str, table: impl IntoIden + 'static) -> IndexCreateStatement {
        Index::create()
            .name(name)
            .table(table)
            .col(InvoiceHeader::PoNumber)
            .if_not_exists()
            .to_owned()
    }

    fn invoice_id_index(name: &str, table: impl IntoIden + 'static) -> IndexCreateStatement {
        Index::create()
            .name(name)
            .table(table)
            .col(InvoiceLine::InvoiceId)
            .if_not_exists()
            .to_owned()
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let backend = manager.get_database_backend();
            manager
                .create_table(header_table(
                    SupplierInvoices::Table,
                    SupplierInvoices::SupplierName,
                ))
                .await?;
            manager
                .create_table(line_table(
                    backend,
                    SupplierInvoiceLines::Table,
                    SupplierInvoices::Table,
                    "fk_supplier_invoice_lines_invoice_id",
                ))
                .await?;
            manager
                .create_table(header_table(
                    CustomerInvoices::Table,
                    CustomerInvoices::CustomerName,
                ))
                .await?;
            manager
                .create_table(line_table(
                    backend,
                    CustomerInvoiceLines::Table,
                    CustomerInvoices::Table,
                    "fk_customer_invoice_lines_invoice_id",
                ))
                .await?;

            manager
                .create_index(po_number_index(
                    "idx_supplier_invoices_po_number",
                    SupplierInvoices::Table,
                ))
                .await?;
            manager
                .create_index(po_number_index(
                    "idx_customer_invoices_po_number",
                    CustomerInvoices::Table,
                ))
                .await?;
            manager
                .create_index(invoice_id_index(
                    "idx_supplier_invoice_lines_invoice_id",
                    SupplierInvoiceLines::Table,
                ))
                .await?;
            manager
                .create_index(invoice_id_index(
                    "idx_customer_invoice_lines_invoice_id",
                    CustomerInvoiceLines::Table,
                ))
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SupplierInvoiceLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CustomerInvoiceLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(SupplierInvoices::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CustomerInvoices::Table).to_owned())
                .await
        }
    }
}

mod m20240301_000004_create_inventory_records_table {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_inventory_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let backend = manager.get_database_backend();
            manager
                .create_table(
                    Table::create()
                        .table(InventoryRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryRecords::Id)
                                .big_integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryRecords::ProjectNo).string().null())
                        .col(ColumnDef::new(InventoryRecords::PartNo).string().not_null())
                        .col(ColumnDef::new(InventoryRecords::Description).text().null())
                        .col(ColumnDef::new(InventoryRecords::MaterialNo).string().null())
                        .col(money(backend, InventoryRecords::UnitPrice).not_null())
                        .col(money(backend, InventoryRecords::Quantity).not_null().default(0))
                        .col(money(backend, InventoryRecords::SoldQuantity).not_null().default(0))
                        .col(money(backend, InventoryRecords::Balance).not_null().default(0))
                        .col(money(backend, InventoryRecords::BalanceAmount).not_null().default(0))
                        .col(ColumnDef::new(InventoryRecords::LastInvoiceNo).string().null())
                        .col(
                            ColumnDef::new(InventoryRecords::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryRecords::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_inventory_records_part_no")
                        .table(InventoryRecords::Table)
                        .col(InventoryRecords::PartNo)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryRecords::Table).to_owned())
                .await
        }
    }
}

/// One-shot rewrite of historical status values into the three-state enum.
mod m20240415_000005_normalize_legacy_po_statuses {
    use super::*;
    use crate::services::po_status::normalize_legacy_status;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240415_000005_normalize_legacy_po_statuses"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let db = manager.get_connection();
            let backend = manager.get_database_backend();

            let select = Query::select()
                .columns([PurchaseOrders::Id, PurchaseOrders::Status])
                .from(PurchaseOrders::Table)
                .to_owned();
            let rows = db.query_all(backend.build(&select)).await?;

            for row in rows {
                let id: i64 = row.try_get("", "id")?;
                let raw: String = row.try_get("", "status")?;
                let status = normalize_legacy_status(&raw);
                if status.as_str() == raw {
                    continue;
                }
                manager
                    .exec_stmt(
                        Query::update()
                            .table(PurchaseOrders::Table)
                            .value(PurchaseOrders::Status, status.as_str())
                            .and_where(Expr::col(PurchaseOrders::Id).eq(id))
                            .to_owned(),
                    )
                    .await?;
            }
            Ok(())
        }

        async fn down(&self, _manager: &SchemaManager) -> Result<(), DbErr> {
            // Legacy values are not recoverable once collapsed.
            Ok(())
        }
    }
}
