// Order side
pub mod purchase_order;
pub mod purchase_order_item;

// Invoices, one table pair per counterparty type
pub mod customer_invoice;
pub mod customer_invoice_line;
pub mod supplier_invoice;
pub mod supplier_invoice_line;

// Stock ledger
pub mod inventory_record;
