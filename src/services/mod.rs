// Pure building blocks
pub mod delivery_rollup;
pub mod matching;
pub mod po_status;

// Stock ledger postings, run inside the invoice transaction
pub mod inventory_ledger;

// Derived-state refresh for one purchase order
pub mod reconciliation;

// Write paths that trigger reconciliation
pub mod invoices;
pub mod purchase_orders;

// Service factory for dependency injection
pub mod factory;
