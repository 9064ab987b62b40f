//! Order Ledger Library
//!
//! Keeps purchase-order delivery state, order status and inventory stock
//! consistent with the supplier and customer invoices recorded against them.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

pub use errors::ServiceError;
pub use services::factory::{ServiceContainer, ServiceFactory};
