//! # Storage contracts
//!
//! This module defines the behaviour that a database backend needs to expose so that the order engine can run on
//! top of it.
//!
//! * [`OrderStore`] owns the order rows and their status history. Every status mutation is a single atomic operation
//!   conditioned on the status the caller observed.
//! * [`ProductCatalog`] answers availability questions and decrements stock once a payment settles.
//! * [`CartProvider`] is a read-mostly view of each buyer's cart.
//! * [`ReconciliationJournal`] records the payment ledger and the manual-review log.
//! * [`RateLimiter`] is a fixed-window counter that survives restarts.
//! * [`MarketplaceDatabase`] ties all of the above together.
mod cart_provider;
mod data_objects;
mod marketplace_database;
mod order_store;
mod product_catalog;
mod rate_limiter;
mod reconciliation_journal;

pub use cart_provider::CartProvider;
pub use data_objects::{CancellationUpdate, Milestone, OrderQueryFilter, SettleOutcome, StatusChange};
pub use marketplace_database::{MarketplaceDatabase, StoreError};
pub use order_store::OrderStore;
pub use product_catalog::ProductCatalog;
pub use rate_limiter::RateLimiter;
pub use reconciliation_journal::ReconciliationJournal;
