//! Marketplace order engine
//!
//! The order engine holds the order lifecycle and payment reconciliation logic of the marketplace. It is
//! transport-agnostic: the HTTP server is a thin layer over the APIs exported here.
//!
//! The library is divided into these sections:
//! 1. Storage ([`mod@traits`] and [`mod@sqlite`]). The traits describe what a backend must offer; SQLite is the
//!    supported implementation. The data types stored in the database live in [`mod@db_types`].
//! 2. Payment providers ([`mod@providers`]). One adapter per gateway (MoMo, PayOS, Stripe, ZaloPay), each of which
//!    creates payment links, verifies callbacks and, where the gateway allows it, polls for payment status.
//! 3. The public API ([`mod@engine_api`]). Everything that changes an order goes through here.
//!
//! The engine also emits events when orders are paid, annulled or change status. Hooks can be attached to these with
//! [`events::EventHooks`].
pub mod db_types;
pub mod engine_api;
pub mod events;
pub mod providers;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use engine_api::{
    checkout_api::CheckoutApi,
    errors::OrderFlowError,
    lifecycle_api::OrderLifecycleApi,
    order_objects,
    reconciliation_api::{PaymentEvidence, ReconciliationApi},
};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
