//! # Order engine public API
//!
//! The `engine_api` module exposes the programmatic API of the order engine. Each API is created by handing it a
//! database backend that implements the storage traits it needs, plus the event producers it should publish to.
//!
//! * [`lifecycle_api`] owns the order state machine: creation, role-checked transitions, cancellation and the
//!   admin-only revert, as well as the engine-internal payment and void operations.
//! * [`checkout_api`] turns a product or a cart into pending orders and asks a payment provider for a checkout link.
//! * [`reconciliation_api`] applies what the gateways report (webhooks, buyer-initiated verification and the background
//!   sweep) to the orders.
//!
//! ```rust,ignore
//! use order_engine::{OrderLifecycleApi, SqliteDatabase, events::EventProducers};
//! let db = SqliteDatabase::new_with_url("sqlite://data/marketplace.db", 5).await?;
//! let api = OrderLifecycleApi::new(db, EventProducers::default());
//! let order = api.fetch_order(&order_id).await?;
//! ```
pub mod checkout_api;
pub mod errors;
pub mod lifecycle_api;
pub mod order_objects;
pub mod reconciliation_api;
pub mod state_machine;
