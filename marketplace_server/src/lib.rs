//! # Marketplace server
//! This crate hosts the HTTP front end of the marketplace. It is responsible for:
//! * Checkout: turning a product or a cart into pending orders, and requesting payment links from a gateway.
//! * Order status changes by sellers, buyers and admins.
//! * Receiving payment gateway webhooks and verifying payments when a buyer returns from a gateway.
//! * Background workers that void stale unpaid orders and sweep pending payments.
//!
//! All business rules live in `order_engine`; the handlers here authenticate the caller and translate between HTTP and
//! the engine APIs.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! * `GET /health`
//! * `POST /payments/{provider}/webhook` (unauthenticated; the gateway signature is checked instead)
//! * Everything under `/orders` requires an `Authorization: Bearer <jwt>` header. See [routes](routes/index.html).

pub mod auth;
pub mod cli;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod helpers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod workers;

#[cfg(test)]
mod endpoint_tests;
