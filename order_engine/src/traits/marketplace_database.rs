use thiserror::Error;

use crate::{
    db_types::{OrderId, ProductId},
    traits::{CartProvider, OrderStore, ProductCatalog, RateLimiter, ReconciliationJournal},
};

/// This trait defines the complete set of behaviour a backend needs to support the marketplace order engine.
#[allow(async_fn_in_trait)]
pub trait MarketplaceDatabase:
    Clone + OrderStore + ProductCatalog + CartProvider + ReconciliationJournal + RateLimiter
{
    /// The URL of the database
    fn url(&self) -> &str;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("We have an internal database engine (configuration/uptime etc.) error: {0}")]
    DatabaseError(String),
    #[error("A stored record could not be decoded: {0}")]
    CorruptRecord(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested product {0} does not exist")]
    ProductNotFound(ProductId),
    #[error("Order {0} was modified by someone else before this change could be applied")]
    ConcurrentUpdate(OrderId),
    #[error("Cannot insert order, since it already exists with id {0}")]
    OrderAlreadyExists(OrderId),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
