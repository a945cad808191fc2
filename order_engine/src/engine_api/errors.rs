use thiserror::Error;

use crate::{
    db_types::{OrderId, OrderStatus, ProductId, Role},
    engine_api::order_objects::SkippedItem,
    providers::PaymentGatewayError,
    traits::StoreError,
};

#[derive(Debug, Clone, Error)]
pub enum OrderFlowError {
    #[error("Validation failed: {}", .0.join(", "))]
    ValidationError(Vec<String>),
    #[error("{0} not found")]
    NotFound(String),
    #[error("Not authorized: {0}")]
    AuthorizationError(String),
    #[error("Cannot transition from '{from}' to '{to}' as {role}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus, role: Role },
    #[error("Order history says the order was '{restored}' before it was cancelled, not '{requested}'")]
    RevertMismatch { restored: OrderStatus, requested: OrderStatus },
    #[error("Product {0} is not available in the requested quantity")]
    ProductUnavailable(ProductId),
    #[error("The cart is empty")]
    EmptyCart,
    #[error("None of the {} items in the cart can be ordered", .0.len())]
    NoValidItems(Vec<SkippedItem>),
    #[error("{0}")]
    PaymentGatewayError(#[from] PaymentGatewayError),
    #[error("Order {0} was changed by another request. Reload it and try again.")]
    ConcurrentUpdate(OrderId),
    #[error("Too many requests. Try again later.")]
    RateLimited,
    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl OrderFlowError {
    pub fn validation<S: Into<String>>(problem: S) -> Self {
        Self::ValidationError(vec![problem.into()])
    }

    pub fn order_not_found(id: &OrderId) -> Self {
        Self::NotFound(format!("Order {id}"))
    }
}

impl From<StoreError> for OrderFlowError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::OrderNotFound(id) => Self::order_not_found(&id),
            StoreError::ProductNotFound(id) => Self::NotFound(format!("Product {id}")),
            StoreError::ConcurrentUpdate(id) => Self::ConcurrentUpdate(id),
            e => Self::DatabaseError(e.to_string()),
        }
    }
}
