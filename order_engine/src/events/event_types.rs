use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderStatus, ProviderKind};

/// Emitted once per order, by the caller that won the settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaidEvent {
    pub order: Order,
    pub provider: Option<ProviderKind>,
}

impl OrderPaidEvent {
    pub fn new(order: Order, provider: Option<ProviderKind>) -> Self {
        Self { order, provider }
    }
}

/// Emitted when an order is cancelled, whether by a person, a failed payment or the expiry job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAnnulledEvent {
    pub order: Order,
    pub reason: Option<String>,
}

impl OrderAnnulledEvent {
    pub fn new(order: Order) -> Self {
        let reason = order.cancellation.as_ref().and_then(|c| c.reason.clone());
        Self { order, reason }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChangedEvent {
    pub old_status: OrderStatus,
    pub order: Order,
}

impl OrderStatusChangedEvent {
    pub fn new(old_status: OrderStatus, order: Order) -> Self {
        Self { old_status, order }
    }
}

