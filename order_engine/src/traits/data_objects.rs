use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{
    Cancellation,
    Order,
    OrderStatus,
    PaymentStatus,
    ProviderKind,
    ShippingStatus,
    StatusHistoryEntry,
    TransactionId,
    UserId,
};

/// The timestamp column that a transition stamps when it lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    Paid,
    SellerConfirmed,
    Delivered,
    Completed,
}

impl Milestone {
    pub fn for_status(status: OrderStatus) -> Option<Self> {
        match status {
            OrderStatus::Paid => Some(Self::Paid),
            OrderStatus::Processing => Some(Self::SellerConfirmed),
            OrderStatus::Delivered => Some(Self::Delivered),
            OrderStatus::Completed => Some(Self::Completed),
            OrderStatus::Pending | OrderStatus::Cancelled => None,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Milestone::Paid => "paid_at",
            Milestone::SellerConfirmed => "seller_confirmed_at",
            Milestone::Delivered => "delivered_at",
            Milestone::Completed => "completed_at",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CancellationUpdate {
    #[default]
    Keep,
    Set(Cancellation),
    Clear,
}

/// Everything a single status mutation writes. The store applies it atomically, and only if the order is still in
/// the `from` status.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub entry: StatusHistoryEntry,
    pub payment_status: Option<PaymentStatus>,
    pub shipping_status: Option<ShippingStatus>,
    pub milestone: Option<Milestone>,
    pub cancellation: CancellationUpdate,
}

impl StatusChange {
    pub fn new(from: OrderStatus, to: OrderStatus, changed_by: UserId, notes: Option<String>) -> Self {
        let entry = StatusHistoryEntry::new(to, changed_by, notes);
        Self {
            from,
            to,
            entry,
            payment_status: None,
            shipping_status: None,
            milestone: Milestone::for_status(to),
            cancellation: CancellationUpdate::Keep,
        }
    }

    pub fn with_payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_status = Some(status);
        self
    }

    pub fn with_shipping_status(mut self, status: ShippingStatus) -> Self {
        self.shipping_status = Some(status);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationUpdate) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn changed_at(&self) -> DateTime<Utc> {
        self.entry.changed_at
    }
}

/// The result of an attempt to settle a payment against an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    /// This caller won the conditional update. The order is now paid.
    Settled(Order),
    /// Someone else already settled the order. Nothing was written.
    AlreadyPaid(Order),
    /// The order is neither pending nor paid (e.g. it was cancelled). Nothing was written.
    NotPayable(Order),
}

impl SettleOutcome {
    pub fn order(&self) -> &Order {
        match self {
            SettleOutcome::Settled(o) | SettleOutcome::AlreadyPaid(o) | SettleOutcome::NotPayable(o) => o,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self, SettleOutcome::Settled(_))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderQueryFilter {
    pub buyer_id: Option<UserId>,
    pub seller_id: Option<UserId>,
    pub transaction_id: Option<TransactionId>,
    pub payment_method: Option<ProviderKind>,
    pub order_statuses: Vec<OrderStatus>,
    pub payment_statuses: Vec<PaymentStatus>,
    pub has_payment_reference: Option<bool>,
    pub created_before: Option<DateTime<Utc>>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl OrderQueryFilter {
    pub fn with_buyer_id(mut self, buyer_id: UserId) -> Self {
        self.buyer_id = Some(buyer_id);
        self
    }

    pub fn with_seller_id(mut self, seller_id: UserId) -> Self {
        self.seller_id = Some(seller_id);
        self
    }

    pub fn with_transaction_id(mut self, txid: TransactionId) -> Self {
        self.transaction_id = Some(txid);
        self
    }

    pub fn with_payment_method(mut self, provider: ProviderKind) -> Self {
        self.payment_method = Some(provider);
        self
    }

    pub fn with_order_status(mut self, status: OrderStatus) -> Self {
        self.order_statuses.push(status);
        self
    }

    pub fn with_payment_status(mut self, status: PaymentStatus) -> Self {
        self.payment_statuses.push(status);
        self
    }

    pub fn with_payment_reference(mut self, has_reference: bool) -> Self {
        self.has_payment_reference = Some(has_reference);
        self
    }

    pub fn created_before(mut self, time: DateTime<Utc>) -> Self {
        self.created_before = Some(time);
        self
    }

    pub fn created_after(mut self, time: DateTime<Utc>) -> Self {
        self.created_after = Some(time);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.buyer_id.is_none() &&
            self.seller_id.is_none() &&
            self.transaction_id.is_none() &&
            self.payment_method.is_none() &&
            self.order_statuses.is_empty() &&
            self.payment_statuses.is_empty() &&
            self.has_payment_reference.is_none() &&
            self.created_before.is_none() &&
            self.created_after.is_none()
    }
}
