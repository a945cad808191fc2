use std::time::Duration;

use mkt_common::{Money, DEFAULT_CURRENCY_CODE};
use serde::{Deserialize, Serialize};

use crate::db_types::{Order, OrderStatus, PaymentStatus, ProductId, TransactionId};

pub const DEFAULT_SHIPPING_FEE: i64 = 5_000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_VERIFY_LIMIT: u32 = 10;
pub const DEFAULT_VERIFY_WINDOW_SECS: i64 = 60;

/// A cart line that was left out of a cart checkout, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reason: String,
}

impl SkippedItem {
    pub fn new<S: Into<String>>(product_id: ProductId, quantity: i64, reason: S) -> Self {
        Self { product_id, quantity, reason: reason.into() }
    }
}

/// Everything needed to ask a provider for a payment link, without having asked yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub order_ref: String,
    /// Order totals plus one shipping fee per order.
    pub amount: Money,
    pub currency: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResult {
    pub order: Order,
    pub payment_intent: PaymentIntent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCheckout {
    pub transaction_id: TransactionId,
    pub orders: Vec<Order>,
    pub skipped: Vec<SkippedItem>,
    pub payment_intent: PaymentIntent,
}

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub shipping_fee: Money,
    pub currency: String,
    /// Where the gateway sends the buyer after paying. The order reference is appended as `?ref=`.
    pub return_url: String,
    /// Public base URL of this server. Webhooks arrive at `{base}/payments/{provider}/webhook`.
    pub callback_base_url: String,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self {
            shipping_fee: Money::from(DEFAULT_SHIPPING_FEE),
            currency: DEFAULT_CURRENCY_CODE.to_string(),
            return_url: "http://localhost:3000/checkout/result".to_string(),
            callback_base_url: "http://localhost:4444".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationSettings {
    pub shipping_fee: Money,
    /// Upper bound on a provider status query during a synchronous verify.
    pub query_timeout: Duration,
    /// At most `verify_limit` verify requests per user in each `verify_window`.
    pub verify_limit: u32,
    pub verify_window: chrono::Duration,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            shipping_fee: Money::from(DEFAULT_SHIPPING_FEE),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            verify_limit: DEFAULT_VERIFY_LIMIT,
            verify_window: chrono::Duration::seconds(DEFAULT_VERIFY_WINDOW_SECS),
        }
    }
}

/// The combined payment state of an order group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPaymentStatus {
    Paid,
    Pending,
    Failed,
    /// Some orders in the group are paid and some are not.
    Partial,
}

impl GroupPaymentStatus {
    pub fn of(orders: &[Order]) -> Self {
        let paid = orders.iter().filter(|o| o.payment_status == PaymentStatus::Paid).count();
        let pending = orders
            .iter()
            .filter(|o| o.payment_status == PaymentStatus::Pending && o.order_status == OrderStatus::Pending)
            .count();
        match (paid, pending) {
            (p, _) if p == orders.len() && p > 0 => Self::Paid,
            (0, 0) => Self::Failed,
            (0, _) => Self::Pending,
            _ => Self::Partial,
        }
    }
}

/// What a synchronous payment verification reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaymentView {
    pub status: GroupPaymentStatus,
    pub orders: Vec<Order>,
    /// True when the provider could not be reached in time and the orders show our last known state.
    pub stale: bool,
}

impl OrderPaymentView {
    pub fn new(orders: Vec<Order>, stale: bool) -> Self {
        Self { status: GroupPaymentStatus::of(&orders), orders, stale }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub groups_checked: usize,
    pub orders_settled: usize,
    pub queries_failed: usize,
}
