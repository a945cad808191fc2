use order_engine::{
    db_types::{OrderId, OrderStatus, ProductId, ProviderKind, ShippingAddress, TransactionId},
    order_objects::{PaymentIntent, SkippedItem},
    providers::PaymentLink,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub shipping_address: ShippingAddress,
    /// When given, a payment link is requested straight away.
    #[serde(default)]
    pub provider: Option<ProviderKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub order_id: OrderId,
    pub payment_intent: PaymentIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCheckoutRequest {
    #[serde(default)]
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartCheckoutResponse {
    pub transaction_id: TransactionId,
    pub order_ids: Vec<OrderId>,
    pub skipped: Vec<SkippedItem>,
    pub payment_intent: PaymentIntent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayRequest {
    pub provider: ProviderKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLinkResponse {
    pub order_ref: String,
    pub checkout_url: String,
    pub correlation_id: String,
}

impl PaymentLinkResponse {
    pub fn new<S: Into<String>>(order_ref: S, link: PaymentLink) -> Self {
        Self { order_ref: order_ref.into(), checkout_url: link.checkout_url, correlation_id: link.correlation_id }
    }
}

/// Optional body for status changes that take no other input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusNotes {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddressRequest {
    pub shipping_address: ShippingAddress,
}
