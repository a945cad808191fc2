use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use mkt_common::{Money, DEFAULT_CURRENCY_CODE};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid value for {kind}: {value}")]
pub struct ConversionError {
    pub kind: &'static str,
    pub value: String,
}

impl ConversionError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

//--------------------------------------      Identifiers      ---------------------------------------------------------
string_id!(
    /// The opaque order identifier. Newly created orders get 24 lowercase hex characters.
    OrderId
);
string_id!(
    /// Groups every order created by a single cart checkout.
    TransactionId
);
string_id!(ProductId);
string_id!(UserId);

impl OrderId {
    pub fn random() -> Self {
        let bytes: [u8; 12] = rand::random();
        Self(hex::encode(bytes))
    }
}

impl TransactionId {
    pub fn random() -> Self {
        let suffix = rand::random::<u16>() % 10_000;
        Self(format!("TXN{}{suffix:04}", Utc::now().timestamp_millis()))
    }
}

//--------------------------------------      OrderStatus      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, waiting for the buyer to pay.
    Pending,
    /// Payment has been settled.
    Paid,
    /// The seller accepted the order and is preparing it.
    Processing,
    Delivered,
    Completed,
    Cancelled,
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "processing" => Ok(Self::Processing),
            "delivered" => Ok(Self::Delivered),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError::new("order status", s)),
        }
    }
}

//--------------------------------------     PaymentStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PaymentStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            s => Err(ConversionError::new("payment status", s)),
        }
    }
}

//--------------------------------------     ShippingStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    NotShipped,
    Delivered,
}

impl Display for ShippingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShippingStatus::NotShipped => write!(f, "not_shipped"),
            ShippingStatus::Delivered => write!(f, "delivered"),
        }
    }
}

impl FromStr for ShippingStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_shipped" => Ok(Self::NotShipped),
            "delivered" => Ok(Self::Delivered),
            s => Err(ConversionError::new("shipping status", s)),
        }
    }
}

//--------------------------------------          Role         ---------------------------------------------------------
/// The capacity in which an actor is acting on an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
    Admin,
    /// Internal flows: payment settlement, expiry and reconciliation sweeps.
    System,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Admin => "admin",
            Role::System => "system",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer" => Ok(Self::Buyer),
            "seller" => Ok(Self::Seller),
            "admin" => Ok(Self::Admin),
            "system" => Ok(Self::System),
            s => Err(ConversionError::new("role", s)),
        }
    }
}

/// Who is asking for a change, and in which capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub const SYSTEM_ID: &'static str = "system";

    pub fn new<S: Into<UserId>>(id: S, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn buyer<S: Into<UserId>>(id: S) -> Self {
        Self::new(id, Role::Buyer)
    }

    pub fn seller<S: Into<UserId>>(id: S) -> Self {
        Self::new(id, Role::Seller)
    }

    pub fn admin<S: Into<UserId>>(id: S) -> Self {
        Self::new(id, Role::Admin)
    }

    pub fn system() -> Self {
        Self::new(Self::SYSTEM_ID, Role::System)
    }

    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Admin | Role::System)
    }
}

//--------------------------------------      ProviderKind     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    MoMo,
    PayOs,
    Stripe,
    ZaloPay,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] =
        [ProviderKind::MoMo, ProviderKind::PayOs, ProviderKind::Stripe, ProviderKind::ZaloPay];
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderKind::MoMo => "momo",
            ProviderKind::PayOs => "payos",
            ProviderKind::Stripe => "stripe",
            ProviderKind::ZaloPay => "zalopay",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProviderKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "momo" => Ok(Self::MoMo),
            "payos" => Ok(Self::PayOs),
            "stripe" => Ok(Self::Stripe),
            "zalopay" => Ok(Self::ZaloPay),
            _ => Err(ConversionError::new("payment provider", s)),
        }
    }
}

//--------------------------------------    ShippingAddress    ---------------------------------------------------------
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingAddress {
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

impl ShippingAddress {
    pub fn new<S: Into<String>>(full_name: S, address: S, phone: S) -> Self {
        Self {
            full_name: full_name.into(),
            address: address.into(),
            phone: phone.into(),
            city: None,
            postal_code: None,
        }
    }

    pub fn with_city<S: Into<String>>(mut self, city: S) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Returns the names of every required field that is blank.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.full_name.trim().is_empty() {
            missing.push("shippingAddress.fullName");
        }
        if self.address.trim().is_empty() {
            missing.push("shippingAddress.address");
        }
        if self.phone.trim().is_empty() {
            missing.push("shippingAddress.phone");
        }
        missing
    }
}

//--------------------------------------   StatusHistoryEntry  ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub changed_by: UserId,
    pub changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl StatusHistoryEntry {
    pub fn new(status: OrderStatus, changed_by: UserId, notes: Option<String>) -> Self {
        Self { status, changed_by, changed_at: Utc::now(), notes }
    }
}

//--------------------------------------     PaymentDetails    ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    pub external_transaction_id: Option<String>,
    pub paid_amount: Money,
    pub paid_at: DateTime<Utc>,
}

//--------------------------------------      Cancellation     ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub cancelled_by: Role,
    pub cancelled_at: DateTime<Utc>,
    pub reason: Option<String>,
}

//--------------------------------------         Order         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_unit_price: Money,
    pub seller_id: UserId,
    pub buyer_id: UserId,
    pub quantity: i64,
    /// Quantity times unit price. Shipping is never included.
    pub total_amount: Money,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub shipping_status: ShippingStatus,
    pub transaction_id: Option<TransactionId>,
    pub payment_method: Option<ProviderKind>,
    pub payment_correlation_id: Option<String>,
    pub payment_details: Option<PaymentDetails>,
    pub cancellation: Option<Cancellation>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub seller_confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.payment_status == PaymentStatus::Paid
    }

    pub fn is_owned_by(&self, actor: &Actor) -> bool {
        match actor.role {
            Role::Buyer => self.buyer_id == actor.id,
            Role::Seller => self.seller_id == actor.id,
            Role::Admin | Role::System => true,
        }
    }

    /// The most recent status in the history that is not `cancelled`.
    pub fn last_active_status(&self) -> Option<OrderStatus> {
        self.status_history.iter().rev().map(|e| e.status).find(|s| *s != OrderStatus::Cancelled)
    }
}

//--------------------------------------        NewOrder       ---------------------------------------------------------
/// Input for order creation. Everything the caller may get wrong is optional so that validation can report every
/// problem at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub product_name: String,
    pub product_unit_price: Option<Money>,
    pub seller_id: Option<UserId>,
    pub buyer_id: Option<UserId>,
    pub quantity: i64,
    pub total_amount: Option<Money>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub shipping_address: ShippingAddress,
    #[serde(default)]
    pub transaction_id: Option<TransactionId>,
}

fn default_currency() -> String {
    DEFAULT_CURRENCY_CODE.to_string()
}

impl NewOrder {
    pub fn for_product(product: &Product, buyer_id: UserId, quantity: i64, address: ShippingAddress) -> Self {
        Self {
            product_id: Some(product.id.clone()),
            product_name: product.name.clone(),
            product_unit_price: Some(product.price),
            seller_id: Some(product.seller_id.clone()),
            buyer_id: Some(buyer_id),
            quantity,
            total_amount: Some(product.price * quantity),
            currency: default_currency(),
            shipping_address: address,
            transaction_id: None,
        }
    }

    pub fn with_transaction_id(mut self, id: TransactionId) -> Self {
        self.transaction_id = Some(id);
        self
    }
}

/// A `NewOrder` that has passed validation and is ready to be persisted.
#[derive(Debug, Clone)]
pub struct ValidatedOrder {
    pub id: OrderId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_unit_price: Money,
    pub seller_id: UserId,
    pub buyer_id: UserId,
    pub quantity: i64,
    pub total_amount: Money,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------        Product        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Available,
    Sold,
}

impl Display for ProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductStatus::Available => write!(f, "available"),
            ProductStatus::Sold => write!(f, "sold"),
        }
    }
}

impl FromStr for ProductStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(Self::Available),
            "sold" => Ok(Self::Sold),
            s => Err(ConversionError::new("product status", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub seller_id: UserId,
    pub price: Money,
    pub quantity: i64,
    pub status: ProductStatus,
}

impl Product {
    pub fn can_supply(&self, quantity: i64) -> bool {
        self.status == ProductStatus::Available && self.quantity >= quantity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

//--------------------------------------       Journal         ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLedgerEntry {
    pub order_id: OrderId,
    pub transaction_id: Option<TransactionId>,
    pub provider: ProviderKind,
    pub external_transaction_id: String,
    pub amount: Money,
    pub payer_id: UserId,
    pub payee_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub order_id: OrderId,
    pub transaction_id: Option<TransactionId>,
    pub provider: ProviderKind,
    pub external_transaction_id: String,
    pub amount: Money,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReviewEntry {
    pub order_id: Option<OrderId>,
    pub provider: Option<ProviderKind>,
    pub reason: String,
    pub payload: String,
}

impl NewReviewEntry {
    pub fn new<S: Into<String>>(order_id: Option<OrderId>, provider: Option<ProviderKind>, reason: S) -> Self {
        Self { order_id, provider, reason: reason.into(), payload: String::new() }
    }

    pub fn with_payload<S: Into<String>>(mut self, payload: S) -> Self {
        self.payload = payload.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    pub id: i64,
    pub order_id: Option<OrderId>,
    pub provider: Option<ProviderKind>,
    pub reason: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}
