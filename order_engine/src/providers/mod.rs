//! # Payment provider adapters
//!
//! Each supported gateway (MoMo, PayOS, Stripe and ZaloPay) is wrapped in an adapter that implements
//! [`PaymentProvider`]. An adapter knows how to
//! * ask the gateway for a checkout link,
//! * check the signature on an incoming callback and normalise its content into a [`CallbackVerification`],
//! * poll the gateway for the state of a payment (where the gateway supports it),
//! * produce the literal response the gateway expects when we acknowledge a callback.
//!
//! Adapters never touch orders. Everything they report is consumed by the reconciliation API.
//!
//! Signature checks go through the [`SignatureScheme`] capability. [`HmacSha256`] is the default.
use std::time::Duration;

use mkt_common::Money;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::db_types::ProviderKind;

mod gateway;
mod momo;
mod payos;
mod signature;
mod stripe;
mod zalopay;

pub use gateway::{GatewayAdapter, PaymentProviders};
pub use momo::{MomoConfig, MomoProvider};
pub use payos::{PayOsConfig, PayOsProvider};
pub use signature::{HmacSha256, SignatureScheme};
pub use stripe::{StripeConfig, StripeProvider, DEFAULT_SIGNATURE_TOLERANCE_SECS};
pub use zalopay::{ZaloPayConfig, ZaloPayProvider};

pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Payment gateway {provider} failed: {message}")]
pub struct PaymentGatewayError {
    pub provider: ProviderKind,
    pub message: String,
}

impl PaymentGatewayError {
    pub fn new<S: Into<String>>(provider: ProviderKind, message: S) -> Self {
        Self { provider, message: message.into() }
    }
}

/// What we ask a gateway to collect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub amount: Money,
    pub currency: String,
    /// The order id, or the cart transaction id for grouped orders.
    pub order_ref: String,
    pub description: String,
    pub return_url: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLink {
    pub checkout_url: String,
    /// The key the gateway will use to refer to this payment in callbacks and status queries.
    pub correlation_id: String,
}

/// A raw callback, exactly as received.
#[derive(Debug, Clone, Default)]
pub struct CallbackPayload {
    pub body: String,
    /// The value of the provider's signature header, for gateways that sign out-of-band.
    pub signature: Option<String>,
}

impl CallbackPayload {
    pub fn new<S: Into<String>>(body: S) -> Self {
        Self { body: body.into(), signature: None }
    }

    pub fn with_signature<S: Into<String>>(mut self, signature: S) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Succeeded,
    Failed,
    /// A genuine notification that says nothing about whether money moved (e.g. a Stripe event type we do not act
    /// on).
    Informational,
}

/// The normalised content of a callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackVerification {
    pub valid: bool,
    pub status: CallbackStatus,
    pub correlation_id: Option<String>,
    /// Our own order or transaction reference, when the gateway echoes it back.
    pub order_ref: Option<String>,
    pub amount: Option<Money>,
    pub external_transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl CallbackVerification {
    pub fn invalid<S: Into<String>>(reason: S) -> Self {
        Self {
            valid: false,
            status: CallbackStatus::Failed,
            correlation_id: None,
            order_ref: None,
            amount: None,
            external_transaction_id: None,
            failure_reason: Some(reason.into()),
        }
    }

    pub fn valid(status: CallbackStatus) -> Self {
        Self {
            valid: true,
            status,
            correlation_id: None,
            order_ref: None,
            amount: None,
            external_transaction_id: None,
            failure_reason: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.valid && self.status == CallbackStatus::Succeeded
    }

    pub fn with_correlation_id<S: Into<String>>(mut self, id: S) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_order_ref(mut self, order_ref: Option<String>) -> Self {
        self.order_ref = order_ref.filter(|s| !s.is_empty());
        self
    }

    pub fn with_amount(mut self, amount: Option<Money>) -> Self {
        self.amount = amount;
        self
    }

    pub fn with_external_transaction_id(mut self, id: Option<String>) -> Self {
        self.external_transaction_id = id.filter(|s| !s.is_empty());
        self
    }

    pub fn with_failure_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}

/// The gateway's view of a payment, as returned by a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub succeeded: bool,
    pub pending: bool,
    pub amount: Option<Money>,
    pub external_transaction_id: Option<String>,
}

impl ProviderStatus {
    pub fn succeeded(amount: Option<Money>, external_transaction_id: Option<String>) -> Self {
        Self { succeeded: true, pending: false, amount, external_transaction_id }
    }

    pub fn pending() -> Self {
        Self { succeeded: false, pending: true, amount: None, external_transaction_id: None }
    }

    pub fn failed() -> Self {
        Self { succeeded: false, pending: false, amount: None, external_transaction_id: None }
    }
}

/// How a callback was handled. Each provider maps this onto its own acknowledgement format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckDecision {
    /// The callback was applied.
    Accepted,
    /// Every order it refers to was already settled.
    AlreadyProcessed,
    /// No order matches the callback. Acknowledged so that the gateway stops retrying.
    Unmatched,
    /// The signature did not verify.
    Rejected,
    /// Something went wrong on our side. The gateway should deliver the callback again.
    Retry,
}

/// The literal HTTP response a provider expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub status: u16,
    pub body: Option<Value>,
}

impl Acknowledgement {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn no_content() -> Self {
        Self::new(204, None)
    }

    pub fn retry() -> Self {
        Self::new(500, Some(serde_json::json!({ "error": "Temporary failure. Please retry." })))
    }
}

#[allow(async_fn_in_trait)]
pub trait PaymentProvider {
    fn kind(&self) -> ProviderKind;

    /// The HTTP header that carries the callback signature, for gateways that do not embed it in the body.
    fn signature_header(&self) -> Option<&'static str> {
        None
    }

    /// Asks the gateway for a checkout link. There is no de-duplication: every call is a new payment request.
    async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError>;

    /// Checks the signature on a callback and decodes it. This never fails; a callback that cannot be verified or
    /// parsed comes back with `valid == false`.
    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification;

    /// Polls the gateway for the state of a payment. `Ok(None)` means the gateway does not support polling.
    async fn query_status(&self, correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError>;

    fn acknowledge(&self, decision: AckDecision) -> Acknowledgement;
}

pub(crate) fn http_client(provider: ProviderKind, timeout: Duration) -> Result<reqwest::Client, PaymentGatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PaymentGatewayError::new(provider, format!("Could not build HTTP client: {e}")))
}

/// Reads an integer amount from a JSON field that gateways send either as a number or as a string.
pub(crate) fn json_amount(value: &Value) -> Option<Money> {
    match value {
        Value::Number(n) => n.as_i64().map(Money::from),
        Value::String(s) => s.parse::<i64>().ok().map(Money::from),
        _ => None,
    }
}

/// Renders a JSON scalar the way gateways do when they build signature strings.
pub(crate) fn json_scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
