//! Stripe Checkout integration, talking to the REST API directly.
//!
//! Webhooks are signed out-of-band: the `Stripe-Signature` header carries `t=<timestamp>,v1=<hex hmac>` where the
//! HMAC covers `"{t}.{raw body}"`. Stripe has no polling endpoint wired up here, so `query_status` reports that it is
//! unsupported and the webhook is the only source of truth.
//!
//! A declined card does not end a Checkout session; the buyer may try again with another card. Only an expired
//! session or a failed delayed payment is treated as a final failure.
use std::time::Duration;

use chrono::Utc;
use log::*;
use mkt_common::Secret;
use serde_json::{json, Value};

use super::{
    http_client,
    json_amount,
    AckDecision,
    Acknowledgement,
    CallbackPayload,
    CallbackStatus,
    CallbackVerification,
    HmacSha256,
    PaymentGatewayError,
    PaymentLink,
    PaymentProvider,
    PaymentRequest,
    ProviderStatus,
    SignatureScheme,
    DEFAULT_GATEWAY_TIMEOUT,
};
use crate::db_types::ProviderKind;

pub const STRIPE_ENDPOINT: &str = "https://api.stripe.com";
pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";
/// Signed events older (or newer) than this many seconds are rejected.
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub endpoint: String,
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub signature_tolerance_secs: i64,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            endpoint: STRIPE_ENDPOINT.to_string(),
            secret_key: Secret::default(),
            webhook_secret: Secret::default(),
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }
}

#[derive(Clone)]
pub struct StripeProvider<S = HmacSha256> {
    config: StripeConfig,
    signer: S,
    client: reqwest::Client,
}

impl StripeProvider<HmacSha256> {
    pub fn new(config: StripeConfig) -> Result<Self, PaymentGatewayError> {
        let signer = HmacSha256::new(config.webhook_secret.reveal().as_str());
        Self::with_signer(config, signer, DEFAULT_GATEWAY_TIMEOUT)
    }
}

/// Splits a `Stripe-Signature` header into its timestamp and every `v1` signature it carries.
fn parse_signature_header(header: &str) -> Option<(&str, Vec<&str>)> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }
    match timestamp {
        Some(t) if !signatures.is_empty() => Some((t, signatures)),
        _ => None,
    }
}

impl<S: SignatureScheme> StripeProvider<S> {
    pub fn with_signer(config: StripeConfig, signer: S, timeout: Duration) -> Result<Self, PaymentGatewayError> {
        let client = http_client(ProviderKind::Stripe, timeout)?;
        Ok(Self { config, signer, client })
    }

    fn error<M: Into<String>>(&self, message: M) -> PaymentGatewayError {
        PaymentGatewayError::new(ProviderKind::Stripe, message)
    }

    fn decode_event(&self, event: &Value) -> CallbackVerification {
        let object = &event["data"]["object"];
        let order_ref = object["metadata"]["order_ref"]
            .as_str()
            .or_else(|| object["client_reference_id"].as_str())
            .map(String::from);
        match event["type"].as_str().unwrap_or_default() {
            "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
                let status = if object["payment_status"].as_str() == Some("paid") {
                    CallbackStatus::Succeeded
                } else {
                    // Delayed payment methods complete the session before the money arrives.
                    CallbackStatus::Informational
                };
                CallbackVerification::valid(status)
                    .with_correlation_id(object["id"].as_str().unwrap_or_default())
                    .with_order_ref(order_ref)
                    .with_amount(json_amount(&object["amount_total"]))
                    .with_external_transaction_id(object["payment_intent"].as_str().map(String::from))
            },
            "checkout.session.async_payment_failed" | "checkout.session.expired" => {
                CallbackVerification::valid(CallbackStatus::Failed)
                    .with_correlation_id(object["id"].as_str().unwrap_or_default())
                    .with_order_ref(order_ref)
                    .with_failure_reason(format!("Stripe event {}", event["type"].as_str().unwrap_or_default()))
            },
            "payment_intent.payment_failed" => {
                let reason = object["last_payment_error"]["message"].as_str().unwrap_or("Card payment failed");
                info!("💳️ Stripe payment attempt {} declined: {reason}", object["id"].as_str().unwrap_or_default());
                CallbackVerification::valid(CallbackStatus::Informational)
                    .with_order_ref(order_ref)
                    .with_external_transaction_id(object["id"].as_str().map(String::from))
                    .with_failure_reason(reason)
            },
            other => {
                trace!("💳️ Stripe event {other} carries no payment outcome");
                CallbackVerification::valid(CallbackStatus::Informational).with_order_ref(order_ref)
            },
        }
    }
}

impl<S: SignatureScheme> PaymentProvider for StripeProvider<S> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Stripe
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some(STRIPE_SIGNATURE_HEADER)
    }

    async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError> {
        let url = format!("{}/v1/checkout/sessions", self.config.endpoint.trim_end_matches('/'));
        let amount = request.amount.value().to_string();
        let currency = request.currency.to_ascii_lowercase();
        trace!("💳️ Stripe POST {url}");
        let response: Value = self
            .client
            .post(&url)
            .basic_auth(self.config.secret_key.reveal(), None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("success_url", request.return_url.as_str()),
                ("cancel_url", request.return_url.as_str()),
                ("client_reference_id", request.order_ref.as_str()),
                ("line_items[0][quantity]", "1"),
                ("line_items[0][price_data][currency]", currency.as_str()),
                ("line_items[0][price_data][unit_amount]", amount.as_str()),
                ("line_items[0][price_data][product_data][name]", request.description.as_str()),
                ("metadata[order_ref]", request.order_ref.as_str()),
                ("payment_intent_data[metadata][order_ref]", request.order_ref.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.error(format!("Request to {url} failed: {e}")))?
            .json()
            .await
            .map_err(|e| self.error(format!("Invalid response from {url}: {e}")))?;
        match (response["id"].as_str(), response["url"].as_str()) {
            (Some(id), Some(checkout_url)) => {
                debug!("💳️ Stripe checkout session {id} created for {}", request.order_ref);
                Ok(PaymentLink { checkout_url: checkout_url.to_string(), correlation_id: id.to_string() })
            },
            _ => {
                let message = response["error"]["message"].as_str().unwrap_or("no session in response");
                Err(self.error(format!("Create checkout session failed: {message}")))
            },
        }
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        let Some((timestamp, signatures)) = payload.signature.as_deref().and_then(parse_signature_header) else {
            return CallbackVerification::invalid("Missing or malformed Stripe-Signature header");
        };
        let signed_payload = format!("{timestamp}.{}", payload.body);
        if !signatures.iter().any(|sig| self.signer.verify(signed_payload.as_bytes(), sig)) {
            return CallbackVerification::invalid("Signature mismatch");
        }
        let Ok(signed_at) = timestamp.parse::<i64>() else {
            return CallbackVerification::invalid(format!("Invalid signature timestamp {timestamp}"));
        };
        let age = Utc::now().timestamp() - signed_at;
        if age.abs() > self.config.signature_tolerance_secs {
            warn!("💳️ Stripe event signed {age}s ago is outside the tolerance window");
            return CallbackVerification::invalid("Signature timestamp outside the tolerance window");
        }
        match serde_json::from_str::<Value>(&payload.body) {
            Ok(event) => self.decode_event(&event),
            Err(e) => CallbackVerification::invalid(format!("Event is not valid JSON: {e}")),
        }
    }

    async fn query_status(&self, correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError> {
        trace!("💳️ Stripe does not support status polling. Session {correlation_id} left to webhooks.");
        Ok(None)
    }

    fn acknowledge(&self, decision: AckDecision) -> Acknowledgement {
        match decision {
            AckDecision::Accepted | AckDecision::AlreadyProcessed | AckDecision::Unmatched => {
                Acknowledgement::new(200, Some(json!({ "received": true })))
            },
            AckDecision::Rejected => Acknowledgement::new(400, Some(json!({ "error": "Invalid signature" }))),
            AckDecision::Retry => Acknowledgement::retry(),
        }
    }
}
