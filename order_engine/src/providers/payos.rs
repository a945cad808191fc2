//! PayOS hosted checkout link integration.
//!
//! PayOS identifies a payment by a numeric `orderCode` that we generate. Webhook bodies carry a `data` object and a
//! `signature` computed over the `data` fields sorted by key.
use std::time::Duration;

use chrono::Utc;
use log::*;
use mkt_common::Secret;
use serde_json::{json, Map, Value};

use super::{
    http_client,
    json_amount,
    json_scalar,
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

pub const PAYOS_ENDPOINT: &str = "https://api-merchant.payos.vn";
/// PayOS truncates descriptions beyond this length for most bank accounts.
const MAX_DESCRIPTION_LEN: usize = 25;

#[derive(Debug, Clone)]
pub struct PayOsConfig {
    pub endpoint: String,
    pub client_id: String,
    pub api_key: Secret<String>,
    pub checksum_key: Secret<String>,
}

impl Default for PayOsConfig {
    fn default() -> Self {
        Self {
            endpoint: PAYOS_ENDPOINT.to_string(),
            client_id: String::default(),
            api_key: Secret::default(),
            checksum_key: Secret::default(),
        }
    }
}

#[derive(Clone)]
pub struct PayOsProvider<S = HmacSha256> {
    config: PayOsConfig,
    signer: S,
    client: reqwest::Client,
}

impl PayOsProvider<HmacSha256> {
    pub fn new(config: PayOsConfig) -> Result<Self, PaymentGatewayError> {
        let signer = HmacSha256::new(config.checksum_key.reveal().as_str());
        Self::with_signer(config, signer, DEFAULT_GATEWAY_TIMEOUT)
    }
}

/// A numeric order code that stays below 2^53 so that it survives JavaScript clients.
fn new_order_code() -> i64 {
    let millis = Utc::now().timestamp_millis() % 1_000_000_000_000;
    millis * 1000 + i64::from(rand::random::<u16>() % 1000)
}

/// `key=value` pairs of a JSON object, sorted by key and joined with `&`.
fn sorted_signature_input(data: &Map<String, Value>) -> String {
    let mut keys = data.keys().collect::<Vec<_>>();
    keys.sort();
    keys.into_iter().map(|k| format!("{k}={}", json_scalar(&data[k]))).collect::<Vec<_>>().join("&")
}

impl<S: SignatureScheme> PayOsProvider<S> {
    pub fn with_signer(config: PayOsConfig, signer: S, timeout: Duration) -> Result<Self, PaymentGatewayError> {
        let client = http_client(ProviderKind::PayOs, timeout)?;
        Ok(Self { config, signer, client })
    }

    fn error<M: Into<String>>(&self, message: M) -> PaymentGatewayError {
        PaymentGatewayError::new(ProviderKind::PayOs, message)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.endpoint.trim_end_matches('/'))
    }

    fn check_response(&self, response: Value) -> Result<Value, PaymentGatewayError> {
        match response["code"].as_str() {
            Some("00") => Ok(response["data"].clone()),
            code => {
                let desc = response["desc"].as_str().unwrap_or("no description");
                Err(self.error(format!("PayOS returned code {}: {desc}", code.unwrap_or("?"))))
            },
        }
    }
}

impl<S: SignatureScheme> PaymentProvider for PayOsProvider<S> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::PayOs
    }

    async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError> {
        let order_code = new_order_code();
        let description = request.description.chars().take(MAX_DESCRIPTION_LEN).collect::<String>();
        let amount = request.amount.value();
        let raw = format!(
            "amount={amount}&cancelUrl={}&description={description}&orderCode={order_code}&returnUrl={}",
            request.return_url, request.return_url
        );
        let body = json!({
            "orderCode": order_code,
            "amount": amount,
            "description": description,
            "returnUrl": request.return_url,
            "cancelUrl": request.return_url,
            "signature": self.signer.sign(raw.as_bytes()),
        });
        let url = self.url("/v2/payment-requests");
        trace!("💳️ PayOS POST {url}");
        let response = self
            .client
            .post(&url)
            .header("x-client-id", &self.config.client_id)
            .header("x-api-key", self.config.api_key.reveal())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.error(format!("Request to {url} failed: {e}")))?
            .json::<Value>()
            .await
            .map_err(|e| self.error(format!("Invalid response from {url}: {e}")))?;
        let data = self.check_response(response)?;
        let checkout_url = data["checkoutUrl"]
            .as_str()
            .ok_or_else(|| self.error("Response has no checkoutUrl"))?
            .to_string();
        debug!("💳️ PayOS payment link created for {} (orderCode {order_code})", request.order_ref);
        Ok(PaymentLink { checkout_url, correlation_id: order_code.to_string() })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        let body: Value = match serde_json::from_str(&payload.body) {
            Ok(v) => v,
            Err(e) => return CallbackVerification::invalid(format!("Callback is not valid JSON: {e}")),
        };
        let (Some(data), Some(signature)) = (body["data"].as_object(), body["signature"].as_str()) else {
            return CallbackVerification::invalid("Callback is missing data or signature");
        };
        let raw = sorted_signature_input(data);
        if !self.signer.verify(raw.as_bytes(), signature) {
            return CallbackVerification::invalid("Signature mismatch");
        }
        let code = data.get("code").and_then(Value::as_str).unwrap_or_default();
        let status = if code == "00" { CallbackStatus::Succeeded } else { CallbackStatus::Failed };
        let null = Value::Null;
        let mut verification = CallbackVerification::valid(status)
            .with_correlation_id(json_scalar(data.get("orderCode").unwrap_or(&null)))
            .with_amount(data.get("amount").and_then(json_amount))
            .with_external_transaction_id(data.get("reference").map(json_scalar));
        if status == CallbackStatus::Failed {
            let desc = data.get("desc").and_then(Value::as_str).unwrap_or("Payment failed");
            verification = verification.with_failure_reason(format!("{desc} (code {code})"));
        }
        verification
    }

    async fn query_status(&self, correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError> {
        let url = self.url(&format!("/v2/payment-requests/{correlation_id}"));
        trace!("💳️ PayOS GET {url}");
        let response = self
            .client
            .get(&url)
            .header("x-client-id", &self.config.client_id)
            .header("x-api-key", self.config.api_key.reveal())
            .send()
            .await
            .map_err(|e| self.error(format!("Request to {url} failed: {e}")))?
            .json::<Value>()
            .await
            .map_err(|e| self.error(format!("Invalid response from {url}: {e}")))?;
        let data = self.check_response(response)?;
        let status = match data["status"].as_str() {
            Some("PAID") => {
                let reference = data["transactions"][0]["reference"].as_str().map(String::from);
                ProviderStatus::succeeded(json_amount(&data["amountPaid"]), reference)
            },
            Some("PENDING") | Some("PROCESSING") => ProviderStatus::pending(),
            Some(_) => ProviderStatus::failed(),
            None => return Err(self.error("Status response has no status")),
        };
        Ok(Some(status))
    }

    fn acknowledge(&self, decision: AckDecision) -> Acknowledgement {
        match decision {
            AckDecision::Accepted | AckDecision::AlreadyProcessed | AckDecision::Unmatched => {
                Acknowledgement::new(200, Some(json!({ "success": true })))
            },
            AckDecision::Rejected => Acknowledgement::new(400, Some(json!({ "success": false }))),
            AckDecision::Retry => Acknowledgement::retry(),
        }
    }
}
