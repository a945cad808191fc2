//! ZaloPay QR wallet integration (v2 API).
//!
//! Requests are signed with `key1`; callbacks are signed with `key2` over the raw `data` string. ZaloPay only calls
//! back for successful payments and reads the `return_code` in our reply to decide whether to deliver it again.
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use log::*;
use mkt_common::Secret;
use serde_json::{json, Value};

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

pub const ZALOPAY_SANDBOX_ENDPOINT: &str = "https://sb-openapi.zalopay.vn";
/// `app_trans_id` must be prefixed with the date in Vietnam's time zone.
const VIETNAM_UTC_OFFSET_SECS: i32 = 7 * 3600;

#[derive(Debug, Clone)]
pub struct ZaloPayConfig {
    pub endpoint: String,
    pub app_id: String,
    pub key1: Secret<String>,
    pub key2: Secret<String>,
}

impl Default for ZaloPayConfig {
    fn default() -> Self {
        Self {
            endpoint: ZALOPAY_SANDBOX_ENDPOINT.to_string(),
            app_id: String::default(),
            key1: Secret::default(),
            key2: Secret::default(),
        }
    }
}

#[derive(Clone)]
pub struct ZaloPayProvider<S = HmacSha256> {
    config: ZaloPayConfig,
    request_signer: S,
    callback_signer: S,
    client: reqwest::Client,
}

impl ZaloPayProvider<HmacSha256> {
    pub fn new(config: ZaloPayConfig) -> Result<Self, PaymentGatewayError> {
        let request_signer = HmacSha256::new(config.key1.reveal().as_str());
        let callback_signer = HmacSha256::new(config.key2.reveal().as_str());
        Self::with_signers(config, request_signer, callback_signer, DEFAULT_GATEWAY_TIMEOUT)
    }
}

fn new_app_trans_id() -> String {
    let now = match FixedOffset::east_opt(VIETNAM_UTC_OFFSET_SECS) {
        Some(tz) => Utc::now().with_timezone(&tz).format("%y%m%d").to_string(),
        None => Utc::now().format("%y%m%d").to_string(),
    };
    format!("{now}_{}{:03}", Utc::now().timestamp_millis() % 100_000_000, rand::random::<u16>() % 1000)
}

impl<S: SignatureScheme> ZaloPayProvider<S> {
    pub fn with_signers(
        config: ZaloPayConfig,
        request_signer: S,
        callback_signer: S,
        timeout: Duration,
    ) -> Result<Self, PaymentGatewayError> {
        let client = http_client(ProviderKind::ZaloPay, timeout)?;
        Ok(Self { config, request_signer, callback_signer, client })
    }

    fn error<M: Into<String>>(&self, message: M) -> PaymentGatewayError {
        PaymentGatewayError::new(ProviderKind::ZaloPay, message)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<Value, PaymentGatewayError> {
        let url = format!("{}{path}", self.config.endpoint.trim_end_matches('/'));
        trace!("💳️ ZaloPay POST {url}");
        self.client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| self.error(format!("Request to {url} failed: {e}")))?
            .json::<Value>()
            .await
            .map_err(|e| self.error(format!("Invalid response from {url}: {e}")))
    }
}

impl<S: SignatureScheme> PaymentProvider for ZaloPayProvider<S> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::ZaloPay
    }

    async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError> {
        let app_trans_id = new_app_trans_id();
        let app_time = Utc::now().timestamp_millis().to_string();
        let amount = request.amount.value().to_string();
        let app_user = "marketplace";
        let item = "[]";
        let embed_data = json!({ "redirecturl": request.return_url, "order_ref": request.order_ref }).to_string();
        let raw = format!(
            "{}|{app_trans_id}|{app_user}|{amount}|{app_time}|{embed_data}|{item}",
            self.config.app_id
        );
        let mac = self.request_signer.sign(raw.as_bytes());
        let response = self
            .post_form("/v2/create", &[
                ("app_id", self.config.app_id.as_str()),
                ("app_trans_id", app_trans_id.as_str()),
                ("app_user", app_user),
                ("app_time", app_time.as_str()),
                ("amount", amount.as_str()),
                ("item", item),
                ("embed_data", embed_data.as_str()),
                ("description", request.description.as_str()),
                ("bank_code", ""),
                ("callback_url", request.callback_url.as_str()),
                ("mac", mac.as_str()),
            ])
            .await?;
        match (response["return_code"].as_i64(), response["order_url"].as_str()) {
            (Some(1), Some(url)) => {
                debug!("💳️ ZaloPay order {app_trans_id} created for {}", request.order_ref);
                Ok(PaymentLink { checkout_url: url.to_string(), correlation_id: app_trans_id })
            },
            (code, _) => {
                let message = response["return_message"].as_str().unwrap_or("no message");
                Err(self.error(format!("Create order returned {}: {message}", code.unwrap_or_default())))
            },
        }
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        let body: Value = match serde_json::from_str(&payload.body) {
            Ok(v) => v,
            Err(e) => return CallbackVerification::invalid(format!("Callback is not valid JSON: {e}")),
        };
        let (Some(data), Some(mac)) = (body["data"].as_str(), body["mac"].as_str()) else {
            return CallbackVerification::invalid("Callback is missing data or mac");
        };
        if !self.callback_signer.verify(data.as_bytes(), mac) {
            return CallbackVerification::invalid("MAC mismatch");
        }
        let data: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return CallbackVerification::invalid(format!("Callback data is not valid JSON: {e}")),
        };
        let order_ref = data["embed_data"]
            .as_str()
            .and_then(|s| serde_json::from_str::<Value>(s).ok())
            .and_then(|embed| embed["order_ref"].as_str().map(String::from));
        CallbackVerification::valid(CallbackStatus::Succeeded)
            .with_correlation_id(json_scalar(&data["app_trans_id"]))
            .with_order_ref(order_ref)
            .with_amount(json_amount(&data["amount"]))
            .with_external_transaction_id(Some(json_scalar(&data["zp_trans_id"])))
    }

    async fn query_status(&self, correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError> {
        let key1 = self.config.key1.reveal();
        let raw = format!("{}|{correlation_id}|{key1}", self.config.app_id);
        let mac = self.request_signer.sign(raw.as_bytes());
        let response = self
            .post_form("/v2/query", &[
                ("app_id", self.config.app_id.as_str()),
                ("app_trans_id", correlation_id),
                ("mac", mac.as_str()),
            ])
            .await?;
        let status = match response["return_code"].as_i64() {
            Some(1) => ProviderStatus::succeeded(
                json_amount(&response["amount"]),
                Some(json_scalar(&response["zp_trans_id"])).filter(|s| !s.is_empty()),
            ),
            Some(3) => ProviderStatus::pending(),
            Some(2) => ProviderStatus::failed(),
            _ => {
                let message = response["return_message"].as_str().unwrap_or("no message");
                return Err(self.error(format!("Unexpected query response: {message}")));
            },
        };
        Ok(Some(status))
    }

    fn acknowledge(&self, decision: AckDecision) -> Acknowledgement {
        let (code, message) = match decision {
            AckDecision::Accepted | AckDecision::Unmatched => (1, "success"),
            AckDecision::AlreadyProcessed => (2, "already processed"),
            AckDecision::Rejected => (-1, "mac not equal"),
            AckDecision::Retry => (0, "retry"),
        };
        Acknowledgement::new(200, Some(json!({ "return_code": code, "return_message": message })))
    }
}
