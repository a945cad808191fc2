//! MoMo wallet redirect (`captureWallet`) integration.
//!
//! Every request is signed with HMAC-SHA256 over a `key=value&...` string whose keys are in alphabetical order. The
//! IPN callback carries its signature in the JSON body and expects an empty `204` in return.
use std::time::Duration;

use chrono::Utc;
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

pub const MOMO_SANDBOX_ENDPOINT: &str = "https://test-payment.momo.vn";

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub endpoint: String,
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: Secret<String>,
}

impl Default for MomoConfig {
    fn default() -> Self {
        Self {
            endpoint: MOMO_SANDBOX_ENDPOINT.to_string(),
            partner_code: String::default(),
            access_key: String::default(),
            secret_key: Secret::default(),
        }
    }
}

#[derive(Clone)]
pub struct MomoProvider<S = HmacSha256> {
    config: MomoConfig,
    signer: S,
    client: reqwest::Client,
}

impl MomoProvider<HmacSha256> {
    pub fn new(config: MomoConfig) -> Result<Self, PaymentGatewayError> {
        let signer = HmacSha256::new(config.secret_key.reveal().as_str());
        Self::with_signer(config, signer, DEFAULT_GATEWAY_TIMEOUT)
    }
}

impl<S: SignatureScheme> MomoProvider<S> {
    pub fn with_signer(config: MomoConfig, signer: S, timeout: Duration) -> Result<Self, PaymentGatewayError> {
        let client = http_client(ProviderKind::MoMo, timeout)?;
        Ok(Self { config, signer, client })
    }

    fn error<M: Into<String>>(&self, message: M) -> PaymentGatewayError {
        PaymentGatewayError::new(ProviderKind::MoMo, message)
    }

    /// The string MoMo signs for an IPN callback. Fields are taken verbatim from the body.
    fn callback_signature_input(&self, body: &Value) -> String {
        let field = |name: &str| json_scalar(&body[name]);
        format!(
            "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&\
             payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
            self.config.access_key,
            field("amount"),
            field("extraData"),
            field("message"),
            field("orderId"),
            field("orderInfo"),
            field("orderType"),
            field("partnerCode"),
            field("payType"),
            field("requestId"),
            field("responseTime"),
            field("resultCode"),
            field("transId"),
        )
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, PaymentGatewayError> {
        let url = format!("{}{path}", self.config.endpoint.trim_end_matches('/'));
        trace!("💳️ MoMo POST {url}");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.error(format!("Request to {url} failed: {e}")))?;
        response.json::<Value>().await.map_err(|e| self.error(format!("Invalid response from {url}: {e}")))
    }
}

impl<S: SignatureScheme> PaymentProvider for MomoProvider<S> {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MoMo
    }

    async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError> {
        // MoMo rejects a reused orderId, so every attempt gets its own. Our reference travels in extraData.
        let now = Utc::now().timestamp_millis();
        let order_id = format!("{}-{now}", request.order_ref);
        let request_id = format!("{order_id}-{}", rand::random::<u16>());
        let request_type = "captureWallet";
        let amount = request.amount.value();
        let raw = format!(
            "accessKey={}&amount={amount}&extraData={}&ipnUrl={}&orderId={order_id}&orderInfo={}&partnerCode={}&\
             redirectUrl={}&requestId={request_id}&requestType={request_type}",
            self.config.access_key,
            request.order_ref,
            request.callback_url,
            request.description,
            self.config.partner_code,
            request.return_url,
        );
        let signature = self.signer.sign(raw.as_bytes());
        let body = json!({
            "partnerCode": self.config.partner_code,
            "accessKey": self.config.access_key,
            "requestId": request_id,
            "amount": amount,
            "orderId": order_id,
            "orderInfo": request.description,
            "redirectUrl": request.return_url,
            "ipnUrl": request.callback_url,
            "extraData": request.order_ref,
            "requestType": request_type,
            "lang": "vi",
            "signature": signature,
        });
        let response = self.post("/v2/gateway/api/create", &body).await?;
        let result_code = response["resultCode"].as_i64().unwrap_or(-1);
        match response["payUrl"].as_str() {
            Some(url) if result_code == 0 => {
                debug!("💳️ MoMo payment link created for {} ({order_id})", request.order_ref);
                Ok(PaymentLink { checkout_url: url.to_string(), correlation_id: order_id })
            },
            _ => {
                let message = response["message"].as_str().unwrap_or("no message");
                Err(self.error(format!("Create payment returned resultCode {result_code}: {message}")))
            },
        }
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        let body: Value = match serde_json::from_str(&payload.body) {
            Ok(v) => v,
            Err(e) => return CallbackVerification::invalid(format!("Callback is not valid JSON: {e}")),
        };
        let Some(signature) = body["signature"].as_str() else {
            return CallbackVerification::invalid("Callback has no signature");
        };
        if body["partnerCode"].as_str() != Some(self.config.partner_code.as_str()) {
            return CallbackVerification::invalid("Callback is for a different partner code");
        }
        let raw = self.callback_signature_input(&body);
        if !self.signer.verify(raw.as_bytes(), signature) {
            return CallbackVerification::invalid("Signature mismatch");
        }
        let result_code = body["resultCode"].as_i64().unwrap_or(-1);
        let status = if result_code == 0 { CallbackStatus::Succeeded } else { CallbackStatus::Failed };
        let mut verification = CallbackVerification::valid(status)
            .with_correlation_id(json_scalar(&body["orderId"]))
            .with_order_ref(body["extraData"].as_str().map(String::from))
            .with_amount(json_amount(&body["amount"]))
            .with_external_transaction_id(Some(json_scalar(&body["transId"])));
        if status == CallbackStatus::Failed {
            let message = body["message"].as_str().unwrap_or("Payment failed");
            verification = verification.with_failure_reason(format!("{message} (resultCode {result_code})"));
        }
        verification
    }

    async fn query_status(&self, correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError> {
        let request_id = format!("{correlation_id}-q{}", Utc::now().timestamp_millis());
        let raw = format!(
            "accessKey={}&orderId={correlation_id}&partnerCode={}&requestId={request_id}",
            self.config.access_key, self.config.partner_code
        );
        let body = json!({
            "partnerCode": self.config.partner_code,
            "requestId": request_id,
            "orderId": correlation_id,
            "lang": "vi",
            "signature": self.signer.sign(raw.as_bytes()),
        });
        let response = self.post("/v2/gateway/api/query", &body).await?;
        let status = match response["resultCode"].as_i64() {
            Some(0) => ProviderStatus::succeeded(
                json_amount(&response["amount"]),
                Some(json_scalar(&response["transId"])).filter(|s| !s.is_empty()),
            ),
            Some(1000) | Some(7000) | Some(7002) => ProviderStatus::pending(),
            Some(_) => ProviderStatus::failed(),
            None => return Err(self.error("Query response has no resultCode")),
        };
        Ok(Some(status))
    }

    fn acknowledge(&self, decision: AckDecision) -> Acknowledgement {
        match decision {
            AckDecision::Accepted | AckDecision::AlreadyProcessed | AckDecision::Unmatched => {
                Acknowledgement::no_content()
            },
            AckDecision::Rejected => Acknowledgement::new(400, Some(json!({ "error": "Invalid signature" }))),
            AckDecision::Retry => Acknowledgement::retry(),
        }
    }
}
