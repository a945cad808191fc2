use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use mkt_common::Money;
use serde_json::{json, Value};

use crate::{
    db_types::ProviderKind,
    providers::{
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
    },
};

pub const FAKE_SECRET: &str = "fake-gateway-secret";
pub const FAKE_SIGNATURE_HEADER: &str = "X-Fake-Signature";

/// How the fake gateway answers a status query.
#[derive(Debug, Clone)]
pub enum FakeQuery {
    Unsupported,
    Answer(ProviderStatus),
    Error,
    /// Never answers within any sensible timeout.
    Hang,
}

#[derive(Debug)]
struct FakeState {
    query: FakeQuery,
    fail_create: bool,
    requests: Vec<PaymentRequest>,
    queries: usize,
}

/// A payment gateway that lives in memory. Callbacks are JSON bodies signed with HMAC-SHA256 in a header, and the
/// answer to status queries can be scripted.
#[derive(Debug, Clone)]
pub struct FakeProvider {
    kind: ProviderKind,
    signer: HmacSha256,
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Self {
        let state = FakeState { query: FakeQuery::Unsupported, fail_create: false, requests: Vec::new(), queries: 0 };
        Self { kind, signer: HmacSha256::new(FAKE_SECRET), state: Arc::new(Mutex::new(state)) }
    }

    pub fn set_query(&self, query: FakeQuery) {
        self.state.lock().unwrap().query = query;
    }

    pub fn fail_next_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn query_count(&self) -> usize {
        self.state.lock().unwrap().queries
    }

    /// Builds a correctly signed callback.
    pub fn callback(
        &self,
        status: &str,
        order_ref: Option<&str>,
        correlation_id: Option<&str>,
        amount: Option<i64>,
        txid: Option<&str>,
    ) -> CallbackPayload {
        let body = json!({
            "status": status,
            "orderRef": order_ref,
            "correlationId": correlation_id,
            "amount": amount,
            "txid": txid,
        })
        .to_string();
        let signature = self.signer.sign(body.as_bytes());
        CallbackPayload::new(body).with_signature(signature)
    }
}

impl PaymentProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn signature_header(&self) -> Option<&'static str> {
        Some(FAKE_SIGNATURE_HEADER)
    }

    async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create {
            return Err(PaymentGatewayError::new(self.kind, "Gateway unavailable"));
        }
        state.requests.push(request.clone());
        let correlation_id = format!("fake-{}-{}", request.order_ref, state.requests.len());
        Ok(PaymentLink { checkout_url: format!("https://pay.example/{correlation_id}"), correlation_id })
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        let Some(signature) = payload.signature.as_deref() else {
            return CallbackVerification::invalid("Missing signature");
        };
        if !self.signer.verify(payload.body.as_bytes(), signature) {
            return CallbackVerification::invalid("Signature mismatch");
        }
        let Ok(body) = serde_json::from_str::<Value>(&payload.body) else {
            return CallbackVerification::invalid("Body is not JSON");
        };
        let status = match body["status"].as_str() {
            Some("succeeded") => CallbackStatus::Succeeded,
            Some("failed") => CallbackStatus::Failed,
            _ => CallbackStatus::Informational,
        };
        let mut v = CallbackVerification::valid(status)
            .with_order_ref(body["orderRef"].as_str().map(String::from))
            .with_amount(body["amount"].as_i64().map(Money::from))
            .with_external_transaction_id(body["txid"].as_str().map(String::from));
        if let Some(id) = body["correlationId"].as_str() {
            v = v.with_correlation_id(id);
        }
        if status == CallbackStatus::Failed {
            v = v.with_failure_reason("Declined by the fake gateway");
        }
        v
    }

    async fn query_status(&self, _correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError> {
        let query = {
            let mut state = self.state.lock().unwrap();
            state.queries += 1;
            state.query.clone()
        };
        match query {
            FakeQuery::Unsupported => Ok(None),
            FakeQuery::Answer(status) => Ok(Some(status)),
            FakeQuery::Error => Err(PaymentGatewayError::new(self.kind, "Query failed")),
            FakeQuery::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(None)
            },
        }
    }

    fn acknowledge(&self, decision: AckDecision) -> Acknowledgement {
        match decision {
            AckDecision::Rejected => Acknowledgement::new(400, Some(json!({ "ok": false }))),
            AckDecision::Retry => Acknowledgement::retry(),
            _ => Acknowledgement::new(200, Some(json!({ "ok": true, "decision": decision }))),
        }
    }
}
