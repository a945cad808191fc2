use mkt_common::Money;
use mockall::mock;
use order_engine::{
    db_types::ProviderKind,
    providers::{
        AckDecision,
        Acknowledgement,
        CallbackPayload,
        CallbackStatus,
        CallbackVerification,
        PaymentGatewayError,
        PaymentLink,
        PaymentProvider,
        PaymentRequest,
        ProviderStatus,
    },
};
use serde_json::{json, Value};

mock! {
    pub Gateway {}
    impl PaymentProvider for Gateway {
        fn kind(&self) -> ProviderKind;
        fn signature_header(&self) -> Option<&'static str>;
        async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError>;
        fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification;
        async fn query_status(&self, correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError>;
        fn acknowledge(&self, decision: AckDecision) -> Acknowledgement;
    }
}

pub const SIGNATURE_HEADER: &str = "X-Test-Signature";
pub const GOOD_SIGNATURE: &str = "signed-by-payos";

/// A PayOS stand-in. Callbacks carrying [`GOOD_SIGNATURE`] are trusted and read as `{orderRef, amount, status}`.
pub fn payos_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_kind().return_const(ProviderKind::PayOs);
    gateway.expect_signature_header().return_const(Some(SIGNATURE_HEADER));
    gateway.expect_create_payment_request().returning(|req| {
        let correlation_id = format!("corr-{}", req.order_ref);
        Ok(PaymentLink { checkout_url: format!("https://pay.payos.test/{correlation_id}"), correlation_id })
    });
    gateway.expect_verify_callback().returning(|payload| verify(payload));
    gateway.expect_query_status().returning(|_| Ok(None));
    gateway.expect_acknowledge().returning(|decision| match decision {
        AckDecision::Rejected => Acknowledgement::new(400, Some(json!({ "code": "97", "desc": "Invalid signature" }))),
        AckDecision::Retry => Acknowledgement::retry(),
        _ => Acknowledgement::new(200, Some(json!({ "code": "00", "desc": "success" }))),
    });
    gateway
}

/// Like [`payos_gateway`], but every payment link request fails.
pub fn broken_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_kind().return_const(ProviderKind::PayOs);
    gateway.expect_signature_header().return_const(Some(SIGNATURE_HEADER));
    gateway
        .expect_create_payment_request()
        .returning(|_| Err(PaymentGatewayError::new(ProviderKind::PayOs, "Service unavailable")));
    gateway.expect_acknowledge().returning(|_| Acknowledgement::retry());
    gateway
}

/// A gateway that must not be asked for a payment link.
pub fn silent_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_kind().return_const(ProviderKind::PayOs);
    gateway.expect_create_payment_request().never();
    gateway.expect_query_status().never();
    gateway
}

fn verify(payload: &CallbackPayload) -> CallbackVerification {
    if payload.signature.as_deref() != Some(GOOD_SIGNATURE) {
        return CallbackVerification::invalid("Signature mismatch");
    }
    let Ok(body) = serde_json::from_str::<Value>(&payload.body) else {
        return CallbackVerification::invalid("Body is not JSON");
    };
    let status = match body["status"].as_str() {
        Some("PAID") => CallbackStatus::Succeeded,
        Some("CANCELLED") => CallbackStatus::Failed,
        _ => CallbackStatus::Informational,
    };
    CallbackVerification::valid(status)
        .with_order_ref(body["orderRef"].as_str().map(String::from))
        .with_amount(body["amount"].as_i64().map(Money::from))
        .with_external_transaction_id(body["reference"].as_str().map(String::from))
}
