use actix_web::{http::StatusCode, test::TestRequest};
use order_engine::{
    db_types::{OrderId, OrderStatus, PaymentStatus},
    test_utils::seed_product,
    traits::OrderStore,
};
use serde_json::{json, Value};

use super::{
    helpers::{bearer, buyer_token, TestServer, SELLER},
    mocks::{payos_gateway, GOOD_SIGNATURE, SIGNATURE_HEADER},
};

async fn pending_order(server: &TestServer) -> String {
    seed_product(server.db(), "p1", SELLER, 200_000, 5).await;
    let req = TestRequest::post().uri("/orders/checkout").insert_header(bearer(&buyer_token())).set_json(json!({
        "productId": "p1",
        "quantity": 1,
        "shippingAddress": { "fullName": "Tran Van Binh", "address": "5 Nguyen Hue, Quan 1", "phone": "0912345678" },
        "provider": "payos"
    }));
    let (status, body) = server.call(req, payos_gateway).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let json: Value = serde_json::from_str(&body).unwrap();
    json["orderId"].as_str().unwrap().to_string()
}

fn webhook(provider: &str, body: Value, signature: Option<&str>) -> TestRequest {
    let mut req = TestRequest::post()
        .uri(&format!("/payments/{provider}/webhook"))
        .insert_header(("Content-Type", "application/json"))
        .set_payload(body.to_string());
    if let Some(signature) = signature {
        req = req.insert_header((SIGNATURE_HEADER, signature));
    }
    req
}

#[actix_web::test]
async fn unknown_provider_is_not_found() {
    let server = TestServer::new().await;
    let (status, _) = server.call(webhook("paypal", json!({}), Some(GOOD_SIGNATURE)), payos_gateway).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn unconfigured_provider_is_not_found() {
    let server = TestServer::new().await;
    let (status, body) = server.call(webhook("stripe", json!({}), Some(GOOD_SIGNATURE)), payos_gateway).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("not enabled"), "{body}");
}

#[actix_web::test]
async fn bad_signature_changes_nothing() {
    let server = TestServer::new().await;
    let id = pending_order(&server).await;
    let callback = json!({ "orderRef": id, "amount": 205_000, "status": "PAID" });
    for signature in [None, Some("forged")] {
        let (status, body) = server.call(webhook("payos", callback.clone(), signature), payos_gateway).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["desc"], "Invalid signature");
    }
    let order = server.db().fetch_order(&OrderId::from(id.as_str())).await.unwrap().unwrap();
    assert_eq!(order.order_status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
}

#[actix_web::test]
async fn signed_payment_settles_the_order_once() {
    let server = TestServer::new().await;
    let id = pending_order(&server).await;
    let callback = json!({ "orderRef": id, "amount": 205_000, "status": "PAID", "reference": "FT2410180001" });
    for _ in 0..2 {
        let (status, body) = server.call(webhook("payos", callback.clone(), Some(GOOD_SIGNATURE)), payos_gateway).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["code"], "00");
    }
    let order = server.db().fetch_order(&OrderId::from(id.as_str())).await.unwrap().unwrap();
    assert_eq!(order.order_status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    let details = order.payment_details.expect("payment details should be recorded");
    assert_eq!(details.external_transaction_id.as_deref(), Some("FT2410180001"));
    let paid_entries = order.status_history.iter().filter(|e| e.status == OrderStatus::Paid).count();
    assert_eq!(paid_entries, 1);
}

#[actix_web::test]
async fn failed_payment_voids_the_order() {
    let server = TestServer::new().await;
    let id = pending_order(&server).await;
    let callback = json!({ "orderRef": id, "status": "CANCELLED" });
    let (status, _) = server.call(webhook("payos", callback, Some(GOOD_SIGNATURE)), payos_gateway).await;
    assert_eq!(status, StatusCode::OK);
    let order = server.db().fetch_order(&OrderId::from(id.as_str())).await.unwrap().unwrap();
    assert_eq!(order.order_status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
}

#[actix_web::test]
async fn unmatched_callbacks_are_acknowledged() {
    let server = TestServer::new().await;
    let callback = json!({ "orderRef": "no-such-order", "amount": 10_000, "status": "PAID" });
    let (status, _) = server.call(webhook("payos", callback, Some(GOOD_SIGNATURE)), payos_gateway).await;
    assert_eq!(status, StatusCode::OK);
}

#[actix_web::test]
async fn store_outage_asks_the_gateway_to_retry() {
    let server = TestServer::new().await;
    let id = pending_order(&server).await;
    server.db().pool().close().await;
    let callback = json!({ "orderRef": id, "amount": 205_000, "status": "PAID", "reference": "FT2410180002" });
    let (status, body) = server.call(webhook("payos", callback, Some(GOOD_SIGNATURE)), payos_gateway).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap()["error"], "Temporary failure. Please retry.");
}
