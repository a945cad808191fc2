use actix_web::{http::StatusCode, test::TestRequest};
use order_engine::{
    db_types::{OrderId, OrderStatus, PaymentStatus, Role},
    test_utils::seed_product,
    traits::OrderStore,
};
use serde_json::{json, Value};

use super::{
    helpers::{admin_token, bearer, buyer_token, issue_token, seller_token, TestServer, BUYER, SELLER},
    mocks::{broken_gateway, payos_gateway, silent_gateway, GOOD_SIGNATURE, SIGNATURE_HEADER},
};

fn address() -> Value {
    json!({ "fullName": "Nguyen Thi Lan", "address": "12 Ly Thuong Kiet, Hoan Kiem", "phone": "0901234567" })
}

fn checkout_body(product: &str, quantity: i64, provider: Option<&str>) -> Value {
    json!({ "productId": product, "quantity": quantity, "shippingAddress": address(), "provider": provider })
}

fn json_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|e| panic!("Response is not JSON ({e}): {body}"))
}

/// Checks out one unit of `p1` as the default buyer and returns the new order id.
async fn place_order(server: &TestServer) -> String {
    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_json(checkout_body("p1", 1, None));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    json_body(&body)["orderId"].as_str().expect("orderId missing").to_string()
}

/// Places an order and pays for it through a signed PayOS callback.
async fn place_paid_order(server: &TestServer) -> String {
    let id = place_order(server).await;
    let callback = json!({ "orderRef": id, "amount": 205_000, "status": "PAID", "reference": "FT123" }).to_string();
    let req = TestRequest::post()
        .uri("/payments/payos/webhook")
        .insert_header((SIGNATURE_HEADER, GOOD_SIGNATURE))
        .insert_header(("Content-Type", "application/json"))
        .set_payload(callback);
    let (status, body) = server.call(req, payos_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    id
}

async fn status_of(server: &TestServer, id: &str) -> (OrderStatus, PaymentStatus) {
    let order = server.db().fetch_order(&OrderId::from(id)).await.unwrap().expect("order should exist");
    (order.order_status, order.payment_status)
}

async fn seeded_server() -> TestServer {
    let server = TestServer::new().await;
    seed_product(server.db(), "p1", SELLER, 200_000, 5).await;
    server
}

#[actix_web::test]
async fn health_needs_no_token() {
    let server = TestServer::new().await;
    let (status, body) = server.call(TestRequest::get().uri("/health"), silent_gateway).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn orders_need_a_token() {
    let server = seeded_server().await;
    let req = TestRequest::post().uri("/orders/checkout").set_json(checkout_body("p1", 1, None));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("No access token was provided"), "{body}");
    let req = TestRequest::get().uri("/orders/anything").insert_header(("Authorization", "Bearer not.a.jwt"));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn checkout_creates_a_pending_order() {
    let server = seeded_server().await;
    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_json(checkout_body("p1", 1, None));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let json = json_body(&body);
    assert_eq!(json["paymentIntent"]["amount"], 205_000);
    assert_eq!(json["paymentIntent"]["currency"], "VND");
    assert!(json.get("checkoutUrl").is_none());
    let id = json["orderId"].as_str().unwrap();
    assert_eq!(status_of(&server, id).await, (OrderStatus::Pending, PaymentStatus::Pending));
}

#[actix_web::test]
async fn checkout_with_a_provider_returns_a_link() {
    let server = seeded_server().await;
    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_json(checkout_body("p1", 2, Some("payos")));
    let (status, body) = server.call(req, payos_gateway).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let json = json_body(&body);
    let id = json["orderId"].as_str().unwrap();
    assert_eq!(json["paymentIntent"]["amount"], 405_000);
    assert_eq!(json["correlationId"], format!("corr-{id}"));
    assert_eq!(json["checkoutUrl"], format!("https://pay.payos.test/corr-{id}"));
    let order = server.db().fetch_order(&OrderId::from(id)).await.unwrap().unwrap();
    assert_eq!(order.payment_correlation_id.as_deref(), Some(format!("corr-{id}").as_str()));
}

#[actix_web::test]
async fn checkout_rejects_bad_input() {
    let server = seeded_server().await;
    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_json(checkout_body("p1", 0, None));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["details"]["invalid"], json!(["quantity"]));

    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_json(json!({ "productId": "p1", "quantity": 1 }));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let invalid = &json_body(&body)["details"]["invalid"];
    assert_eq!(invalid.as_array().map(|a| a.len()), Some(3), "{body}");

    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_json(checkout_body("p1", 6, None));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_payload("{ not json")
        .insert_header(("Content-Type", "application/json"));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("Could not read request body"), "{body}");
}

#[actix_web::test]
async fn failed_payment_link_keeps_the_order() {
    let server = seeded_server().await;
    let req = TestRequest::post()
        .uri("/orders/checkout")
        .insert_header(bearer(&buyer_token()))
        .set_json(checkout_body("p1", 1, Some("payos")));
    let (status, body) = server.call(req, broken_gateway).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let json = json_body(&body);
    let id = json["details"]["orderRef"].as_str().expect("orderRef missing");
    assert_eq!(status_of(&server, id).await, (OrderStatus::Pending, PaymentStatus::Pending));
}

#[actix_web::test]
async fn cart_checkout_with_empty_cart() {
    let server = seeded_server().await;
    let req = TestRequest::post()
        .uri("/orders/checkout/cart")
        .insert_header(bearer(&buyer_token()))
        .set_json(json!({ "shippingAddress": address() }));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[actix_web::test]
async fn pay_returns_a_fresh_link_each_time() {
    let server = seeded_server().await;
    let id = place_order(&server).await;
    for _ in 0..2 {
        let req = TestRequest::post()
            .uri(&format!("/orders/{id}/pay"))
            .insert_header(bearer(&buyer_token()))
            .set_json(json!({ "provider": "payos" }));
        let (status, body) = server.call(req, payos_gateway).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(json_body(&body)["orderRef"], id.as_str());
    }
    let req = TestRequest::post()
        .uri(&format!("/orders/{id}/pay"))
        .insert_header(bearer(&issue_token("someone-else", Role::Buyer, false)))
        .set_json(json!({ "provider": "payos" }));
    let (status, _) = server.call(req, payos_gateway).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let req = TestRequest::post()
        .uri(&format!("/orders/{id}/pay"))
        .insert_header(bearer(&buyer_token()))
        .set_json(json!({ "provider": "stripe" }));
    let (status, _) = server.call(req, payos_gateway).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn only_parties_can_see_an_order() {
    let server = seeded_server().await;
    let id = place_order(&server).await;
    for token in [buyer_token(), seller_token(), admin_token(), issue_token("auditor", Role::Buyer, true)] {
        let req = TestRequest::get().uri(&format!("/orders/{id}")).insert_header(bearer(&token));
        let (status, body) = server.call(req, silent_gateway).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(json_body(&body)["buyerId"], BUYER);
    }
    let stranger = issue_token("stranger", Role::Buyer, false);
    let req = TestRequest::get().uri(&format!("/orders/{id}")).insert_header(bearer(&stranger));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let req = TestRequest::get().uri("/orders/no-such-order").insert_header(bearer(&admin_token()));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn seller_routes_need_the_seller_role() {
    let server = seeded_server().await;
    let id = place_paid_order(&server).await;
    let req = TestRequest::put().uri(&format!("/orders/{id}/seller/accept")).insert_header(bearer(&buyer_token()));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("Insufficient Permissions"), "{body}");
    assert_eq!(status_of(&server, &id).await.0, OrderStatus::Paid);
}

#[actix_web::test]
async fn seller_fulfils_and_buyer_confirms() {
    let server = seeded_server().await;
    let id = place_paid_order(&server).await;

    let req = TestRequest::put().uri(&format!("/orders/{id}/seller/deliver")).insert_header(bearer(&seller_token()));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let other_seller = issue_token("seller-other", Role::Seller, false);
    let req = TestRequest::put().uri(&format!("/orders/{id}/seller/accept")).insert_header(bearer(&other_seller));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = TestRequest::put()
        .uri(&format!("/orders/{id}/seller/accept"))
        .insert_header(bearer(&seller_token()))
        .set_json(json!({ "notes": "Packing today" }));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["orderStatus"], "processing");

    let req = TestRequest::put().uri(&format!("/orders/{id}/seller/deliver")).insert_header(bearer(&seller_token()));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["shippingStatus"], "delivered");

    let req =
        TestRequest::put().uri(&format!("/orders/{id}/buyer/confirm-delivery")).insert_header(bearer(&buyer_token()));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["orderStatus"], "completed");
    assert_eq!(status_of(&server, &id).await.0, OrderStatus::Completed);
}

#[actix_web::test]
async fn buyer_cancel_needs_a_reason() {
    let server = seeded_server().await;
    let id = place_paid_order(&server).await;
    let req = TestRequest::put()
        .uri(&format!("/orders/{id}/buyer/cancel"))
        .insert_header(bearer(&buyer_token()))
        .set_json(json!({ "reason": "  " }));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["details"]["invalid"], json!(["reason"]));

    let req = TestRequest::put()
        .uri(&format!("/orders/{id}/buyer/cancel"))
        .insert_header(bearer(&buyer_token()))
        .set_json(json!({ "reason": "Ordered the wrong size" }));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let json = json_body(&body);
    assert_eq!(json["orderStatus"], "cancelled");
    assert_eq!(json["cancellation"]["reason"], "Ordered the wrong size");
}

#[actix_web::test]
async fn admin_reverts_a_cancellation() {
    let server = seeded_server().await;
    let id = place_paid_order(&server).await;
    let req = TestRequest::put()
        .uri(&format!("/orders/{id}/admin/cancel"))
        .insert_header(bearer(&admin_token()))
        .set_json(json!({ "reason": "Suspected fraud" }));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::OK);

    let set_status = |status: &str| {
        TestRequest::put()
            .uri(&format!("/orders/{id}/admin/status"))
            .insert_header(bearer(&admin_token()))
            .set_json(json!({ "status": status }))
    };
    let (status, _) = server.call(set_status("cancelled"), silent_gateway).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, body) = server.call(set_status("processing"), silent_gateway).await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(status_of(&server, &id).await.0, OrderStatus::Cancelled);

    let (status, body) = server.call(set_status("paid"), silent_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let json = json_body(&body);
    assert_eq!(json["orderStatus"], "paid");
    assert!(json["cancellation"].is_null());
}

#[actix_web::test]
async fn admin_routes_need_the_admin_role() {
    let server = seeded_server().await;
    let id = place_order(&server).await;
    let req = TestRequest::put()
        .uri(&format!("/orders/{id}/admin/shipping-address"))
        .insert_header(bearer(&seller_token()))
        .set_json(json!({ "shippingAddress": address() }));
    let (status, _) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut new_address = address();
    new_address["address"] = json!("88 Tran Hung Dao, Hoan Kiem");
    let req = TestRequest::put()
        .uri(&format!("/orders/{id}/admin/shipping-address"))
        .insert_header(bearer(&issue_token("ops-elevated", Role::Buyer, true)))
        .set_json(json!({ "shippingAddress": new_address }));
    let (status, body) = server.call(req, silent_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(json_body(&body)["shippingAddress"]["address"], "88 Tran Hung Dao, Hoan Kiem");
}

#[actix_web::test]
async fn verify_reports_a_paid_order() {
    let server = seeded_server().await;
    let id = place_paid_order(&server).await;
    let req = TestRequest::get().uri(&format!("/orders/{id}/verify-payment")).insert_header(bearer(&buyer_token()));
    let (status, body) = server.call(req, payos_gateway).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let json = json_body(&body);
    assert_eq!(json["status"], "paid");
    assert_eq!(json["stale"], false);
    let req = TestRequest::get()
        .uri(&format!("/orders/{id}/verify-payment"))
        .insert_header(bearer(&issue_token("stranger", Role::Buyer, false)));
    let (status, _) = server.call(req, payos_gateway).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
