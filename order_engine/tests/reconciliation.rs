use chrono::{Duration, Utc};
use mkt_common::{Money, Secret};
use order_engine::{
    db_types::{Actor, Order, OrderStatus, PaymentStatus, ProviderKind, UserId},
    events::EventProducers,
    order_objects::{GroupPaymentStatus, ReconciliationSettings},
    providers::{
        AckDecision,
        CallbackPayload,
        HmacSha256,
        PaymentProviders,
        ProviderStatus,
        SignatureScheme,
        StripeConfig,
        StripeProvider,
    },
    test_utils::{seed_product, FakeQuery},
    traits::{CartProvider, ProductCatalog, ReconciliationJournal},
    OrderFlowError,
    PaymentEvidence,
    ReconciliationApi,
};

mod support;
use support::*;

const PAYOS: ProviderKind = ProviderKind::PayOs;

async fn stock(h: &Harness, product: &str) -> i64 {
    h.db().fetch_product(&product.into()).await.unwrap().unwrap().quantity
}

/// Two units at 100 000 each, with a PayOS payment link already opened.
async fn awaiting_payment(h: &Harness) -> (Order, String) {
    seed_product(h.db(), "p1", SELLER, 100_000, 3).await;
    let order = h.checkout.checkout_single(&BUYER.into(), &"p1".into(), 2, address()).await.unwrap().order;
    let link = h.checkout.begin_payment(order.id.as_str(), &BUYER.into(), PAYOS).await.unwrap();
    (order, link.correlation_id)
}

#[tokio::test]
async fn webhook_settles_the_order() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    assert_eq!(order.total_amount, Money::from(200_000));

    let callback = h.gateway.callback("succeeded", Some(order.id.as_str()), Some(&correlation_id), Some(205_000), Some("ft-1"));
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Accepted);

    let order = fetch(&h, &order.id).await;
    assert_eq!(order.order_status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    let details = order.payment_details.as_ref().unwrap();
    assert_eq!(details.paid_amount, Money::from(205_000));
    assert_eq!(details.external_transaction_id.as_deref(), Some("ft-1"));
    assert_eq!(order.status_history.len(), 2);
    assert_eq!(order.status_history[1].changed_by.as_str(), "system");
    assert_eq!(stock(&h, "p1").await, 1);

    let ledger = h.db().fetch_ledger_entries(&order.id).await.unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, Money::from(205_000));
    assert_eq!(ledger[0].payer_id, UserId::from(BUYER));
    assert_eq!(ledger[0].payee_id, UserId::from(SELLER));
    assert_eq!(ledger[0].external_transaction_id, "ft-1");
}

#[tokio::test]
async fn duplicate_webhooks_settle_once() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let callback = h.gateway.callback("succeeded", None, Some(&correlation_id), Some(205_000), Some("ft-1"));
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback.clone()).await, AckDecision::Accepted);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::AlreadyProcessed);
    let order = fetch(&h, &order.id).await;
    assert_eq!(order.status_history.len(), 2);
    assert_eq!(stock(&h, "p1").await, 1);
    assert_eq!(h.db().fetch_ledger_entries(&order.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_deliveries_decrement_stock_once() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let callback = h.gateway.callback("succeeded", Some(order.id.as_str()), Some(&correlation_id), Some(205_000), None);
    let (a, b) = tokio::join!(
        h.reconciliation.handle_webhook(PAYOS, callback.clone()),
        h.reconciliation.handle_webhook(PAYOS, callback)
    );
    let decisions = [a, b];
    assert!(decisions.contains(&AckDecision::Accepted));
    assert!(decisions.iter().all(|d| matches!(d, AckDecision::Accepted | AckDecision::AlreadyProcessed)));
    assert_eq!(stock(&h, "p1").await, 1);
    assert_eq!(fetch(&h, &order.id).await.status_history.len(), 2);
}

#[tokio::test]
async fn tampered_webhooks_are_rejected() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let mut callback = h.gateway.callback("succeeded", Some(order.id.as_str()), Some(&correlation_id), Some(1), None);
    callback.body = callback.body.replace("\"amount\":1", "\"amount\":205000");
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Rejected);
    let mut unsigned = h.gateway.callback("succeeded", Some(order.id.as_str()), None, Some(205_000), None);
    unsigned.signature = None;
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, unsigned).await, AckDecision::Rejected);
    // Callbacks for a provider that is not configured are never trusted
    let callback = h.gateway.callback("succeeded", Some(order.id.as_str()), None, Some(205_000), None);
    assert_eq!(h.reconciliation.handle_webhook(ProviderKind::MoMo, callback).await, AckDecision::Rejected);

    let order = fetch(&h, &order.id).await;
    assert_eq!(order.order_status, OrderStatus::Pending);
    assert_eq!(order.status_history.len(), 1);
    assert_eq!(stock(&h, "p1").await, 3);
}

#[tokio::test]
async fn unmatched_payments_go_to_review() {
    let h = setup().await;
    let callback = h.gateway.callback("succeeded", Some("unknown-ref"), Some("fake-x"), Some(50_000), None);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Unmatched);
    let callback = h.gateway.callback("failed", Some("unknown-ref"), None, None, None);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Unmatched);
    let review = h.db().fetch_review_entries(10).await.unwrap();
    assert_eq!(review.len(), 1);
    assert!(review[0].reason.contains("unknown-ref"));
    assert_eq!(review[0].provider, Some(PAYOS));
}

#[tokio::test]
async fn failed_payments_void_the_order() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let callback = h.gateway.callback("failed", None, Some(&correlation_id), None, None);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Accepted);
    let order = fetch(&h, &order.id).await;
    assert_eq!(order.order_status, OrderStatus::Cancelled);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(order.cancellation.as_ref().unwrap().reason.as_deref(), Some("Declined by the fake gateway"));
    assert_eq!(stock(&h, "p1").await, 3);
}

#[tokio::test]
async fn failures_of_superseded_attempts_are_ignored() {
    let h = setup().await;
    let (order, first) = awaiting_payment(&h).await;
    let second = h.checkout.begin_payment(order.id.as_str(), &BUYER.into(), PAYOS).await.unwrap().correlation_id;
    assert_ne!(first, second);
    let callback = h.gateway.callback("failed", Some(order.id.as_str()), Some(&first), None, None);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Accepted);
    assert_eq!(fetch(&h, &order.id).await.order_status, OrderStatus::Pending);
}

const STRIPE_SECRET: &str = "whsec_test_secret";

fn stripe_event(event_type: &str, order: &Order, object: serde_json::Value) -> CallbackPayload {
    let mut object = object;
    object["metadata"] = serde_json::json!({ "order_ref": order.id.as_str() });
    let body = serde_json::json!({ "id": "evt_1", "type": event_type, "data": { "object": object } }).to_string();
    let t = Utc::now().timestamp();
    let sig = HmacSha256::new(STRIPE_SECRET).sign(format!("{t}.{body}").as_bytes());
    CallbackPayload::new(body).with_signature(format!("t={t},v1={sig}"))
}

#[tokio::test]
async fn declined_card_then_successful_retry_settles() {
    let h = setup().await;
    let order = pending_order(&h, "p1", 1).await;
    let config = StripeConfig { webhook_secret: Secret::new(STRIPE_SECRET.to_string()), ..Default::default() };
    let providers = PaymentProviders::new().with_provider(StripeProvider::new(config).unwrap());
    let stripe = ReconciliationApi::new(h.db().clone(), EventProducers::default(), providers, test_settings());

    let declined = stripe_event(
        "payment_intent.payment_failed",
        &order,
        serde_json::json!({ "id": "pi_1", "last_payment_error": { "message": "Your card was declined." } }),
    );
    assert_eq!(stripe.handle_webhook(ProviderKind::Stripe, declined).await, AckDecision::Accepted);
    let stored = fetch(&h, &order.id).await;
    assert_eq!(stored.order_status, OrderStatus::Pending);
    assert_eq!(stored.payment_status, PaymentStatus::Pending);

    let completed = stripe_event(
        "checkout.session.completed",
        &order,
        serde_json::json!({ "id": "cs_1", "amount_total": 105000, "payment_status": "paid", "payment_intent": "pi_1" }),
    );
    assert_eq!(stripe.handle_webhook(ProviderKind::Stripe, completed).await, AckDecision::Accepted);
    let stored = fetch(&h, &order.id).await;
    assert_eq!(stored.order_status, OrderStatus::Paid);
    assert!(h.db().fetch_review_entries(10).await.unwrap().is_empty());

    let expired = stripe_event("checkout.session.expired", &order, serde_json::json!({ "id": "cs_1" }));
    assert_eq!(stripe.handle_webhook(ProviderKind::Stripe, expired).await, AckDecision::AlreadyProcessed);
}

#[tokio::test]
async fn store_failures_ask_the_gateway_to_retry() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let callback = h.gateway.callback("succeeded", Some(order.id.as_str()), Some(&correlation_id), Some(205_000), None);
    h.db().pool().close().await;
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback.clone()).await, AckDecision::Retry);
    let failed = h.gateway.callback("failed", None, Some(&correlation_id), None, None);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, failed).await, AckDecision::Retry);
    // Signature checks come first, so a forged callback is still rejected outright
    let mut forged = callback;
    forged.signature = Some("forged".into());
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, forged).await, AckDecision::Rejected);
}

#[tokio::test]
async fn informational_callbacks_change_nothing() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let callback = h.gateway.callback("created", None, Some(&correlation_id), None, None);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Accepted);
    assert_eq!(fetch(&h, &order.id).await.status_history.len(), 1);
}

#[tokio::test]
async fn payment_for_a_cancelled_order_is_journaled() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    h.lifecycle.void_unpaid(&order.id, "Buyer gave up").await.unwrap();
    let callback = h.gateway.callback("succeeded", None, Some(&correlation_id), Some(205_000), Some("ft-late"));
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Accepted);
    let order = fetch(&h, &order.id).await;
    assert_eq!(order.order_status, OrderStatus::Cancelled);
    assert_eq!(stock(&h, "p1").await, 3);
    let review = h.db().fetch_review_entries(10).await.unwrap();
    assert_eq!(review.len(), 1);
    assert_eq!(review[0].order_id.as_ref(), Some(&order.id));
    assert_eq!(review[0].payload, "ft-late");
}

#[tokio::test]
async fn underpayments_settle_but_are_flagged() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let callback = h.gateway.callback("succeeded", None, Some(&correlation_id), Some(150_000), None);
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Accepted);
    assert!(fetch(&h, &order.id).await.is_paid());
    let review = h.db().fetch_review_entries(10).await.unwrap();
    assert_eq!(review.len(), 1);
    assert!(review[0].reason.starts_with("Underpayment"));
    // Without an external id the gateway's correlation id identifies the payment in the ledger
    let ledger = h.db().fetch_ledger_entries(&order.id).await.unwrap();
    assert_eq!(ledger[0].external_transaction_id, correlation_id);
}

#[tokio::test]
async fn cart_groups_settle_every_order() {
    let h = setup().await;
    seed_product(h.db(), "p1", SELLER, 100_000, 5).await;
    seed_product(h.db(), "p2", "seller-hoa", 50_000, 5).await;
    h.db().set_cart_quantity(&BUYER.into(), &"p1".into(), 1).await.unwrap();
    h.db().set_cart_quantity(&BUYER.into(), &"p2".into(), 2).await.unwrap();
    let cart = h.checkout.checkout_from_cart(&BUYER.into(), address()).await.unwrap();
    let txid = cart.transaction_id.as_str();
    let callback = h.gateway.callback("succeeded", Some(txid), None, Some(210_000), Some("ft-cart"));
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::Accepted);
    for order in &cart.orders {
        let order = fetch(&h, &order.id).await;
        assert!(order.is_paid());
        let expected = order.total_amount + Money::from(5_000);
        assert_eq!(order.payment_details.unwrap().paid_amount, expected);
    }
    assert_eq!(stock(&h, "p1").await, 4);
    assert_eq!(stock(&h, "p2").await, 3);
}

#[tokio::test]
async fn settling_a_partly_paid_group() {
    let h = setup().await;
    let first = pending_order(&h, "p1", 1).await;
    let second = paid_order(&h, "p2").await;
    let orders = vec![first.clone(), second];
    let evidence = PaymentEvidence { external_transaction_id: Some("ft-9".into()), ..Default::default() };
    assert_eq!(h.reconciliation.settle_group(PAYOS, &orders, evidence.clone()).await.unwrap(), 1);
    assert_eq!(h.reconciliation.settle_group(PAYOS, &orders, evidence).await.unwrap(), 0);
    assert_eq!(fetch(&h, &first.id).await.payment_details.unwrap().paid_amount, Money::from(105_000));
}

#[tokio::test]
async fn verify_after_webhook_is_a_no_op() {
    let h = setup().await;
    let (order, correlation_id) = awaiting_payment(&h).await;
    let callback = h.gateway.callback("succeeded", None, Some(&correlation_id), Some(205_000), None);
    h.reconciliation.handle_webhook(PAYOS, callback).await;
    h.gateway.set_query(FakeQuery::Answer(ProviderStatus::succeeded(Some(Money::from(205_000)), None)));
    let view = h.reconciliation.verify_payment_sync(order.id.as_str(), &buyer()).await.unwrap();
    assert_eq!(view.status, GroupPaymentStatus::Paid);
    assert!(!view.stale);
    assert_eq!(h.gateway.query_count(), 0);
    assert_eq!(view.orders[0].status_history.len(), 2);
    assert_eq!(stock(&h, "p1").await, 1);
}

#[tokio::test]
async fn verify_settles_when_the_gateway_says_paid() {
    let h = setup().await;
    let (order, _) = awaiting_payment(&h).await;
    h.gateway.set_query(FakeQuery::Answer(ProviderStatus::succeeded(Some(Money::from(205_000)), Some("ft-q".into()))));
    let view = h.reconciliation.verify_payment_sync(order.id.as_str(), &buyer()).await.unwrap();
    assert_eq!(view.status, GroupPaymentStatus::Paid);
    assert!(!view.stale);
    assert_eq!(view.orders[0].order_status, OrderStatus::Paid);
    assert_eq!(stock(&h, "p1").await, 1);
    // A webhook arriving afterwards finds nothing to do
    let callback = h.gateway.callback("succeeded", Some(order.id.as_str()), None, Some(205_000), Some("ft-q"));
    assert_eq!(h.reconciliation.handle_webhook(PAYOS, callback).await, AckDecision::AlreadyProcessed);
}

#[tokio::test]
async fn verify_degrades_to_stored_state() {
    let h = setup().await;
    let (order, _) = awaiting_payment(&h).await;
    let admin = Actor::admin("root");

    h.gateway.set_query(FakeQuery::Hang);
    let view = h.reconciliation.verify_payment_sync(order.id.as_str(), &buyer()).await.unwrap();
    assert!(view.stale);
    assert_eq!(view.status, GroupPaymentStatus::Pending);

    h.gateway.set_query(FakeQuery::Error);
    let view = h.reconciliation.verify_payment_sync(order.id.as_str(), &admin).await.unwrap();
    assert!(view.stale);

    h.gateway.set_query(FakeQuery::Unsupported);
    let view = h.reconciliation.verify_payment_sync(order.id.as_str(), &buyer()).await.unwrap();
    assert!(!view.stale);
    assert_eq!(view.status, GroupPaymentStatus::Pending);

    h.gateway.set_query(FakeQuery::Answer(ProviderStatus::pending()));
    let view = h.reconciliation.verify_payment_sync(order.id.as_str(), &buyer()).await.unwrap();
    assert!(!view.stale);
    assert_eq!(fetch(&h, &order.id).await.status_history.len(), 1);
}

#[tokio::test]
async fn verify_requires_the_owner() {
    let h = setup().await;
    let (order, _) = awaiting_payment(&h).await;
    let err = h.reconciliation.verify_payment_sync(order.id.as_str(), &Actor::buyer("mallory")).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::AuthorizationError(_)));
    let err = h.reconciliation.verify_payment_sync("missing", &buyer()).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::NotFound(_)));
}

#[tokio::test]
async fn verify_is_rate_limited() {
    let settings = ReconciliationSettings { verify_limit: 2, ..test_settings() };
    let h = setup_with(EventProducers::default(), settings).await;
    let (order, _) = awaiting_payment(&h).await;
    for _ in 0..2 {
        h.reconciliation.verify_payment_sync(order.id.as_str(), &buyer()).await.unwrap();
    }
    let err = h.reconciliation.verify_payment_sync(order.id.as_str(), &buyer()).await.unwrap_err();
    assert!(matches!(err, OrderFlowError::RateLimited));
    // Limits are per user
    h.reconciliation.verify_payment_sync(order.id.as_str(), &Actor::admin("root")).await.unwrap();
}

#[tokio::test]
async fn sweep_catches_missed_webhooks() {
    let h = setup().await;
    let (order, _) = awaiting_payment(&h).await;
    let _never_paid = pending_order(&h, "p2", 1).await;
    h.gateway.set_query(FakeQuery::Answer(ProviderStatus::succeeded(None, Some("ft-sweep".into()))));

    let report = h.reconciliation.sweep_pending(Utc::now() - Duration::hours(1)).await.unwrap();
    assert_eq!(report.groups_checked, 0);

    let report = h.reconciliation.sweep_pending(Utc::now() + Duration::seconds(5)).await.unwrap();
    assert_eq!(report.groups_checked, 1);
    assert_eq!(report.orders_settled, 1);
    assert_eq!(report.queries_failed, 0);
    let order = fetch(&h, &order.id).await;
    assert!(order.is_paid());
    assert_eq!(order.payment_details.unwrap().paid_amount, Money::from(205_000));

    let report = h.reconciliation.sweep_pending(Utc::now() + Duration::seconds(5)).await.unwrap();
    assert_eq!(report.groups_checked, 0);
}

#[tokio::test]
async fn expiry_asks_the_gateway_about_open_payments() {
    let h = setup().await;
    let (order, _) = awaiting_payment(&h).await;
    let unstarted = pending_order(&h, "p2", 1).await;
    let cutoff = Utc::now() + Duration::seconds(5);

    h.gateway.set_query(FakeQuery::Answer(ProviderStatus::pending()));
    let expired = h.reconciliation.expire_unpaid(cutoff).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, unstarted.id);
    assert_eq!(fetch(&h, &order.id).await.order_status, OrderStatus::Pending);

    h.gateway.set_query(FakeQuery::Error);
    assert!(h.reconciliation.expire_unpaid(cutoff).await.unwrap().is_empty());
    assert_eq!(fetch(&h, &order.id).await.order_status, OrderStatus::Pending);

    h.gateway.set_query(FakeQuery::Answer(ProviderStatus::failed()));
    let expired = h.reconciliation.expire_unpaid(cutoff).await.unwrap();
    assert_eq!(expired.len(), 1);
    let order = fetch(&h, &order.id).await;
    assert_eq!(order.order_status, OrderStatus::Cancelled);
    assert_eq!(order.cancellation.unwrap().reason.as_deref(), Some("Payment window expired"));
    assert_eq!(stock(&h, "p1").await, 3);
}

#[tokio::test]
async fn expiry_settles_payments_that_arrived_late() {
    let h = setup().await;
    let (order, _) = awaiting_payment(&h).await;
    h.gateway.set_query(FakeQuery::Answer(ProviderStatus::succeeded(None, Some("ft-late".into()))));
    let expired = h.reconciliation.expire_unpaid(Utc::now() + Duration::seconds(5)).await.unwrap();
    assert!(expired.is_empty());
    let order = fetch(&h, &order.id).await;
    assert_eq!(order.order_status, OrderStatus::Paid);
    assert_eq!(stock(&h, "p1").await, 1);
    assert!(h.db().fetch_review_entries(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn expiry_voids_payments_the_gateway_cannot_report_on() {
    let h = setup().await;
    let (order, _) = awaiting_payment(&h).await;
    h.gateway.set_query(FakeQuery::Unsupported);
    assert!(h.reconciliation.expire_unpaid(Utc::now() - Duration::hours(1)).await.unwrap().is_empty());
    let expired = h.reconciliation.expire_unpaid(Utc::now() + Duration::seconds(5)).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(fetch(&h, &order.id).await.payment_status, PaymentStatus::Failed);
}
