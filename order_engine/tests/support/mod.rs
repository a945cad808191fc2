#![allow(dead_code)]
use std::time::Duration;

use mkt_common::Money;
use order_engine::{
    db_types::{Actor, Order, OrderId, PaymentDetails, ProviderKind, ShippingAddress},
    events::EventProducers,
    order_objects::{CheckoutSettings, ReconciliationSettings},
    providers::PaymentProviders,
    test_utils::{prepare_test_env, seed_product, FakeProvider, TestEnv},
    CheckoutApi,
    OrderLifecycleApi,
    ReconciliationApi,
    SqliteDatabase,
};

pub const BUYER: &str = "buyer-lan";
pub const SELLER: &str = "seller-minh";

pub struct Harness {
    pub env: TestEnv,
    pub gateway: FakeProvider,
    pub lifecycle: OrderLifecycleApi<SqliteDatabase>,
    pub checkout: CheckoutApi<SqliteDatabase, FakeProvider>,
    pub reconciliation: ReconciliationApi<SqliteDatabase, FakeProvider>,
}

impl Harness {
    pub fn db(&self) -> &SqliteDatabase {
        &self.env.db
    }
}

pub fn test_settings() -> ReconciliationSettings {
    ReconciliationSettings { query_timeout: Duration::from_millis(200), ..Default::default() }
}

pub async fn setup() -> Harness {
    setup_with(EventProducers::default(), test_settings()).await
}

pub async fn setup_with(producers: EventProducers, settings: ReconciliationSettings) -> Harness {
    let env = prepare_test_env().await;
    let gateway = FakeProvider::new(ProviderKind::PayOs);
    let providers = PaymentProviders::new().with_provider(gateway.clone());
    let lifecycle = OrderLifecycleApi::new(env.db.clone(), producers.clone());
    let checkout = CheckoutApi::new(env.db.clone(), producers.clone(), providers.clone(), CheckoutSettings::default());
    let reconciliation = ReconciliationApi::new(env.db.clone(), producers, providers, settings);
    Harness { env, gateway, lifecycle, checkout, reconciliation }
}

pub fn address() -> ShippingAddress {
    ShippingAddress::new("Nguyen Thi Lan", "12 Le Loi, District 1", "0909123456").with_city("Ho Chi Minh City")
}

pub fn buyer() -> Actor {
    Actor::buyer(BUYER)
}

pub fn seller() -> Actor {
    Actor::seller(SELLER)
}

/// Creates a pending order for `quantity` units of a freshly seeded product priced at 100 000.
pub async fn pending_order(h: &Harness, product: &str, quantity: i64) -> Order {
    seed_product(h.db(), product, SELLER, 100_000, 10).await;
    let result = h
        .checkout
        .checkout_single(&BUYER.into(), &product.into(), quantity, address())
        .await
        .expect("Checkout failed");
    result.order
}

/// A pending order that has been settled through the engine-internal payment path.
pub async fn paid_order(h: &Harness, product: &str) -> Order {
    let order = pending_order(h, product, 1).await;
    let details = PaymentDetails {
        external_transaction_id: Some(format!("ext-{}", order.id)),
        paid_amount: Money::from(105_000),
        paid_at: chrono::Utc::now(),
    };
    h.lifecycle.record_payment(&order.id, details).await.expect("Payment failed");
    fetch(h, &order.id).await
}

pub async fn fetch(h: &Harness, id: &OrderId) -> Order {
    h.lifecycle.fetch_order(id).await.expect("Order not found")
}
