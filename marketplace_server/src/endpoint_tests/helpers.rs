use actix_web::{
    body::to_bytes,
    http::StatusCode,
    test,
    test::TestRequest,
    web,
    App,
};
use log::debug;
use order_engine::{
    db_types::Role,
    events::EventProducers,
    order_objects::{CheckoutSettings, ReconciliationSettings},
    providers::PaymentProviders,
    test_utils::{prepare_test_env, TestEnv},
    CheckoutApi,
    OrderLifecycleApi,
    ReconciliationApi,
    SqliteDatabase,
};

use super::mocks::MockGateway;
use crate::{
    auth::{JwtVerifier, TokenIssuer, TokenVerifier},
    config::{AuthConfig, ProxyConfig},
    server::configure_routes,
};

pub const BUYER: &str = "buyer-lan";
pub const SELLER: &str = "seller-minh";
pub const ADMIN: &str = "ops-hieu";

// Creates a test `AuthConfig` for issuing tokens. DO NOT re-use this secret anywhere.
pub fn get_auth_config() -> AuthConfig {
    AuthConfig::new("endpoint-tests-only-secret-0123456789")
}

pub fn issue_token(user: &str, role: Role, is_admin: bool) -> String {
    TokenIssuer::new(&get_auth_config()).issue_token(user, role, is_admin).expect("Failed to sign token")
}

pub fn buyer_token() -> String {
    issue_token(BUYER, Role::Buyer, false)
}

pub fn seller_token() -> String {
    issue_token(SELLER, Role::Seller, false)
}

pub fn admin_token() -> String {
    issue_token(ADMIN, Role::Admin, false)
}

/// A migrated database, plus the means to call the full route table against it.
pub struct TestServer {
    pub env: TestEnv,
}

impl TestServer {
    pub async fn new() -> Self {
        Self { env: prepare_test_env().await }
    }

    pub fn db(&self) -> &SqliteDatabase {
        &self.env.db
    }

    /// Calls the app with a fresh gateway from `gateway` and returns the status and body. Errors raised by middleware
    /// are rendered the same way actix renders them for a real client.
    pub async fn call<G>(&self, req: TestRequest, gateway: G) -> (StatusCode, String)
    where G: Fn() -> MockGateway {
        self.call_with_verifier(req, gateway, JwtVerifier::new(&get_auth_config())).await
    }

    pub async fn call_with_verifier<G, V>(&self, req: TestRequest, gateway: G, verifier: V) -> (StatusCode, String)
    where
        G: Fn() -> MockGateway,
        V: TokenVerifier + 'static,
    {
        let db = self.env.db.clone();
        let producers = EventProducers::default();
        let lifecycle = OrderLifecycleApi::new(db.clone(), producers.clone());
        let checkout = CheckoutApi::new(
            db.clone(),
            producers.clone(),
            PaymentProviders::new().with_provider(gateway()),
            CheckoutSettings::default(),
        );
        let reconciliation = ReconciliationApi::new(
            db,
            producers,
            PaymentProviders::new().with_provider(gateway()),
            ReconciliationSettings::default(),
        );
        let app = App::new()
            .app_data(web::Data::new(lifecycle))
            .app_data(web::Data::new(checkout))
            .app_data(web::Data::new(reconciliation))
            .app_data(web::Data::new(ProxyConfig::default()))
            .configure(|cfg| configure_routes::<SqliteDatabase, MockGateway, _>(cfg, verifier));
        let service = test::init_service(app).await;
        match test::try_call_service(&service, req.to_request()).await {
            Ok(res) => {
                let status = res.status();
                let body = String::from_utf8_lossy(&test::read_body(res).await).into_owned();
                debug!("Response {status}: {body}");
                (status, body)
            },
            Err(e) => {
                let res = e.error_response();
                let status = res.status();
                let body = to_bytes(res.into_body()).await.map(|b| String::from_utf8_lossy(&b).into_owned());
                (status, body.unwrap_or_default())
            },
        }
    }
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}
