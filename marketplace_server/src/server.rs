use std::time::Duration;

use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use log::*;
use order_engine::{
    events::{EventHandlers, EventHooks, EventProducers},
    providers::{
        GatewayAdapter,
        MomoProvider,
        PayOsProvider,
        PaymentGatewayError,
        PaymentProvider,
        PaymentProviders,
        StripeProvider,
        ZaloPayProvider,
    },
    traits::MarketplaceDatabase,
    CheckoutApi,
    OrderLifecycleApi,
    ReconciliationApi,
    SqliteDatabase,
};

use crate::{
    auth::{JwtVerifier, TokenVerifier},
    config::{ProviderConfigs, ServerConfig},
    errors::ServerError,
    middleware::JwtAuthMiddlewareFactory,
    routes::{
        health,
        AdminCancelRoute,
        AdminSetStatusRoute,
        AdminShippingAddressRoute,
        BuyerCancelRoute,
        BuyerConfirmDeliveryRoute,
        CheckoutCartRoute,
        CheckoutRoute,
        OrderByIdRoute,
        PayRoute,
        PaymentWebhookRoute,
        SellerAcceptRoute,
        SellerCancelRoute,
        SellerDeliverRoute,
        VerifyPaymentRoute,
    },
    workers::{start_expiry_worker, start_reconciliation_worker},
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(format!("Could not migrate the database. {e}")))?;
    let providers = build_providers(&config.providers)?;
    let handlers = EventHandlers::new(128, logging_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let reconciliation =
        ReconciliationApi::new(db.clone(), producers.clone(), providers.clone(), config.reconciliation_settings());
    let _expiry = start_expiry_worker(reconciliation.clone(), config.unpaid_order_timeout);
    let _sweeper = start_reconciliation_worker(reconciliation, config.sweep_interval, config.sweep_min_age);
    let srv = create_server_instance(config, db, producers, providers)?;
    srv.await.map_err(|e| ServerError::Unspecified(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    producers: EventProducers,
    providers: PaymentProviders<GatewayAdapter>,
) -> Result<Server, ServerError> {
    let (host, port) = (config.host.clone(), config.port);
    let srv = HttpServer::new(move || {
        let lifecycle_api = OrderLifecycleApi::new(db.clone(), producers.clone());
        let checkout_api =
            CheckoutApi::new(db.clone(), producers.clone(), providers.clone(), config.checkout_settings());
        let reconciliation_api = ReconciliationApi::new(
            db.clone(),
            producers.clone(),
            providers.clone(),
            config.reconciliation_settings(),
        );
        let verifier = JwtVerifier::new(&config.auth);
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("mkt::access_log"))
            .app_data(web::Data::new(lifecycle_api))
            .app_data(web::Data::new(checkout_api))
            .app_data(web::Data::new(reconciliation_api))
            .app_data(web::Data::new(config.proxy_config()))
            .configure(|cfg| configure_routes::<SqliteDatabase, GatewayAdapter, _>(cfg, verifier))
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

/// Registers every route. The API objects and the proxy configuration must already be in the app data.
pub fn configure_routes<B, P, V>(cfg: &mut web::ServiceConfig, verifier: V)
where
    B: MarketplaceDatabase + 'static,
    P: PaymentProvider + 'static,
    V: TokenVerifier + 'static,
{
    let json_config = web::JsonConfig::default()
        .error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into());
    let path_config =
        web::PathConfig::default().error_handler(|err, _req| ServerError::InvalidRequestPath(err.to_string()).into());
    // Routes that require authentication
    let orders_scope = web::scope("/orders")
        .wrap(JwtAuthMiddlewareFactory::new(verifier))
        .service(CheckoutRoute::<B, P>::new())
        .service(CheckoutCartRoute::<B, P>::new())
        .service(PayRoute::<B, P>::new())
        .service(VerifyPaymentRoute::<B, P>::new())
        .service(SellerAcceptRoute::<B>::new())
        .service(SellerDeliverRoute::<B>::new())
        .service(SellerCancelRoute::<B>::new())
        .service(BuyerConfirmDeliveryRoute::<B>::new())
        .service(BuyerCancelRoute::<B>::new())
        .service(AdminSetStatusRoute::<B>::new())
        .service(AdminCancelRoute::<B>::new())
        .service(AdminShippingAddressRoute::<B>::new())
        .service(OrderByIdRoute::<B>::new());
    cfg.app_data(json_config)
        .app_data(path_config)
        .service(health)
        .service(PaymentWebhookRoute::<B, P>::new())
        .service(orders_scope);
}

/// Builds an adapter for every provider that has credentials.
pub fn build_providers(configs: &ProviderConfigs) -> Result<PaymentProviders<GatewayAdapter>, ServerError> {
    let err = |e: PaymentGatewayError| {
        ServerError::ConfigurationError(format!("Could not set up a payment provider. {e}"))
    };
    let mut providers = PaymentProviders::new();
    if let Some(config) = &configs.momo {
        providers.register(GatewayAdapter::MoMo(MomoProvider::new(config.clone()).map_err(err)?));
    }
    if let Some(config) = &configs.payos {
        providers.register(GatewayAdapter::PayOs(PayOsProvider::new(config.clone()).map_err(err)?));
    }
    if let Some(config) = &configs.stripe {
        providers.register(GatewayAdapter::Stripe(StripeProvider::new(config.clone()).map_err(err)?));
    }
    if let Some(config) = &configs.zalopay {
        providers.register(GatewayAdapter::ZaloPay(ZaloPayProvider::new(config.clone()).map_err(err)?));
    }
    Ok(providers)
}

/// Hooks that record order events in the log.
fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks.on_order_paid(|ev| {
        let provider = ev.provider.map(|p| p.to_string()).unwrap_or_else(|| "an internal path".into());
        info!("📦️ Order {} was paid via {provider}. Seller {} can start processing it.", ev.order.id, ev.order.seller_id);
        Box::pin(async {})
    });
    hooks.on_order_annulled(|ev| {
        let reason = ev.reason.unwrap_or_else(|| "no reason given".into());
        info!("📦️ Order {} was cancelled ({reason})", ev.order.id);
        Box::pin(async {})
    });
    hooks.on_status_changed(|ev| {
        debug!("📦️ Order {} moved from {} to {}", ev.order.id, ev.old_status, ev.order.order_status);
        Box::pin(async {})
    });
    hooks
}

#[cfg(test)]
mod test {
    use order_engine::{db_types::ProviderKind, providers::StripeConfig};

    use super::*;

    #[test]
    fn only_configured_providers_are_built() {
        let providers = build_providers(&ProviderConfigs::default()).unwrap();
        assert!(providers.is_empty());
        let configs = ProviderConfigs { stripe: Some(StripeConfig::default()), ..Default::default() };
        let providers = build_providers(&configs).unwrap();
        assert_eq!(providers.kinds(), vec![ProviderKind::Stripe]);
    }
}
