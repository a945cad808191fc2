//! Request handler definitions
//!
//! Define each route and its handler here. Handlers stay thin: they pull the caller out of the access token, decide in
//! which capacity the caller acts, and hand over to the order engine APIs.
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every database or gateway call in here is async for that reason.
//!
//! Paths under `/orders` are relative to the authenticated scope set up in [`crate::server`].
use std::str::FromStr;

use actix_web::{get, http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use log::*;
use order_engine::{
    db_types::{OrderId, OrderStatus, ProviderKind, Role, UserId},
    providers::{AckDecision, CallbackPayload, PaymentLink, PaymentProvider},
    traits::MarketplaceDatabase,
    CheckoutApi,
    OrderFlowError,
    OrderLifecycleApi,
    ReconciliationApi,
};

use crate::{
    auth::JwtClaims,
    config::ProxyConfig,
    data_objects::{
        AdminStatusRequest,
        CancelRequest,
        CartCheckoutRequest,
        CartCheckoutResponse,
        CheckoutRequest,
        CheckoutResponse,
        PayRequest,
        PaymentLinkResponse,
        ShippingAddressRequest,
        StatusNotes,
    },
    errors::ServerError,
    helpers::get_remote_ip,
};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $($param:ident : $bound:path),+ $(; requires [$($roles:expr),+])?) => {
        paste::paste! {
            pub struct [<$name:camel Route>]<$($param),+>(core::marker::PhantomData<fn() -> ($($param,)+)>);
        }
        paste::paste! {
            impl<$($param),+> [<$name:camel Route>]<$($param),+> {
                #[allow(clippy::new_without_default)]
                pub fn new() -> Self {
                    Self(core::marker::PhantomData)
                }
            }
        }
        paste::paste! {
            impl<$($param),+> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<$($param),+>
            where
                $($param: $bound + 'static,)+
            {
                fn register(self, config: &mut actix_web::dev::AppService) {
                    let res = actix_web::Resource::new($path)
                        .name(stringify!($name))
                        .guard(actix_web::guard::$method())
                        .to($name::<$($param),+>);
                    $(
                        let res = res.wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                    )?
                    actix_web::dev::HttpServiceFactory::register(res, config);
                }
            }
        }
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Checkout  ----------------------------------------------------

/// Keeps the order reference with a failed link request, since the orders already exist at that point.
fn link_error(order_ref: &str, e: OrderFlowError) -> ServerError {
    match e {
        OrderFlowError::PaymentGatewayError(source) => {
            warn!("💻️ Orders behind {order_ref} were created, but no payment link could be obtained. {source}");
            ServerError::CheckoutLinkFailed { order_ref: order_ref.to_string(), source }
        },
        e => e.into(),
    }
}

async fn request_link<B, P>(
    api: &CheckoutApi<B, P>,
    order_ref: &str,
    buyer: &UserId,
    provider: Option<ProviderKind>,
) -> Result<Option<PaymentLink>, ServerError>
where
    B: MarketplaceDatabase,
    P: PaymentProvider,
{
    match provider {
        Some(provider) => {
            let link = api.begin_payment(order_ref, buyer, provider).await.map_err(|e| link_error(order_ref, e))?;
            Ok(Some(link))
        },
        None => Ok(None),
    }
}

route!(checkout => Post "/checkout" impl B: MarketplaceDatabase, P: PaymentProvider);
/// Buy now. Creates one pending order for the product, and if a provider is named, a payment link for it.
pub async fn checkout<B: MarketplaceDatabase, P: PaymentProvider>(
    claims: JwtClaims,
    body: web::Json<CheckoutRequest>,
    api: web::Data<CheckoutApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let buyer = claims.user_id();
    let CheckoutRequest { product_id, quantity, shipping_address, provider } = body.into_inner();
    debug!("💻️ POST checkout of {quantity} x {product_id} for {buyer}");
    let result = api.checkout_single(&buyer, &product_id, quantity, shipping_address).await?;
    let order_id = result.order.id;
    let link = request_link(api.as_ref(), order_id.as_str(), &buyer, provider).await?;
    let response = CheckoutResponse {
        order_id,
        payment_intent: result.payment_intent,
        checkout_url: link.as_ref().map(|l| l.checkout_url.clone()),
        correlation_id: link.map(|l| l.correlation_id),
    };
    Ok(HttpResponse::Created().json(response))
}

route!(checkout_cart => Post "/checkout/cart" impl B: MarketplaceDatabase, P: PaymentProvider);
/// Checks out the caller's whole cart. Lines that cannot be ordered are skipped and listed in the response.
pub async fn checkout_cart<B: MarketplaceDatabase, P: PaymentProvider>(
    claims: JwtClaims,
    body: web::Json<CartCheckoutRequest>,
    api: web::Data<CheckoutApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let buyer = claims.user_id();
    let CartCheckoutRequest { shipping_address, provider } = body.into_inner();
    debug!("💻️ POST cart checkout for {buyer}");
    let result = api.checkout_from_cart(&buyer, shipping_address).await?;
    let link = request_link(api.as_ref(), result.transaction_id.as_str(), &buyer, provider).await?;
    let response = CartCheckoutResponse {
        order_ids: result.orders.into_iter().map(|o| o.id).collect(),
        transaction_id: result.transaction_id,
        skipped: result.skipped,
        payment_intent: result.payment_intent,
        checkout_url: link.as_ref().map(|l| l.checkout_url.clone()),
        correlation_id: link.map(|l| l.correlation_id),
    };
    Ok(HttpResponse::Created().json(response))
}

route!(pay => Post "/{reference}/pay" impl B: MarketplaceDatabase, P: PaymentProvider);
/// Requests a (new) payment link for an order or a cart transaction. The last link requested is the one that counts.
pub async fn pay<B: MarketplaceDatabase, P: PaymentProvider>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: web::Json<PayRequest>,
    api: web::Data<CheckoutApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let reference = path.into_inner();
    let provider = body.into_inner().provider;
    debug!("💻️ POST pay {reference} with {provider} for {}", claims.sub);
    let link = api.begin_payment(&reference, &claims.user_id(), provider).await?;
    Ok(HttpResponse::Ok().json(PaymentLinkResponse::new(reference, link)))
}

//----------------------------------------------   Payments  ----------------------------------------------------

route!(verify_payment => Get "/{reference}/verify-payment" impl B: MarketplaceDatabase, P: PaymentProvider);
/// Called when the buyer returns from the gateway. Settled orders are reported as they are; otherwise the gateway is
/// asked, and a slow gateway yields the stored state marked as stale.
pub async fn verify_payment<B: MarketplaceDatabase, P: PaymentProvider>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<ReconciliationApi<B, P>>,
) -> Result<HttpResponse, ServerError> {
    let reference = path.into_inner();
    let actor = if claims.is_admin() { claims.actor() } else { claims.as_buyer() };
    debug!("💻️ GET verify-payment for {reference} by {}", actor.id);
    let view = api.verify_payment_sync(&reference, &actor).await?;
    Ok(HttpResponse::Ok().json(view))
}

route!(payment_webhook => Post "/payments/{provider}/webhook" impl B: MarketplaceDatabase, P: PaymentProvider);
/// Gateway callbacks. The body is passed on untouched so that the signature can be checked against the exact bytes
/// the gateway sent. The response is whatever the gateway expects to see for the outcome.
pub async fn payment_webhook<B: MarketplaceDatabase, P: PaymentProvider>(
    req: HttpRequest,
    path: web::Path<String>,
    body: String,
    api: web::Data<ReconciliationApi<B, P>>,
    proxy: web::Data<ProxyConfig>,
) -> Result<HttpResponse, ServerError> {
    let name = path.into_inner();
    let provider = ProviderKind::from_str(&name)
        .map_err(|_| ServerError::NoRecordFound(format!("Unknown payment provider '{name}'")))?;
    let gateway = api
        .providers()
        .get(provider)
        .ok_or_else(|| ServerError::NoRecordFound(format!("Payment provider '{provider}' is not enabled")))?;
    let remote_ip = get_remote_ip(&req, *proxy.get_ref()).map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".into());
    info!("💳️ Received {provider} webhook from {remote_ip}");
    let mut payload = CallbackPayload::new(body);
    if let Some(signature) = gateway
        .signature_header()
        .and_then(|h| req.headers().get(h))
        .and_then(|v| v.to_str().ok())
    {
        payload = payload.with_signature(signature);
    }
    let decision = api.handle_webhook(provider, payload).await;
    if decision == AckDecision::Rejected {
        warn!("🔐️ SECURITY: Rejected {provider} webhook from {remote_ip}");
    }
    let ack = gateway.acknowledge(decision);
    let status = StatusCode::from_u16(ack.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = HttpResponse::build(status);
    Ok(match ack.body {
        Some(body) => response.json(body),
        None => response.finish(),
    })
}

//----------------------------------------------   Orders  ----------------------------------------------------

fn order_id(path: web::Path<String>) -> OrderId {
    OrderId::from(path.into_inner())
}

fn notes(body: Option<web::Json<StatusNotes>>) -> Option<String> {
    body.and_then(|b| b.into_inner().notes).filter(|n| !n.trim().is_empty())
}

route!(order_by_id => Get "/{id}" impl B: MarketplaceDatabase);
/// Buyers and sellers can fetch the orders they are a party to. Admins can fetch any order.
pub async fn order_by_id<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ GET order {id} for {}", claims.sub);
    let order = api.fetch_order_for(&id, &claims.actor()).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(seller_accept => Put "/{id}/seller/accept" impl B: MarketplaceDatabase; requires [Role::Seller]);
pub async fn seller_accept<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: Option<web::Json<StatusNotes>>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ PUT seller accept {id} by {}", claims.sub);
    let order = api.transition(&id, OrderStatus::Processing, &claims.as_seller(), notes(body)).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(seller_deliver => Put "/{id}/seller/deliver" impl B: MarketplaceDatabase; requires [Role::Seller]);
pub async fn seller_deliver<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: Option<web::Json<StatusNotes>>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ PUT seller deliver {id} by {}", claims.sub);
    let order = api.transition(&id, OrderStatus::Delivered, &claims.as_seller(), notes(body)).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(seller_cancel => Put "/{id}/seller/cancel" impl B: MarketplaceDatabase; requires [Role::Seller]);
pub async fn seller_cancel<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: web::Json<CancelRequest>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ PUT seller cancel {id} by {}", claims.sub);
    let order = api.cancel(&id, &claims.as_seller(), &body.reason).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(buyer_confirm_delivery => Put "/{id}/buyer/confirm-delivery" impl B: MarketplaceDatabase);
/// Any signed-in user may buy, so buyer routes need no particular role. Ownership is checked against the order.
pub async fn buyer_confirm_delivery<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: Option<web::Json<StatusNotes>>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ PUT buyer confirm delivery {id} by {}", claims.sub);
    let order = api.transition(&id, OrderStatus::Completed, &claims.as_buyer(), notes(body)).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(buyer_cancel => Put "/{id}/buyer/cancel" impl B: MarketplaceDatabase);
pub async fn buyer_cancel<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: web::Json<CancelRequest>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ PUT buyer cancel {id} by {}", claims.sub);
    let order = api.cancel(&id, &claims.as_buyer(), &body.reason).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(admin_set_status => Put "/{id}/admin/status" impl B: MarketplaceDatabase; requires [Role::Admin]);
/// Admins may move an order along any edge of the state table. Asking for any status other than `cancelled` on a
/// cancelled order reverts the cancellation, provided the status matches the one the order had before.
pub async fn admin_set_status<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: web::Json<AdminStatusRequest>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    let AdminStatusRequest { status, notes } = body.into_inner();
    let admin = claims.actor();
    debug!("💻️ PUT admin status {id} -> {status} by {}", admin.id);
    let current = api.fetch_order(&id).await?;
    let order = match (current.order_status, status) {
        (OrderStatus::Cancelled, OrderStatus::Cancelled) => {
            return Err(OrderFlowError::InvalidTransition { from: status, to: status, role: admin.role }.into());
        },
        (OrderStatus::Cancelled, desired) => api.revert_from_cancelled(&id, &admin, Some(desired)).await?,
        (_, OrderStatus::Cancelled) => api.cancel(&id, &admin, notes.as_deref().unwrap_or_default()).await?,
        (_, target) => api.transition(&id, target, &admin, notes).await?,
    };
    Ok(HttpResponse::Ok().json(order))
}

route!(admin_cancel => Put "/{id}/admin/cancel" impl B: MarketplaceDatabase; requires [Role::Admin]);
pub async fn admin_cancel<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: web::Json<CancelRequest>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ PUT admin cancel {id} by {}", claims.sub);
    let order = api.cancel(&id, &claims.actor(), &body.reason).await?;
    Ok(HttpResponse::Ok().json(order))
}

route!(admin_shipping_address => Put "/{id}/admin/shipping-address" impl B: MarketplaceDatabase; requires [Role::Admin]);
pub async fn admin_shipping_address<B: MarketplaceDatabase>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: web::Json<ShippingAddressRequest>,
    api: web::Data<OrderLifecycleApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = order_id(path);
    debug!("💻️ PUT admin shipping address for {id} by {}", claims.sub);
    let order = api.update_shipping_address(&id, &claims.actor(), body.into_inner().shipping_address).await?;
    Ok(HttpResponse::Ok().json(order))
}
