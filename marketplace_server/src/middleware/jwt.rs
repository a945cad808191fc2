//! Bearer token middleware. Verifies the access token on every request in the wrapped scope and stores its claims in
//! the request extensions, where [`JwtClaims`] can be extracted by handlers and checked by the ACL middleware.

use std::{pin::Pin, rc::Rc, sync::Arc};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::AUTHORIZATION,
    Error,
    HttpMessage,
};
use futures::{
    future::{ok, Ready},
    Future,
};
use log::*;

use crate::auth::{bearer_token, JwtClaims, TokenVerifier};

pub struct JwtAuthMiddlewareFactory {
    verifier: Arc<dyn TokenVerifier>,
}

impl JwtAuthMiddlewareFactory {
    pub fn new<V: TokenVerifier + 'static>(verifier: V) -> Self {
        Self { verifier: Arc::new(verifier) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for JwtAuthMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = JwtAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(JwtAuthMiddlewareService { verifier: Arc::clone(&self.verifier), service: Rc::new(service) })
    }
}

pub struct JwtAuthMiddlewareService<S> {
    verifier: Arc<dyn TokenVerifier>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for JwtAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let header = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
        let claims = bearer_token(header).and_then(|token| self.verifier.verify(token));
        let service = Rc::clone(&self.service);
        Box::pin(async move {
            match claims {
                Ok(claims) => {
                    trace!("🔑️ Request to {} authenticated as {} ({})", req.path(), claims.sub, claims.role);
                    req.extensions_mut().insert::<JwtClaims>(claims);
                    service.call(req).await
                },
                Err(e) => {
                    debug!("🔑️ Unauthenticated request to {}. {e}", req.path());
                    Err(e.into())
                },
            }
        })
    }
}
