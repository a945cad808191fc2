//! Access control list middleware for the marketplace server.
//! This middleware can be placed on any route or service inside a scope guarded by
//! [`JwtAuthMiddlewareFactory`](super::JwtAuthMiddlewareFactory).
//!
//! It checks the claims of the already-verified access token against the roles the route accepts. If the caller holds
//! any one of them, the request continues. Otherwise, a 403 Forbidden response is returned.

use std::{pin::Pin, rc::Rc};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
    HttpMessage,
};
use futures::{
    future::{ok, Ready},
    Future,
};
use log::*;
use order_engine::db_types::Role;

use crate::{auth::JwtClaims, errors::AuthError};

pub struct AclMiddlewareFactory {
    accepted_roles: Vec<Role>,
}

impl AclMiddlewareFactory {
    pub fn new(accepted_roles: &[Role]) -> Self {
        AclMiddlewareFactory { accepted_roles: accepted_roles.to_vec() }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AclMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AclMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AclMiddlewareService { accepted_roles: self.accepted_roles.clone(), service: Rc::new(service) })
    }
}

pub struct AclMiddlewareService<S> {
    accepted_roles: Vec<Role>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AclMiddlewareService<S>
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
        let service = Rc::clone(&self.service);
        let accepted_roles = self.accepted_roles.clone();
        Box::pin(async move {
            let claims = req.extensions().get::<JwtClaims>().cloned().ok_or_else(|| {
                warn!("🔑️ No JWT claims found in request extensions for {}", req.path());
                AuthError::MissingToken
            })?;
            if accepted_roles.iter().any(|role| claims.has_role(*role)) {
                service.call(req).await
            } else {
                debug!("🔑️ {} ({}) may not call {}", claims.sub, claims.role, req.path());
                Err(AuthError::InsufficientPermissions(format!("This route is not available to a {}", claims.role))
                    .into())
            }
        })
    }
}
