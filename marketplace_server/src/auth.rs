//! Access tokens.
//!
//! Callers authenticate with an HS256 JWT in the `Authorization: Bearer <token>` header. The token names the user
//! (`sub`), the role they act in, and whether they are an administrator. Tokens are issued by whatever identity service
//! fronts the marketplace; [`TokenIssuer`] exists so that operators and tests can mint them with the shared secret.
use actix_web::{dev::Payload, FromRequest, HttpMessage, HttpRequest};
use chrono::{Duration, Utc};
use futures::future::{ready, Ready};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::debug;
use order_engine::db_types::{Actor, Role, UserId};
use serde::{Deserialize, Serialize};

use crate::{config::AuthConfig, errors::AuthError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// The user id.
    pub sub: String,
    pub role: Role,
    #[serde(default, rename = "isAdmin")]
    pub is_admin: bool,
    pub exp: usize,
    pub iat: usize,
}

impl JwtClaims {
    pub fn user_id(&self) -> UserId {
        UserId::from(self.sub.as_str())
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin || self.role == Role::Admin
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == role || (role == Role::Admin && self.is_admin)
    }

    /// The caller acting in their own token role, or as an admin if they are one.
    pub fn actor(&self) -> Actor {
        if self.is_admin() {
            Actor::admin(self.sub.as_str())
        } else {
            Actor::new(self.sub.as_str(), self.role)
        }
    }

    pub fn as_buyer(&self) -> Actor {
        Actor::buyer(self.sub.as_str())
    }

    pub fn as_seller(&self) -> Actor {
        Actor::seller(self.sub.as_str())
    }
}

/// Claims are placed in the request extensions by [`crate::middleware::JwtAuthMiddlewareFactory`].
impl FromRequest for JwtClaims {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(req.extensions().get::<JwtClaims>().cloned().ok_or(AuthError::MissingToken))
    }
}

/// Turns a bearer token into the claims it carries.
#[cfg_attr(test, mockall::automock)]
pub trait TokenVerifier {
    fn verify(&self, token: &str) -> Result<JwtClaims, AuthError>;
}

#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(config: &AuthConfig) -> Self {
        let key = DecodingKey::from_secret(config.jwt_secret.reveal().as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { key, validation }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let data = jsonwebtoken::decode::<JwtClaims>(token, &self.key, &self.validation).map_err(|e| {
            debug!("🔑️ Rejected access token. {e}");
            match e.kind() {
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    AuthError::PoorlyFormattedToken(e.to_string())
                },
                _ => AuthError::ValidationError(e.to_string()),
            }
        })?;
        let claims = data.claims;
        if claims.role == Role::System {
            return Err(AuthError::InvalidRole(claims.role.to_string()));
        }
        if claims.sub.trim().is_empty() {
            return Err(AuthError::ValidationError("The token does not name a user".to_string()));
        }
        Ok(claims)
    }
}

pub struct TokenIssuer {
    key: EncodingKey,
    lifetime: Duration,
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        Self { key: EncodingKey::from_secret(config.jwt_secret.reveal().as_bytes()), lifetime: config.token_lifetime }
    }

    /// Issues an access token. The caller is responsible for having established who the user is.
    pub fn issue_token(&self, user: &str, role: Role, is_admin: bool) -> Result<String, AuthError> {
        if role == Role::System {
            return Err(AuthError::InvalidRole(role.to_string()));
        }
        let now = Utc::now();
        let claims = JwtClaims {
            sub: user.to_string(),
            role,
            is_admin,
            iat: now.timestamp() as usize,
            exp: (now + self.lifetime).timestamp() as usize,
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.key)
            .map_err(|e| AuthError::ValidationError(format!("Could not sign token. {e}")))
    }
}

/// Pulls the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::PoorlyFormattedToken("Expected 'Bearer <token>'".to_string()))
}
