use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use order_engine::{providers::PaymentGatewayError, OrderFlowError};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("Could not read request body: {0}")]
    InvalidRequestBody(String),
    #[error("Could not read request path: {0}")]
    InvalidRequestPath(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("UnspecifiedError. {0}")]
    Unspecified(String),
    #[error("Authentication Error. {0}")]
    AuthenticationError(#[from] AuthError),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("{0}")]
    OrderFlowError(#[from] OrderFlowError),
    /// The orders were created, but no payment link could be obtained for them.
    #[error("Order {order_ref} was created, but the payment link could not be created. {source}")]
    CheckoutLinkFailed { order_ref: String, source: PaymentGatewayError },
}

impl ServerError {
    fn details(&self) -> Option<Value> {
        match self {
            Self::OrderFlowError(OrderFlowError::ValidationError(problems)) => Some(json!({ "invalid": problems })),
            Self::OrderFlowError(OrderFlowError::NoValidItems(skipped)) => Some(json!({ "skipped": skipped })),
            Self::CheckoutLinkFailed { order_ref, .. } => Some(json!({ "orderRef": order_ref })),
            _ => None,
        }
    }
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::InvalidRequestPath(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationError(e) => match e {
                AuthError::MissingToken => StatusCode::UNAUTHORIZED,
                AuthError::ValidationError(_) => StatusCode::UNAUTHORIZED,
                AuthError::PoorlyFormattedToken(_) => StatusCode::UNAUTHORIZED,
                AuthError::InvalidRole(_) => StatusCode::UNAUTHORIZED,
                AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            },
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unspecified(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::OrderFlowError(e) => match e {
                OrderFlowError::ValidationError(_) => StatusCode::BAD_REQUEST,
                OrderFlowError::NotFound(_) => StatusCode::NOT_FOUND,
                OrderFlowError::AuthorizationError(_) => StatusCode::FORBIDDEN,
                OrderFlowError::InvalidTransition { .. } => StatusCode::CONFLICT,
                OrderFlowError::RevertMismatch { .. } => StatusCode::CONFLICT,
                OrderFlowError::ProductUnavailable(_) => StatusCode::CONFLICT,
                OrderFlowError::EmptyCart => StatusCode::BAD_REQUEST,
                OrderFlowError::NoValidItems(_) => StatusCode::BAD_REQUEST,
                OrderFlowError::PaymentGatewayError(_) => StatusCode::BAD_GATEWAY,
                OrderFlowError::ConcurrentUpdate(_) => StatusCode::CONFLICT,
                OrderFlowError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
                OrderFlowError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::CheckoutLinkFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut body = json!({ "error": self.to_string() });
        if let Some(details) = self.details() {
            body["details"] = details;
        }
        HttpResponse::build(self.status_code()).insert_header(ContentType::json()).body(body.to_string())
    }
}

#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("No access token was provided. Send one in the Authorization header as 'Bearer <token>'.")]
    MissingToken,
    #[error("Insufficient Permissions. {0}")]
    InsufficientPermissions(String),
    #[error("Access token is invalid. {0}")]
    ValidationError(String),
    #[error("Access token is not in the correct format. {0}")]
    PoorlyFormattedToken(String),
    #[error("Access tokens cannot carry the '{0}' role.")]
    InvalidRole(String),
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(json!({ "error": self.to_string() }).to_string())
    }
}

#[cfg(test)]
mod test {
    use order_engine::db_types::{OrderStatus, Role};

    use super::*;

    #[test]
    fn order_flow_errors_map_to_status_codes() {
        let cases = [
            (OrderFlowError::validation("quantity"), StatusCode::BAD_REQUEST),
            (OrderFlowError::NotFound("Order x".into()), StatusCode::NOT_FOUND),
            (OrderFlowError::AuthorizationError("no".into()), StatusCode::FORBIDDEN),
            (
                OrderFlowError::InvalidTransition {
                    from: OrderStatus::Paid,
                    to: OrderStatus::Delivered,
                    role: Role::Seller,
                },
                StatusCode::CONFLICT,
            ),
            (OrderFlowError::EmptyCart, StatusCode::BAD_REQUEST),
            (OrderFlowError::RateLimited, StatusCode::TOO_MANY_REQUESTS),
            (OrderFlowError::DatabaseError("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status_code(), status);
        }
        assert_eq!(ServerError::from(AuthError::MissingToken).status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn validation_errors_list_the_fields() {
        let err = ServerError::from(OrderFlowError::ValidationError(vec!["quantity".into(), "sellerId".into()]));
        assert_eq!(err.details(), Some(json!({ "invalid": ["quantity", "sellerId"] })));
    }
}
