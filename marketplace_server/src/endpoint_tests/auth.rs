use actix_web::{http::StatusCode, test::TestRequest};
use order_engine::db_types::Role;

use super::{
    helpers::{bearer, TestServer},
    mocks::silent_gateway,
};
use crate::{
    auth::{JwtClaims, MockTokenVerifier},
    errors::AuthError,
};

fn claims(sub: &str, role: Role, is_admin: bool) -> JwtClaims {
    JwtClaims { sub: sub.into(), role, is_admin, exp: usize::MAX, iat: 0 }
}

#[actix_web::test]
async fn verifier_decides_who_the_caller_is() {
    let server = TestServer::new().await;
    let mut verifier = MockTokenVerifier::new();
    verifier
        .expect_verify()
        .withf(|token| token == "opaque-admin-token")
        .returning(|_| Ok(claims("ops-hieu", Role::Admin, false)));
    let req = TestRequest::get().uri("/orders/o-404").insert_header(bearer("opaque-admin-token"));
    let (status, _) = server.call_with_verifier(req, silent_gateway, verifier).await;
    // Authenticated, and the order simply does not exist
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn verifier_errors_become_unauthorized() {
    let server = TestServer::new().await;
    let mut verifier = MockTokenVerifier::new();
    verifier.expect_verify().returning(|_| Err(AuthError::ValidationError("ExpiredSignature".into())));
    let req = TestRequest::get().uri("/orders/o-1").insert_header(bearer("expired"));
    let (status, body) = server.call_with_verifier(req, silent_gateway, verifier).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("ExpiredSignature"), "{body}");
}

#[actix_web::test]
async fn malformed_header_never_reaches_the_verifier() {
    let server = TestServer::new().await;
    let mut verifier = MockTokenVerifier::new();
    verifier.expect_verify().never();
    let req = TestRequest::get().uri("/orders/o-1").insert_header(("Authorization", "Basic dXNlcjpwYXNz"));
    let (status, _) = server.call_with_verifier(req, silent_gateway, verifier).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn admin_flag_opens_admin_routes() {
    let server = TestServer::new().await;
    let mut verifier = MockTokenVerifier::new();
    verifier.expect_verify().returning(|_| Ok(claims("support-an", Role::Seller, true)));
    let req = TestRequest::put()
        .uri("/orders/o-404/admin/cancel")
        .insert_header(bearer("any"))
        .set_json(serde_json::json!({ "reason": "Duplicate" }));
    let (status, _) = server.call_with_verifier(req, silent_gateway, verifier).await;
    // Past the ACL, so the lookup is what fails
    assert_eq!(status, StatusCode::NOT_FOUND);
}
