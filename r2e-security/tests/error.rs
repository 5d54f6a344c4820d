use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use r2e_security::error::SecurityError;

async fn error_parts(err: SecurityError) -> (StatusCode, serde_json::Value) {
    let resp = err.into_response();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn missing_auth_header_401() {
    let (status, body) = error_parts(SecurityError::MissingAuthHeader).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn invalid_auth_scheme_401() {
    let (status, body) = error_parts(SecurityError::InvalidAuthScheme).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn invalid_token_401() {
    let (status, body) = error_parts(SecurityError::InvalidToken("bad sig".into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn token_expired_401() {
    let (status, body) = error_parts(SecurityError::TokenExpired).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn unknown_key_id_401() {
    let (status, body) = error_parts(SecurityError::UnknownKeyId("kid-123".into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn jwks_fetch_error_401() {
    let (status, body) = error_parts(SecurityError::JwksFetchError("timeout".into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn validation_failed_401() {
    let (status, body) = error_parts(SecurityError::ValidationFailed("bad issuer".into())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn forbidden_403() {
    let (status, body) = error_parts(SecurityError::Forbidden("insufficient roles".into())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");
}

#[test]
fn display_formatting() {
    assert_eq!(
        SecurityError::MissingAuthHeader.to_string(),
        "Missing Authorization header"
    );
    assert_eq!(
        SecurityError::InvalidAuthScheme.to_string(),
        "Invalid authorization scheme"
    );
    assert_eq!(
        SecurityError::InvalidToken("x".into()).to_string(),
        "Invalid token: x"
    );
    assert_eq!(SecurityError::TokenExpired.to_string(), "Token expired");
    assert_eq!(
        SecurityError::UnknownKeyId("k".into()).to_string(),
        "Unknown signing key: k"
    );
    assert_eq!(
        SecurityError::JwksFetchError("e".into()).to_string(),
        "JWKS fetch error: e"
    );
    assert_eq!(
        SecurityError::ValidationFailed("v".into()).to_string(),
        "Token validation failed: v"
    );
    assert_eq!(
        SecurityError::Forbidden("nope".into()).to_string(),
        "Forbidden: nope"
    );
}

#[tokio::test]
async fn json_body_format() {
    let (_, body) = error_parts(SecurityError::TokenExpired).await;
    // Verify the body is a JSON object with an "error" key
    assert!(body.is_object());
    assert!(body.get("error").is_some());
    assert!(body.get("error").unwrap().is_string());
}
