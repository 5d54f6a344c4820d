use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, OptionalFromRequestParts};
use axum::http::request::Parts;
use axum::http::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::error::SecurityError;
use crate::identity::{AuthenticatedUser, IdentityBuilder};
use crate::jwt::{JwtClaimsValidator, JwtValidator};

/// Extract a Bearer token from the Authorization header value.
fn extract_bearer_token(header_value: &str) -> Result<&str, SecurityError> {
    let parts: Vec<&str> = header_value.splitn(2, ' ').collect();
    if parts.len() != 2 {
        return Err(SecurityError::InvalidAuthScheme);
    }
    if !parts[0].eq_ignore_ascii_case("Bearer") {
        return Err(SecurityError::InvalidAuthScheme);
    }
    Ok(parts[1])
}

/// Extract the Bearer token from request headers.
///
/// Returns the raw token string without validation.
pub fn extract_bearer_token_from_parts(parts: &Parts) -> Result<&str, SecurityError> {
    let auth_header = parts.headers.get(AUTHORIZATION).ok_or_else(|| {
        warn!(uri = %parts.uri, "Missing Authorization header");
        SecurityError::MissingAuthHeader
    })?;

    let auth_value = auth_header
        .to_str()
        .map_err(|_| SecurityError::InvalidAuthScheme)?;

    extract_bearer_token(auth_value)
}

/// Extract and validate JWT claims from request parts.
///
/// This is the low-level extraction function that validates the JWT and returns
/// raw claims. Use this when implementing custom identity types that need
/// additional processing (e.g., database lookup).
pub async fn extract_jwt_claims<S>(
    parts: &Parts,
    state: &S,
) -> Result<serde_json::Value, SecurityError>
where
    S: Send + Sync,
    Arc<JwtClaimsValidator>: FromRef<S>,
{
    let token = extract_bearer_token_from_parts(parts)?;
    let validator: Arc<JwtClaimsValidator> = Arc::from_ref(state);

    let claims = validator.validate(token).await.map_err(|e| {
        warn!(uri = %parts.uri, error = %e, "JWT validation failed");
        e
    })?;

    debug!(uri = %parts.uri, "JWT claims extracted");
    Ok(claims)
}

/// Extract and validate a JWT identity from request parts.
///
/// This is the shared extraction logic used by [`AuthenticatedUser`]'s
/// `FromRequestParts` implementation.
pub async fn extract_jwt_identity<S, B>(
    parts: &Parts,
    state: &S,
) -> Result<B::Identity, SecurityError>
where
    S: Send + Sync,
    B: IdentityBuilder + 'static,
    Arc<JwtValidator<B>>: FromRef<S>,
{
    let token = extract_bearer_token_from_parts(parts)?;
    let validator: Arc<JwtValidator<B>> = Arc::from_ref(state);

    let identity = validator.validate(token).await.map_err(|e| {
        warn!(uri = %parts.uri, error = %e, "JWT validation failed");
        e
    })?;

    debug!(uri = %parts.uri, "Authenticated request");
    Ok(identity)
}

/// Axum extractor implementation for `AuthenticatedUser`.
///
/// Extracts the JWT from the `Authorization: Bearer <token>` header, validates
/// it using the `JwtClaimsValidator` available from the application state, and
/// returns an `AuthenticatedUser` on success.
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<JwtClaimsValidator>: FromRef<S>,
{
    type Rejection = SecurityError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let claims = extract_jwt_claims(parts, state).await?;
        Ok(AuthenticatedUser::from_claims(claims))
    }
}

/// Optional extractor for `AuthenticatedUser`.
///
/// - No `Authorization` header -> `Ok(None)`
/// - Valid JWT -> `Ok(Some(user))`
/// - Invalid/expired JWT -> `Err(SecurityError)`
impl<S> OptionalFromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<JwtClaimsValidator>: FromRef<S>,
{
    type Rejection = SecurityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }

        let claims = extract_jwt_claims(parts, state).await?;
        Ok(Some(AuthenticatedUser::from_claims(claims)))
    }
}
