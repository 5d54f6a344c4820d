//! The OAuth/OIDC error taxonomy (§7).
//!
//! Wire codes are the standard strings (`invalid_grant`, `access_denied`,
//! ...). Each variant carries whether its `redirect_uri` has been validated,
//! so handlers never redirect an error to a URI the server hasn't confirmed
//! belongs to the client (§4.1 step 4).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct OidcErrorBody {
    pub error: &'static str,
    pub error_description: String,
}

/// An OAuth/OIDC error. `redirect_validated` is only meaningful for the
/// authorize-endpoint error family; token-endpoint errors are always
/// returned as JSON and ignore it.
#[derive(Debug)]
pub struct OidcError {
    code: ErrorCode,
    description: String,
    redirect_validated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    LoginRequired,
    ConsentRequired,
    InteractionRequired,
    AccountSelectionRequired,
    TemporarilyUnavailable,
    AuthorizationPending,
    SlowDown,
    ExpiredToken,
    ServerError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidClient => "invalid_client",
            ErrorCode::InvalidGrant => "invalid_grant",
            ErrorCode::UnauthorizedClient => "unauthorized_client",
            ErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            ErrorCode::UnsupportedResponseType => "unsupported_response_type",
            ErrorCode::InvalidScope => "invalid_scope",
            ErrorCode::AccessDenied => "access_denied",
            ErrorCode::LoginRequired => "login_required",
            ErrorCode::ConsentRequired => "consent_required",
            ErrorCode::InteractionRequired => "interaction_required",
            ErrorCode::AccountSelectionRequired => "account_selection_required",
            ErrorCode::TemporarilyUnavailable => "temporarily_unavailable",
            ErrorCode::AuthorizationPending => "authorization_pending",
            ErrorCode::SlowDown => "slow_down",
            ErrorCode::ExpiredToken => "expired_token",
            ErrorCode::ServerError => "server_error",
        }
    }

    /// §7: client-configuration errors are always HTTP 400/401 JSON, never
    /// redirected, regardless of whether a redirect_uri validated.
    fn is_client_config_error(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidClient
                | ErrorCode::UnauthorizedClient
                | ErrorCode::UnsupportedGrantType
                | ErrorCode::UnsupportedResponseType
        )
    }

    fn status_code(self) -> StatusCode {
        match self {
            ErrorCode::InvalidClient | ErrorCode::UnauthorizedClient => StatusCode::UNAUTHORIZED,
            ErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl OidcError {
    fn new(code: ErrorCode, description: impl Into<String>, redirect_validated: bool) -> Self {
        Self {
            code,
            description: description.into(),
            redirect_validated,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether `redirect_uri` had already been confirmed to belong to the
    /// client when this error occurred (§4.1 step 4, §7, §8).
    pub fn redirect_validated(&self) -> bool {
        self.redirect_validated
    }

    /// §4.1's error policy: safe to redirect iff the code is in the
    /// whitelist AND redirect_uri validated.
    pub fn safe_to_redirect(&self) -> bool {
        self.redirect_validated && crate::authorize::SAFE_REDIRECT_ERRORS.contains(&self.code.as_str())
    }

    pub fn invalid_request(msg: impl Into<String>, redirect_validated: bool) -> Self {
        Self::new(ErrorCode::InvalidRequest, msg, redirect_validated)
    }

    pub fn invalid_client(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidClient, msg, false)
    }

    pub fn invalid_grant(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidGrant, msg, false)
    }

    pub fn unauthorized_client(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnauthorizedClient, msg, false)
    }

    pub fn unsupported_grant_type(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedGrantType, msg, false)
    }

    pub fn unsupported_response_type(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnsupportedResponseType, msg, true)
    }

    pub fn invalid_scope(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidScope, msg, true)
    }

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::AccessDenied, msg, true)
    }

    pub fn login_required() -> Self {
        Self::new(ErrorCode::LoginRequired, "end-user authentication is required", true)
    }

    pub fn consent_required() -> Self {
        Self::new(ErrorCode::ConsentRequired, "end-user consent is required", true)
    }

    pub fn interaction_required() -> Self {
        Self::new(ErrorCode::InteractionRequired, "end-user interaction is required", true)
    }

    pub fn account_selection_required() -> Self {
        Self::new(
            ErrorCode::AccountSelectionRequired,
            "end-user account selection is required",
            true,
        )
    }

    pub fn temporarily_unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::TemporarilyUnavailable, msg, true)
    }

    pub fn authorization_pending() -> Self {
        Self::new(ErrorCode::AuthorizationPending, "the authorization request is still pending", false)
    }

    pub fn slow_down() -> Self {
        Self::new(ErrorCode::SlowDown, "polling interval exceeded, slow down", false)
    }

    pub fn expired_token() -> Self {
        Self::new(ErrorCode::ExpiredToken, "the token has expired", false)
    }

    pub fn server_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, msg, false)
    }
}

impl std::fmt::Display for OidcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.description)
    }
}

impl std::error::Error for OidcError {}

/// HTTP response for token-endpoint and non-redirectable errors: JSON body
/// plus the taxonomy's status code. Authorize-endpoint handlers construct
/// their own redirect/error-page response instead of relying on this impl,
/// since that decision additionally depends on `safe_to_redirect()`.
impl IntoResponse for OidcError {
    fn into_response(self) -> Response {
        let status = if self.code.is_client_config_error() {
            self.code.status_code()
        } else if self.code == ErrorCode::ServerError {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_REQUEST
        };
        let body = OidcErrorBody {
            error: self.code.as_str(),
            error_description: self.description,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_errors_are_never_redirect_safe() {
        assert!(!OidcError::invalid_client("bad secret").safe_to_redirect());
        assert!(!OidcError::unsupported_grant_type("nope").safe_to_redirect());
    }

    #[test]
    fn whitelisted_error_with_validated_redirect_is_safe() {
        assert!(OidcError::invalid_scope("bad scope").safe_to_redirect());
        assert!(OidcError::access_denied("no").safe_to_redirect());
    }

    #[test]
    fn whitelisted_error_without_validated_redirect_is_unsafe() {
        let err = OidcError::invalid_request("missing param", false);
        assert!(!err.safe_to_redirect());
    }
}
