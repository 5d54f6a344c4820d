//! The authorize endpoint's protocol state machine (§4.1).
//!
//! Parsing, PAR resolution, validation, and the pure `advance` state
//! transition are kept independent of axum so the state machine itself is
//! unit-testable without an HTTP harness (see `r2e-security::dpop`'s
//! `DpopValidator::validate`, which is likewise pure and side-effect free).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::PkceMethod;
use crate::error::OidcError;

/// Response mode for the authorization-code redirect.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResponseMode {
    #[default]
    Query,
    Fragment,
}

/// Which UI surface drives an interactive authentication, resolved
/// request → client → tenant → default (journey).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Journey,
    Standalone,
}

/// A validated authorize request, carrying every parameter the protocol
/// layer, the journey engine, and code issuance need.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub response_mode: ResponseMode,
    pub prompt: Option<String>,
    pub max_age: Option<i64>,
    pub acr_values: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<PkceMethod>,
    pub login_hint: Option<String>,
    pub ui_locales: Option<String>,
    pub id_token_hint: Option<String>,
    pub policy_id: Option<String>,
    pub ui_mode: Option<UiMode>,
}

impl AuthorizeRequest {
    /// Parse a flat parameter map (query string merged with, and overridden
    /// by, form-body parameters per §4.1 step 1) into a request. This does
    /// not validate against client configuration — see [`validate`].
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, OidcError> {
        let client_id = params
            .get("client_id")
            .cloned()
            .ok_or_else(|| OidcError::invalid_request("missing client_id", false))?;
        let redirect_uri = params
            .get("redirect_uri")
            .cloned()
            .ok_or_else(|| OidcError::invalid_request("missing redirect_uri", false))?;
        let response_type = params
            .get("response_type")
            .cloned()
            .ok_or_else(|| OidcError::invalid_request("missing response_type", false))?;
        let scopes = params
            .get("scope")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let response_mode = match params.get("response_mode").map(String::as_str) {
            Some("fragment") => ResponseMode::Fragment,
            _ => ResponseMode::Query,
        };
        let ui_mode = match params.get("ui_mode").map(String::as_str) {
            Some("standalone") => Some(UiMode::Standalone),
            Some("journey") => Some(UiMode::Journey),
            _ => None,
        };
        let code_challenge_method = match params.get("code_challenge_method").map(String::as_str) {
            Some(m) => Some(
                crate::pkce::parse_method(m)
                    .ok_or_else(|| OidcError::invalid_request("unsupported code_challenge_method", false))?,
            ),
            None => None,
        };

        Ok(Self {
            client_id,
            redirect_uri,
            response_type,
            scopes,
            state: params.get("state").cloned(),
            nonce: params.get("nonce").cloned(),
            response_mode,
            prompt: params.get("prompt").cloned(),
            max_age: params.get("max_age").and_then(|v| v.parse().ok()),
            acr_values: params.get("acr_values").cloned(),
            code_challenge: params.get("code_challenge").cloned(),
            code_challenge_method,
            login_hint: params.get("login_hint").cloned(),
            ui_locales: params.get("ui_locales").cloned(),
            id_token_hint: params.get("id_token_hint").cloned(),
            policy_id: params
                .get("policy")
                .or_else(|| params.get("p"))
                .cloned(),
            ui_mode,
        })
    }

    pub fn requires_login(&self) -> bool {
        self.prompt.as_deref() == Some("login")
    }

    pub fn requires_consent_prompt(&self) -> bool {
        self.prompt.as_deref() == Some("consent")
    }
}

/// Validate a parsed request against the registered client. Returns, on
/// error, whether `redirect_uri` itself was validated — OAuth 2.0 forbids
/// redirecting errors to an unvalidated URI (§4.1 step 4, §7).
pub fn validate_request(
    req: &AuthorizeRequest,
    client: Option<&crate::domain::Client>,
) -> Result<(), OidcError> {
    let Some(client) = client else {
        return Err(OidcError::invalid_request("unknown client_id", false));
    };

    if !client.allows_redirect_uri(&req.redirect_uri) {
        // redirect_uri itself is the thing that failed validation.
        return Err(OidcError::invalid_request(
            "redirect_uri does not match a registered URI for this client",
            false,
        ));
    }

    // Past this point redirect_uri is validated; every error below is safe
    // to redirect (it is in the whitelist and carries redirect_validated=true).
    if req.response_type != "code" {
        return Err(OidcError::unsupported_response_type(
            "only the 'code' response_type is supported",
        ));
    }

    if req.code_challenge.is_none() && client.pkce_required {
        return Err(OidcError::invalid_request(
            "client requires PKCE but no code_challenge was supplied",
            true,
        ));
    }
    if let Some(method) = req.code_challenge_method {
        if method == PkceMethod::Plain && !client.pkce_plain_allowed {
            return Err(OidcError::invalid_request(
                "plain PKCE transform is not allowed for this client",
                true,
            ));
        }
    }

    for scope in &req.scopes {
        if scope != "openid" && !client.allows_scope(scope) {
            return Err(OidcError::invalid_scope(format!(
                "scope '{scope}' is not allowed for this client"
            )));
        }
    }

    Ok(())
}

/// The authorize endpoint's states (§4.1). `Completed` and `Error` are
/// terminal; `Error` is reachable from every other state.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuthorizeState {
    Received,
    Validated,
    NeedsAuth,
    JourneyRunning,
    NeedsConsent,
    ReadyToIssue,
    Completed,
    Error,
}

/// Transition events driving [`AuthorizeState`].
#[derive(Clone, Debug)]
pub enum AuthorizeEvent {
    ValidationSucceeded,
    ValidationFailed,
    AuthenticationMissing,
    JourneyStarted,
    JourneyCompleted,
    ConsentRequired,
    ConsentGranted,
    CodeIssued,
    Failed,
}

/// Effect the HTTP layer must perform for a given transition.
#[derive(Clone, Debug)]
pub enum AuthorizeEffect {
    None,
    BeginJourney,
    RenderConsent,
    IssueCodeAndRedirect,
    RenderError,
}

/// Pure state transition: `(state, event) -> (state, effect)`. Kept free of
/// I/O so the state machine is unit-testable on its own, and so control flow
/// never ends up implicit in exception or coroutine state.
pub fn advance(state: AuthorizeState, event: AuthorizeEvent) -> (AuthorizeState, AuthorizeEffect) {
    use AuthorizeEffect::*;
    use AuthorizeEvent::*;
    use AuthorizeState::*;

    match (state, event) {
        (Received, ValidationSucceeded) => (Validated, None),
        (Received, ValidationFailed) => (Error, RenderError),
        (Validated, AuthenticationMissing) => (NeedsAuth, BeginJourney),
        (Validated, ConsentRequired) => (NeedsConsent, RenderConsent),
        (Validated, ConsentGranted) => (ReadyToIssue, IssueCodeAndRedirect),
        (NeedsAuth, JourneyStarted) => (JourneyRunning, None),
        (JourneyRunning, JourneyCompleted) => (NeedsConsent, RenderConsent),
        (JourneyRunning, Failed) => (Error, RenderError),
        (NeedsConsent, ConsentGranted) => (ReadyToIssue, IssueCodeAndRedirect),
        (NeedsConsent, Failed) => (Error, RenderError),
        (ReadyToIssue, CodeIssued) => (Completed, None),
        (_, Failed) => (Error, RenderError),
        (s, _) => (s, None),
    }
}

/// Errors whose `error` code is safe to redirect to `redirect_uri`, per §4.1
/// and §7. Any other error code is never redirected even if the URI itself
/// validated cleanly.
pub const SAFE_REDIRECT_ERRORS: &[&str] = &[
    "access_denied",
    "login_required",
    "consent_required",
    "interaction_required",
    "account_selection_required",
    "invalid_request",
    "unauthorized_client",
    "unsupported_response_type",
    "invalid_scope",
    "temporarily_unavailable",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_happy_path_transitions() {
        let (s, _) = advance(AuthorizeState::Received, AuthorizeEvent::ValidationSucceeded);
        assert_eq!(s, AuthorizeState::Validated);
        let (s, eff) = advance(s, AuthorizeEvent::ConsentGranted);
        assert_eq!(s, AuthorizeState::ReadyToIssue);
        assert!(matches!(eff, AuthorizeEffect::IssueCodeAndRedirect));
        let (s, _) = advance(s, AuthorizeEvent::CodeIssued);
        assert_eq!(s, AuthorizeState::Completed);
    }

    #[test]
    fn journey_suspend_and_resume() {
        let (s, _) = advance(AuthorizeState::Received, AuthorizeEvent::ValidationSucceeded);
        let (s, eff) = advance(s, AuthorizeEvent::AuthenticationMissing);
        assert_eq!(s, AuthorizeState::NeedsAuth);
        assert!(matches!(eff, AuthorizeEffect::BeginJourney));
        let (s, _) = advance(s, AuthorizeEvent::JourneyStarted);
        assert_eq!(s, AuthorizeState::JourneyRunning);
        let (s, eff) = advance(s, AuthorizeEvent::JourneyCompleted);
        assert_eq!(s, AuthorizeState::NeedsConsent);
        assert!(matches!(eff, AuthorizeEffect::RenderConsent));
    }

    #[test]
    fn error_is_reachable_from_any_state() {
        for state in [
            AuthorizeState::Received,
            AuthorizeState::Validated,
            AuthorizeState::NeedsAuth,
            AuthorizeState::JourneyRunning,
            AuthorizeState::NeedsConsent,
            AuthorizeState::ReadyToIssue,
        ] {
            let (s, eff) = advance(state, AuthorizeEvent::Failed);
            assert_eq!(s, AuthorizeState::Error);
            assert!(matches!(eff, AuthorizeEffect::RenderError));
        }
    }

    #[test]
    fn unvalidated_redirect_uri_error_is_not_whitelisted_as_server_error() {
        assert!(!SAFE_REDIRECT_ERRORS.contains(&"server_error"));
    }

    #[test]
    fn redirect_uri_mismatch_is_never_safe_to_redirect() {
        let client = crate::domain::Client {
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            client_secret_hash: None,
            redirect_uris: ["https://app/cb".to_string()].into_iter().collect(),
            allowed_scopes: Default::default(),
            allowed_grant_types: Default::default(),
            pkce_required: false,
            pkce_plain_allowed: false,
            dpop_required: false,
            par_required: false,
            consent_required: false,
            local_login_enabled: true,
            allowed_idps: Default::default(),
            allowed_users: Default::default(),
            allowed_roles: Default::default(),
            lifetimes: Default::default(),
            refresh_usage: crate::domain::RefreshTokenUsage::OneTimeOnly,
            refresh_expiration: crate::domain::RefreshTokenExpiration::Absolute,
            update_claims_on_refresh: false,
            journey_policies: Default::default(),
        };
        let req = AuthorizeRequest {
            client_id: "c1".into(),
            redirect_uri: "https://evil.example/cb".into(),
            response_type: "code".into(),
            scopes: vec!["openid".into()],
            state: None,
            nonce: None,
            response_mode: ResponseMode::Query,
            prompt: None,
            max_age: None,
            acr_values: None,
            code_challenge: None,
            code_challenge_method: None,
            login_hint: None,
            ui_locales: None,
            id_token_hint: None,
            policy_id: None,
            ui_mode: None,
        };
        let err = validate_request(&req, Some(&client)).unwrap_err();
        assert!(!err.redirect_validated());
    }
}
