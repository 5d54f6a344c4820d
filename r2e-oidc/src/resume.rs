//! Shared tail of the authorize flow (§4.1 steps 5-7): once a subject has
//! been authenticated — whether by the inline local-login fallback in
//! [`crate::coordinator`]'s absence, or by a journey engine calling back
//! through [`resume_after_authentication`] — both paths converge here for
//! consent evaluation, authorization-code issuance, and redirect assembly.
//!
//! Factoring this out is what lets an external engine (`r2e-journey`, wired
//! up by the binary crate) resume a suspended [`ProtocolContext`] without
//! reimplementing consent/code-issuance, and without `r2e-oidc` depending on
//! the journey engine's types (§9: break cycles with ids looked up through a
//! store, not direct references).

use axum::response::{IntoResponse, Redirect, Response};
use uuid::Uuid;

use crate::authorize::{AuthorizeRequest, ResponseMode};
use crate::domain::{AuthorizationCode, Claims, Client, ConsentRecord, ProtocolContext, Tenant};
use crate::error::OidcError;
use crate::state::AppState;

/// What an authentication step established about the caller, in the shape
/// the authorize-flow tail needs regardless of who produced it.
#[derive(Clone, Debug)]
pub struct AuthenticationOutcome {
    pub subject_id: String,
    pub session_id: Option<String>,
    /// Maps to the ID token's `amr` claim (§4.4's authentication-state
    /// contract).
    pub auth_method: Option<String>,
    pub extra_claims: Claims,
}

pub(crate) fn random_token() -> String {
    Uuid::new_v4().simple().to_string() + &Uuid::new_v4().simple().to_string()
}

/// §4.1 step 4 / §7 / §8: once `redirect_uri` is validated, whitelisted
/// errors redirect back to the client carrying `error`/`error_description`
/// instead of rendering as JSON; everything else (including any error raised
/// before `redirect_uri` is confirmed) renders in place.
pub fn authorize_error_response(request: Option<&AuthorizeRequest>, err: OidcError) -> Response {
    if let Some(request) = request {
        if err.safe_to_redirect() {
            if let Ok(mut url) = url::Url::parse(&request.redirect_uri) {
                let pairs = [
                    ("error", err.code().as_str().to_string()),
                    ("error_description", err.description().to_string()),
                ];
                match request.response_mode {
                    ResponseMode::Query => {
                        for (k, v) in &pairs {
                            url.query_pairs_mut().append_pair(k, v);
                        }
                        if let Some(s) = &request.state {
                            url.query_pairs_mut().append_pair("state", s);
                        }
                    }
                    ResponseMode::Fragment => {
                        let mut fragment = pairs
                            .iter()
                            .map(|(k, v)| format!("{k}={}", url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()))
                            .collect::<Vec<_>>()
                            .join("&");
                        if let Some(s) = &request.state {
                            fragment.push_str(&format!("&state={s}"));
                        }
                        url.set_fragment(Some(&fragment));
                    }
                }
                return Redirect::to(url.as_str()).into_response();
            }
        }
    }
    err.into_response()
}

pub fn redirect_with_code(request: &AuthorizeRequest, code: &str) -> Result<Response, OidcError> {
    let mut url = url::Url::parse(&request.redirect_uri)
        .map_err(|_| OidcError::invalid_request("redirect_uri is not a valid URL", false))?;

    let mut pairs = vec![("code".to_string(), code.to_string())];
    if let Some(state_param) = &request.state {
        pairs.push(("state".to_string(), state_param.clone()));
    }

    match request.response_mode {
        ResponseMode::Query => {
            for (k, v) in &pairs {
                url.query_pairs_mut().append_pair(k, v);
            }
        }
        ResponseMode::Fragment => {
            let fragment = pairs
                .iter()
                .map(|(k, v)| format!("{k}={}", url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>()))
                .collect::<Vec<_>>()
                .join("&");
            url.set_fragment(Some(&fragment));
        }
    }

    Ok(Redirect::to(url.as_str()).into_response())
}

/// Consent evaluation + authorization-code issuance for an already
/// authenticated subject. `consent_given` is the caller's own consent
/// decision (an inline `consent=allow` form field, or a journey's `consent`
/// step outcome).
pub(crate) async fn issue_code_for_authenticated_subject(
    state: &AppState,
    tenant: &Tenant,
    client: &Client,
    request: &AuthorizeRequest,
    outcome: &AuthenticationOutcome,
    consent_given: bool,
) -> Result<String, OidcError> {
    let now = state.clock.now();

    let user = state
        .users
        .find_by_subject(&tenant.id, &outcome.subject_id)
        .await
        .ok_or_else(|| OidcError::access_denied("user no longer exists"))?;
    if !user.active || !client.allows_user(&user.subject_id, &user.roles_vec()) {
        return Err(OidcError::access_denied("user is not permitted to use this client"));
    }

    if client.consent_required && !request.requires_consent_prompt() {
        let existing = state.consents.get(&tenant.id, &outcome.subject_id, &client.client_id);
        let covered = existing.as_ref().map(|c| c.covers(&request.scopes, now)).unwrap_or(false);
        if !covered && !consent_given {
            return Err(OidcError::consent_required());
        }
        if consent_given {
            state.consents.put(ConsentRecord {
                tenant_id: tenant.id.clone(),
                subject_id: outcome.subject_id.clone(),
                client_id: client.client_id.clone(),
                scopes: request.scopes.iter().cloned().collect(),
                expires_at: now + state.config.consent_ttl_secs as i64,
            });
        }
    }

    let mut claims = state.users.claims_for_scopes(&user, &request.scopes);
    for (k, v) in &outcome.extra_claims {
        claims.insert(k.clone(), v.clone());
    }
    if let Some(method) = &outcome.auth_method {
        claims.insert("amr".to_string(), serde_json::json!([method]));
    }

    let code = random_token();
    state.codes.put(AuthorizationCode {
        code: code.clone(),
        tenant_id: tenant.id.clone(),
        client_id: client.client_id.clone(),
        subject_id: outcome.subject_id.clone(),
        redirect_uri: request.redirect_uri.clone(),
        scopes: request.scopes.clone(),
        code_challenge: request.code_challenge.clone(),
        code_challenge_method: request.code_challenge_method,
        nonce: request.nonce.clone(),
        session_id: outcome.session_id.clone(),
        created_at: now,
        expires_at: now + state.config.auth_code_ttl_secs as i64,
        claims_snapshot: claims,
        consumed: false,
    });

    Ok(code)
}

/// Entry point an external authentication engine calls once it has produced
/// an [`AuthenticationOutcome`] for a suspended [`ProtocolContext`] (§4.4
/// step 5: "delivering an `AuthenticationResult`... back to the authorize
/// endpoint via the correlation_id"). Resolves the tenant/client the context
/// was opened for, applies consent, issues the authorization code, and
/// assembles the redirect — the same tail the inline fallback path in
/// `handlers::authorize_issue_code` runs.
pub async fn resume_after_authentication(
    state: &AppState,
    ctx: &ProtocolContext,
    outcome: AuthenticationOutcome,
    consent_given: bool,
) -> Response {
    match resume_inner(state, ctx, &outcome, consent_given).await {
        Ok(code) => redirect_with_code(&ctx.request, &code).unwrap_or_else(IntoResponse::into_response),
        Err(err) => authorize_error_response(Some(&ctx.request), err),
    }
}

async fn resume_inner(
    state: &AppState,
    ctx: &ProtocolContext,
    outcome: &AuthenticationOutcome,
    consent_given: bool,
) -> Result<String, OidcError> {
    let tenant = state
        .tenants
        .get(&ctx.tenant_id)
        .ok_or_else(|| OidcError::invalid_request("unknown tenant", false))?;
    let client = state
        .clients
        .get(&tenant.id, &ctx.request.client_id)
        .ok_or_else(|| OidcError::invalid_client("unknown client_id"))?;

    issue_code_for_authenticated_subject(state, &tenant, &client, &ctx.request, outcome, consent_given).await
}
