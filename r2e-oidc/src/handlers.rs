//! axum handlers for every wire endpoint in §6.
//!
//! Tenant resolution is by path segment here (`/t/{tenant_id}/...`); a
//! deployment that wants subdomain or header-based resolution puts that
//! logic in middleware ahead of these handlers and rewrites the path, since
//! [`crate::state::TenantRegistry::resolve`] already supports looking a
//! tenant up by any of the three keys.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::Form;
use serde_json::json;
use uuid::Uuid;

use crate::authorize::{AuthorizeRequest, UiMode};
use crate::client::authenticate;
use crate::domain::{Claims, DeviceCode, DeviceCodeStatus, ProtocolContext, ProtocolEndpoint, Tenant};
use crate::error::OidcError;
use crate::resume::{self, random_token, AuthenticationOutcome};
use crate::state::AppState;

fn resolve_tenant(state: &AppState, tenant_id: &str) -> Result<Tenant, OidcError> {
    state
        .tenants
        .get(tenant_id)
        .ok_or_else(|| OidcError::invalid_request("unknown tenant", false))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// HTTP Basic or form-body client credentials (§4.2: `client_secret_basic`
/// or `client_secret_post`).
fn basic_auth_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

// ── discovery & JWKS ──────────────────────────────────────────────────────

pub async fn discovery_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let issuer = state.issuer_for(&tenant);
    let doc = json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/connect/authorize"),
        "pushed_authorization_request_endpoint": format!("{issuer}/connect/par"),
        "token_endpoint": format!("{issuer}/connect/token"),
        "userinfo_endpoint": format!("{issuer}/connect/userinfo"),
        "jwks_uri": format!("{issuer}/.well-known/jwks.json"),
        "introspection_endpoint": format!("{issuer}/connect/introspect"),
        "revocation_endpoint": format!("{issuer}/connect/revocation"),
        "device_authorization_endpoint": format!("{issuer}/connect/deviceauthorization"),
        "end_session_endpoint": format!("{issuer}/connect/endsession"),
        "response_types_supported": ["code"],
        "response_modes_supported": ["query", "fragment"],
        "grant_types_supported": [
            "authorization_code",
            "refresh_token",
            "client_credentials",
            "password",
            "urn:ietf:params:oauth:grant-type:device_code",
            "urn:openid:params:grant-type:ciba",
            "urn:ietf:params:oauth:grant-type:token-exchange",
        ],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "scopes_supported": ["openid", "profile", "email", "phone", "offline_access"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "code_challenge_methods_supported": ["S256", "plain"],
        "dpop_signing_alg_values_supported": ["RS256", "ES256"],
    });
    Ok(Json(doc).into_response())
}

pub async fn jwks_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let snapshot = state.keys.snapshot(&tenant.id);
    let now = state.clock.now();
    Ok(Json(snapshot.jwks(now)).into_response())
}

// ── pushed authorization request (RFC 9126) ───────────────────────────────

pub async fn par_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let client_id = params
        .get("client_id")
        .ok_or_else(|| OidcError::invalid_request("missing client_id", false))?;
    let client_secret = params.get("client_secret").map(String::as_str);
    let client = state
        .clients
        .get(&tenant.id, client_id)
        .ok_or_else(|| OidcError::invalid_client("unknown client_id"))?;
    authenticate(&client, client_secret).await?;

    let request = AuthorizeRequest::from_params(&params)?;
    crate::authorize::validate_request(&request, Some(&client))?;

    let now = state.clock.now();
    let request_uri = format!("urn:ietf:params:oauth:request_uri:{}", Uuid::new_v4());
    state.pars.put(crate::domain::ParEntry {
        request_uri: request_uri.clone(),
        tenant_id: tenant.id.clone(),
        client_id: client.client_id.clone(),
        params,
        created_at: now,
        expires_at: now + state.config.par_ttl_secs as i64,
    });

    Ok((
        StatusCode::CREATED,
        Json(json!({ "request_uri": request_uri, "expires_in": state.config.par_ttl_secs })),
    )
        .into_response())
}

// ── authorize ──────────────────────────────────────────────────────────────

/// Either an issued authorization code ready for redirect assembly, or a
/// response the suspended journey engine has already produced for this
/// turn (§4.4's `ShowUi`/`Redirect` step results).
enum AuthorizeOutcome {
    Code(String),
    Suspended(Response),
}

pub async fn authorize_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    authorize_impl(state, tenant_id, params).await
}

pub async fn authorize_form_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    authorize_impl(state, tenant_id, params).await
}

async fn authorize_impl(state: Arc<AppState>, tenant_id: String, params: HashMap<String, String>) -> Response {
    let (request, result) = authorize_inner(&state, &tenant_id, params).await;
    match result {
        Ok(AuthorizeOutcome::Code(code)) => {
            let request = request.expect("a successful outcome always carries its parsed request");
            resume::redirect_with_code(&request, &code).unwrap_or_else(IntoResponse::into_response)
        }
        Ok(AuthorizeOutcome::Suspended(response)) => response,
        Err(err) => resume::authorize_error_response(request.as_ref(), err),
    }
}

/// Returns the parsed request (if parsing got that far, so errors after it
/// can redirect) alongside the outcome.
async fn authorize_inner(
    state: &AppState,
    tenant_id: &str,
    mut params: HashMap<String, String>,
) -> (Option<AuthorizeRequest>, Result<AuthorizeOutcome, OidcError>) {
    let tenant = match resolve_tenant(state, tenant_id) {
        Ok(t) => t,
        Err(e) => return (None, Err(e)),
    };

    if let Some(request_uri) = params.get("request_uri").cloned() {
        let entry = match state.pars.take(&request_uri) {
            Some(e) => e,
            None => {
                return (
                    None,
                    Err(OidcError::invalid_request("request_uri is invalid, expired, or already used", false)),
                )
            }
        };
        if entry.tenant_id != tenant.id {
            return (None, Err(OidcError::invalid_request("request_uri was not issued to this tenant", false)));
        }
        params = entry.params;
    }

    let client_id = match params.get("client_id").cloned() {
        Some(c) => c,
        None => return (None, Err(OidcError::invalid_request("missing client_id", false))),
    };
    let client = state.clients.get(&tenant.id, &client_id);

    let request = match AuthorizeRequest::from_params(&params) {
        Ok(r) => r,
        Err(e) => return (None, Err(e)),
    };
    if let Err(e) = crate::authorize::validate_request(&request, client.as_ref()) {
        return (Some(request), Err(e));
    }
    let client = client.expect("validated above");

    let result = authorize_issue_code(state, &tenant, &client, &request, &params).await;
    (Some(request), result)
}

/// §4.1 step 5: a client with a "login" journey policy and a wired
/// [`crate::coordinator::JourneyCoordinator`] suspends into it (unless the
/// request explicitly asks for [`UiMode::Standalone`]); everything else
/// falls back to the minimal inline local-login surface below — the
/// extension point `r2e-journey` (adapted by the deployment binary) fills
/// in once a policy is configured (see DESIGN.md).
async fn authorize_issue_code(
    state: &AppState,
    tenant: &Tenant,
    client: &crate::domain::Client,
    request: &AuthorizeRequest,
    params: &HashMap<String, String>,
) -> Result<AuthorizeOutcome, OidcError> {
    if client.par_required && params.get("request_uri").is_none() {
        return Err(OidcError::invalid_request("this client requires pushed authorization requests", true));
    }

    if request.ui_mode != Some(UiMode::Standalone) {
        if let Some(policy_id) = client.journey_policy_for("login") {
            if let Some(coordinator) = state.journey.get() {
                let now = state.clock.now();
                let correlation_id = Uuid::new_v4().to_string();
                let ctx = ProtocolContext {
                    correlation_id: correlation_id.clone(),
                    tenant_id: tenant.id.clone(),
                    endpoint_type: ProtocolEndpoint::Authorize,
                    request: request.clone(),
                    policy_id: Some(policy_id.to_string()),
                    created_at: now,
                    expires_at: now + state.config.protocol_state_ttl_secs as i64,
                };
                state.protocol_states.put(ctx.clone());
                let response = coordinator.begin(&ctx).await?;
                return Ok(AuthorizeOutcome::Suspended(response));
            }
        }
    }

    let username = params.get("username").cloned();
    let password = params.get("password").cloned();
    let subject_id = match (username, password) {
        (Some(username), Some(password)) if client.local_login_enabled => {
            if !state.users.verify_password(&tenant.id, &username, &password).await {
                return Err(OidcError::access_denied("invalid username or password"));
            }
            let user = state
                .users
                .find_by_username(&tenant.id, &username)
                .await
                .ok_or_else(|| OidcError::access_denied("invalid username or password"))?;
            if !user.active || !client.allows_user(&user.subject_id, &user.roles_vec()) {
                return Err(OidcError::access_denied("user is not permitted to use this client"));
            }
            user.subject_id
        }
        _ => return Err(OidcError::login_required()),
    };

    let consent_given = params.get("consent").map(String::as_str) == Some("allow");
    let outcome = AuthenticationOutcome {
        subject_id,
        session_id: Some(Uuid::new_v4().to_string()),
        auth_method: Some("pwd".to_string()),
        extra_claims: Claims::new(),
    };
    let code = resume::issue_code_for_authenticated_subject(state, tenant, client, request, &outcome, consent_given).await?;
    Ok(AuthorizeOutcome::Code(code))
}

// ── token ──────────────────────────────────────────────────────────────────

pub async fn token_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;

    let grant_type = params
        .get("grant_type")
        .ok_or_else(|| OidcError::invalid_request("missing grant_type", false))?
        .clone();

    let (client_id, client_secret) = match basic_auth_credentials(&headers) {
        Some((id, secret)) => (id, Some(secret)),
        None => (
            params
                .get("client_id")
                .cloned()
                .ok_or_else(|| OidcError::invalid_client("missing client_id"))?,
            params.get("client_secret").cloned(),
        ),
    };
    let client = state
        .clients
        .get(&tenant.id, &client_id)
        .ok_or_else(|| OidcError::invalid_client("unknown client_id"))?;
    authenticate(&client, client_secret.as_deref()).await?;

    if !client.allows_grant_type(&grant_type) {
        return Err(OidcError::unauthorized_client(format!(
            "client is not authorized to use grant_type '{grant_type}'"
        )));
    }

    let handler = state
        .grants
        .get(&grant_type)
        .ok_or_else(|| OidcError::unsupported_grant_type(format!("unsupported grant_type '{grant_type}'")))?;

    let mut outcome = handler.handle(&state, &tenant, &client, &params).await?;

    let dpop_proof = if let Some(proof_jwt) = headers.get("DPoP").and_then(|v| v.to_str().ok()) {
        let url = format!("{}/connect/token", state.issuer_for(&tenant));
        let proof = state
            .dpop
            .validate(proof_jwt, "POST", &url, None)
            .map_err(|e| OidcError::invalid_request(format!("invalid DPoP proof: {e}"), false))?;
        Some(proof)
    } else if client.dpop_required {
        return Err(OidcError::invalid_request("this client requires DPoP-bound tokens", false));
    } else {
        None
    };
    if let Some(proof) = &dpop_proof {
        outcome.cnf_jkt = Some(proof.jkt.clone());
    }

    let issuer = state.issuer_for(&tenant);
    let subject = outcome.subject_id.clone().unwrap_or_else(|| client.client_id.clone());

    let (access_token, expires_at) = state.token_service.mint_access_token(
        &tenant.id,
        &issuer,
        &subject,
        &client.client_id,
        &outcome.scopes,
        client.lifetimes.access_token_secs,
        &outcome.claims,
        outcome.cnf_jkt.as_deref(),
        outcome.act.clone(),
    )?;
    let now = state.clock.now();

    let mut body = json!({
        "access_token": access_token,
        "token_type": if dpop_proof.is_some() { "DPoP" } else { "Bearer" },
        "expires_in": (expires_at - now).max(0),
        "scope": outcome.scopes.join(" "),
    });

    if outcome.issue_id_token {
        if let Some(subject_id) = &outcome.subject_id {
            let amr = outcome.auth_method.as_ref().map(std::slice::from_ref);
            let id_token = state.token_service.mint_id_token(
                &tenant.id,
                &issuer,
                subject_id,
                &client.client_id,
                outcome.nonce.as_deref(),
                Some(now),
                amr,
                None,
                client.lifetimes.id_token_secs,
                &outcome.claims,
            )?;
            body["id_token"] = json!(id_token);
        }
    }

    if outcome.issue_refresh_token {
        if let Some(subject_id) = &outcome.subject_id {
            let refresh_token = random_token();
            state.refresh_grants.put(crate::domain::RefreshTokenGrant {
                token: refresh_token.clone(),
                tenant_id: tenant.id.clone(),
                client_id: client.client_id.clone(),
                subject_id: subject_id.clone(),
                session_id: outcome.session_id.clone(),
                scopes: outcome.scopes.clone(),
                claims_snapshot: outcome.claims.clone(),
                created_at: now,
                last_used_at: now,
                consumed_at: None,
                absolute_expires_at: now + client.lifetimes.refresh_token_absolute_secs as i64,
                sliding_expires_at: now + client.lifetimes.refresh_token_sliding_secs as i64,
            });
            body["refresh_token"] = json!(refresh_token);
        }
    }

    Ok((StatusCode::OK, Json(body)).into_response())
}

// ── device authorization (RFC 8628) ───────────────────────────────────────

pub async fn device_authorization_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let client_id = params
        .get("client_id")
        .ok_or_else(|| OidcError::invalid_request("missing client_id", false))?;
    let client = state
        .clients
        .get(&tenant.id, client_id)
        .ok_or_else(|| OidcError::invalid_client("unknown client_id"))?;

    let scopes: Vec<String> = params
        .get("scope")
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_else(|| client.allowed_scopes.iter().cloned().collect());

    let now = state.clock.now();
    let device_code = random_token();
    let user_code = format!(
        "{}-{}",
        &Uuid::new_v4().simple().to_string()[..4].to_uppercase(),
        &Uuid::new_v4().simple().to_string()[..4].to_uppercase()
    );

    state.device_codes.put(DeviceCode {
        device_code: device_code.clone(),
        user_code: user_code.clone(),
        tenant_id: tenant.id.clone(),
        client_id: client.client_id.clone(),
        scopes,
        status: DeviceCodeStatus::Pending,
        subject_id: None,
        session_id: None,
        claims_snapshot: Claims::new(),
        created_at: now,
        expires_at: now + state.config.device_code_ttl_secs as i64,
        interval_secs: 5,
        token_issued: false,
    });

    let issuer = state.issuer_for(&tenant);
    Ok(Json(json!({
        "device_code": device_code,
        "user_code": user_code,
        "verification_uri": format!("{issuer}/connect/device"),
        "verification_uri_complete": format!("{issuer}/connect/device?user_code={user_code}"),
        "expires_in": state.config.device_code_ttl_secs,
        "interval": 5,
    }))
    .into_response())
}

/// Out-of-band approval step: a logged-in user approves or denies the
/// device code shown on the other device. Not part of §6's endpoint table
/// directly — it is the UI action a journey (or this minimal surface)
/// performs before the polling device can retrieve its token.
pub async fn device_verification_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let user_code = params
        .get("user_code")
        .ok_or_else(|| OidcError::invalid_request("missing user_code", false))?;
    let username = params
        .get("username")
        .ok_or_else(|| OidcError::invalid_request("missing username", false))?;
    let password = params
        .get("password")
        .ok_or_else(|| OidcError::invalid_request("missing password", false))?;
    let approved = params.get("approved").map(String::as_str) == Some("true");

    if approved {
        if !state.users.verify_password(&tenant.id, username, password).await {
            return Err(OidcError::access_denied("invalid username or password"));
        }
        let user = state
            .users
            .find_by_username(&tenant.id, username)
            .await
            .ok_or_else(|| OidcError::access_denied("invalid username or password"))?;
        let resolved = state
            .device_codes
            .resolve(user_code, Some(user.subject_id), Some(Uuid::new_v4().to_string()), true);
        if !resolved {
            return Err(OidcError::invalid_request("user_code is invalid, expired, or already resolved", false));
        }
    } else {
        state.device_codes.resolve(user_code, None, None, false);
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}

// ── introspection & revocation (RFC 7662, RFC 7009) ───────────────────────

pub async fn introspect_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let (client_id, client_secret) = match basic_auth_credentials(&headers) {
        Some((id, secret)) => (id, Some(secret)),
        None => (
            params.get("client_id").cloned().unwrap_or_default(),
            params.get("client_secret").cloned(),
        ),
    };
    let client = state
        .clients
        .get(&tenant.id, &client_id)
        .ok_or_else(|| OidcError::invalid_client("unknown client_id"))?;
    authenticate(&client, client_secret.as_deref()).await?;

    let token = params
        .get("token")
        .ok_or_else(|| OidcError::invalid_request("missing token", false))?;

    if let Some(grant) = state.refresh_grants.get(token) {
        let now = state.clock.now();
        let active = grant.consumed_at.is_none() && !grant.is_expired(now);
        return Ok(Json(json!({
            "active": active,
            "client_id": grant.client_id,
            "sub": grant.subject_id,
            "scope": grant.scopes.join(" "),
            "exp": grant.effective_expiry(),
        }))
        .into_response());
    }

    // Access/ID tokens are self-describing JWTs; introspection decodes
    // without re-validating binding concerns handled at issuance.
    match jsonwebtoken::decode_header(token) {
        Ok(header) => {
            let snapshot = state.keys.snapshot(&tenant.id);
            let Some(kid) = header.kid else {
                return Ok(Json(json!({ "active": false })).into_response());
            };
            let Some(entry) = snapshot.find(&kid) else {
                return Ok(Json(json!({ "active": false })).into_response());
            };
            let mut validation = jsonwebtoken::Validation::new(header.alg);
            validation.validate_aud = false;
            match jsonwebtoken::decode::<Claims>(token, &entry.material.decoding_key, &validation) {
                Ok(data) => Ok(Json(json!({
                    "active": true,
                    "client_id": data.claims.get("client_id"),
                    "sub": data.claims.get("sub"),
                    "scope": data.claims.get("scope"),
                    "exp": data.claims.get("exp"),
                }))
                .into_response()),
                Err(_) => Ok(Json(json!({ "active": false })).into_response()),
            }
        }
        Err(_) => Ok(Json(json!({ "active": false })).into_response()),
    }
}

pub async fn revocation_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let (client_id, client_secret) = match basic_auth_credentials(&headers) {
        Some((id, secret)) => (id, Some(secret)),
        None => (
            params.get("client_id").cloned().unwrap_or_default(),
            params.get("client_secret").cloned(),
        ),
    };
    let client = state
        .clients
        .get(&tenant.id, &client_id)
        .ok_or_else(|| OidcError::invalid_client("unknown client_id"))?;
    authenticate(&client, client_secret.as_deref()).await?;

    let token = params
        .get("token")
        .ok_or_else(|| OidcError::invalid_request("missing token", false))?;

    // RFC 7009: revoking one token in a family should not silently leave
    // its siblings usable, so a refresh token revocation fans out.
    if let Some(grant) = state.refresh_grants.get(token) {
        if grant.tenant_id == tenant.id && grant.client_id == client.client_id {
            state.refresh_grants.revoke_family(&grant.family_key());
        }
    }
    state.refresh_grants.remove(token);

    Ok(StatusCode::OK.into_response())
}

// ── userinfo ────────────────────────────────────────────────────────────

pub async fn userinfo_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;
    let token = bearer_token(&headers).ok_or_else(|| OidcError::invalid_client("missing bearer token"))?;

    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| OidcError::invalid_client(format!("malformed access token: {e}")))?;
    let kid = header.kid.ok_or_else(|| OidcError::invalid_client("access token missing kid"))?;
    let snapshot = state.keys.snapshot(&tenant.id);
    let entry = snapshot.find(&kid).ok_or_else(|| OidcError::invalid_client("access token signed by unknown key"))?;

    let mut validation = jsonwebtoken::Validation::new(header.alg);
    validation.validate_aud = false;
    let data = jsonwebtoken::decode::<Claims>(token, &entry.material.decoding_key, &validation)
        .map_err(|e| OidcError::invalid_client(format!("access token invalid or expired: {e}")))?;

    let subject = data
        .claims
        .get("sub")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| OidcError::server_error("access token missing sub claim"))?;

    let mut body = json!({ "sub": subject });
    if let serde_json::Value::Object(map) = &mut body {
        for (k, v) in &data.claims {
            if k != "sub" && !["iss", "aud", "iat", "exp", "client_id", "cnf", "act", "scope"].contains(&k.as_str()) {
                map.insert(k.clone(), v.clone());
            }
        }
    }
    Ok(Json(body).into_response())
}

// ── end session (RP-initiated logout) ─────────────────────────────────────

pub async fn end_session_handler(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, OidcError> {
    let tenant = resolve_tenant(&state, &tenant_id)?;

    if let Some(post_logout_redirect_uri) = params.get("post_logout_redirect_uri") {
        if let Some(client_id) = params.get("client_id") {
            let client = state
                .clients
                .get(&tenant.id, client_id)
                .ok_or_else(|| OidcError::invalid_request("unknown client_id", false))?;
            if !client.allows_redirect_uri(post_logout_redirect_uri) {
                return Err(OidcError::invalid_request(
                    "post_logout_redirect_uri does not match a registered URI for this client",
                    false,
                ));
            }
        }
        let mut url = url::Url::parse(post_logout_redirect_uri)
            .map_err(|_| OidcError::invalid_request("post_logout_redirect_uri is not a valid URL", false))?;
        if let Some(state_param) = params.get("state") {
            url.query_pairs_mut().append_pair("state", state_param);
        }
        return Ok(Redirect::to(url.as_str()).into_response());
    }

    Ok(StatusCode::NO_CONTENT.into_response())
}
