//! Grant Handler Registry & Pipeline (§4.2): the token endpoint's
//! pluggable, immutable-once-built registry of `grant_type -> handler`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Claims, Client, DeviceCodeStatus, RefreshTokenExpiration, RefreshTokenUsage, Tenant};
use crate::error::OidcError;
use crate::state::AppState;

/// What a grant handler produced, before the caller (the token handler)
/// mints access/ID/refresh tokens from it.
pub struct TokenOutcome {
    /// `None` for client_credentials, which has no end-user subject.
    pub subject_id: Option<String>,
    pub scopes: Vec<String>,
    pub claims: Claims,
    pub session_id: Option<String>,
    pub nonce: Option<String>,
    /// Authentication method reference from the session that produced this
    /// grant, carried forward into the ID token's `amr` claim (§4.4's
    /// authentication-state contract). `None` when the grant has no
    /// authenticating session (e.g. client_credentials).
    pub auth_method: Option<String>,
    pub issue_id_token: bool,
    pub issue_refresh_token: bool,
    pub refresh_usage: RefreshTokenUsage,
    pub refresh_expiration: RefreshTokenExpiration,
    /// DPoP key thumbprint to bind into the access token's `cnf.jkt`.
    pub cnf_jkt: Option<String>,
    /// Delegation-chain claim for token exchange (§4.2, §8 scenario 6).
    pub act: Option<Value>,
}

/// The first `amr` entry carried in a claims snapshot, if any (§4.4: the
/// journey engine records a single `auth_method` per completed journey, so
/// the snapshot's `amr` array — written by `resume.rs` — has at most one
/// useful entry here).
fn amr_from_claims(claims: &Claims) -> Option<String> {
    claims
        .get("amr")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl TokenOutcome {
    fn simple(subject_id: Option<String>, scopes: Vec<String>, claims: Claims) -> Self {
        Self {
            subject_id,
            scopes,
            claims,
            session_id: None,
            nonce: None,
            auth_method: None,
            issue_id_token: false,
            issue_refresh_token: false,
            refresh_usage: RefreshTokenUsage::OneTimeOnly,
            refresh_expiration: RefreshTokenExpiration::Absolute,
            cnf_jkt: None,
            act: None,
        }
    }
}

#[async_trait]
pub trait GrantHandler: Send + Sync {
    async fn handle(
        &self,
        state: &AppState,
        tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError>;
}

/// Immutable-once-built `grant_type -> handler` map (§9: "explicit
/// registration API... immutable after construction").
pub struct GrantRegistry {
    handlers: HashMap<&'static str, Box<dyn GrantHandler>>,
}

impl GrantRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(mut self, grant_type: &'static str, handler: Box<dyn GrantHandler>) -> Self {
        self.handlers.insert(grant_type, handler);
        self
    }

    pub fn with_builtins() -> Self {
        Self::new()
            .register("authorization_code", Box::new(AuthorizationCodeGrant))
            .register("refresh_token", Box::new(RefreshTokenGrantHandler))
            .register("client_credentials", Box::new(ClientCredentialsGrant))
            .register(
                "urn:ietf:params:oauth:grant-type:device_code",
                Box::new(DeviceCodeGrant),
            )
            .register("password", Box::new(PasswordGrant))
            .register("urn:openid:params:grant-type:ciba", Box::new(CibaGrant))
            .register(
                "urn:ietf:params:oauth:grant-type:token-exchange",
                Box::new(TokenExchangeGrant),
            )
    }

    pub fn get(&self, grant_type: &str) -> Option<&dyn GrantHandler> {
        self.handlers.get(grant_type).map(|b| b.as_ref())
    }
}

impl Default for GrantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn param<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(String::as_str)
}

fn require_param<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, OidcError> {
    param(params, key).ok_or_else(|| OidcError::invalid_request(format!("missing '{key}' parameter"), false))
}

/// Requested scopes must be a subset of `allowed`; requesting fewer is
/// always fine (§4.2, §8: scope narrowing).
fn narrow_scopes(requested: Option<&str>, allowed: &[String]) -> Result<Vec<String>, OidcError> {
    match requested {
        None => Ok(allowed.to_vec()),
        Some(requested) => {
            let requested: Vec<String> = requested.split_whitespace().map(str::to_string).collect();
            if requested.iter().all(|s| allowed.contains(s)) {
                Ok(requested)
            } else {
                Err(OidcError::invalid_scope("requested scope exceeds the originally granted scopes"))
            }
        }
    }
}

// ── authorization_code ──────────────────────────────────────────────────

struct AuthorizationCodeGrant;

#[async_trait]
impl GrantHandler for AuthorizationCodeGrant {
    async fn handle(
        &self,
        state: &AppState,
        tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError> {
        let code = require_param(params, "code")?;
        let redirect_uri = require_param(params, "redirect_uri")?;

        let Some(entry) = state.codes.take(code) else {
            if let Some(family) = state.codes.replayed_family(code) {
                let removed_codes = state.codes.revoke_family(&family);
                let removed_refresh = state.refresh_grants.revoke_family(&family);
                tracing::warn!(
                    client_id = %client.client_id,
                    removed_codes,
                    removed_refresh,
                    "authorization code replay detected, revoked grant family"
                );
            }
            return Err(OidcError::invalid_grant("authorization code is invalid, expired, or already used"));
        };

        let now = state.clock.now();
        if entry.is_expired(now) {
            return Err(OidcError::invalid_grant("authorization code has expired"));
        }
        if entry.tenant_id != tenant.id || entry.client_id != client.client_id {
            return Err(OidcError::invalid_grant("authorization code was not issued to this client"));
        }
        if entry.redirect_uri != redirect_uri {
            return Err(OidcError::invalid_grant("redirect_uri does not match the authorization request"));
        }

        if entry.code_challenge.is_some() || client.pkce_required {
            let verifier = require_param(params, "code_verifier")?;
            let challenge = entry
                .code_challenge
                .as_deref()
                .ok_or_else(|| OidcError::invalid_grant("client requires PKCE but no challenge was recorded"))?;
            let method = entry.code_challenge_method.unwrap_or(crate::domain::PkceMethod::S256);
            if method == crate::domain::PkceMethod::Plain && !client.pkce_plain_allowed {
                return Err(OidcError::invalid_grant("plain PKCE transform is not permitted for this client"));
            }
            if !crate::pkce::verify(method, verifier, challenge) {
                return Err(OidcError::invalid_grant("PKCE verifier does not match the code challenge"));
            }
        }

        let user = state
            .users
            .find_by_subject(&tenant.id, &entry.subject_id)
            .await
            .ok_or_else(|| OidcError::invalid_grant("user for this authorization code no longer exists"))?;
        if !user.active {
            return Err(OidcError::invalid_grant("user account is disabled"));
        }
        if !client.allows_user(&user.subject_id, &user.roles_vec()) {
            return Err(OidcError::invalid_grant("user is not permitted to use this client"));
        }

        let mut claims = state.users.claims_for_scopes(&user, &entry.scopes);
        for (k, v) in &entry.claims_snapshot {
            claims.entry(k.clone()).or_insert_with(|| v.clone());
        }

        let auth_method = amr_from_claims(&claims);
        let mut outcome = TokenOutcome::simple(Some(entry.subject_id), entry.scopes, claims);
        outcome.session_id = entry.session_id;
        outcome.nonce = entry.nonce;
        outcome.auth_method = auth_method;
        outcome.issue_id_token = true;
        outcome.issue_refresh_token = client.allows_grant_type("refresh_token");
        outcome.refresh_usage = client.refresh_usage;
        outcome.refresh_expiration = client.refresh_expiration;
        Ok(outcome)
    }
}

// ── refresh_token ────────────────────────────────────────────────────────

struct RefreshTokenGrantHandler;

#[async_trait]
impl GrantHandler for RefreshTokenGrantHandler {
    async fn handle(
        &self,
        state: &AppState,
        tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError> {
        let token = require_param(params, "refresh_token")?;
        let grant = state
            .refresh_grants
            .get(token)
            .ok_or_else(|| OidcError::invalid_grant("refresh token is invalid or expired"))?;

        if grant.tenant_id != tenant.id || grant.client_id != client.client_id {
            return Err(OidcError::invalid_grant("refresh token was not issued to this client"));
        }

        let now = state.clock.now();
        if grant.is_expired(now) {
            state.refresh_grants.remove(token);
            return Err(OidcError::invalid_grant("refresh token has expired"));
        }

        match client.refresh_usage {
            RefreshTokenUsage::OneTimeOnly => {
                if !state.refresh_grants.mark_consumed_once(token, now) {
                    let family = grant.family_key();
                    let removed = state.refresh_grants.revoke_family(&family);
                    tracing::warn!(client_id = %client.client_id, removed, "refresh token replay detected, revoked grant family");
                    return Err(OidcError::invalid_grant("refresh token has already been used"));
                }
            }
            RefreshTokenUsage::ReUse => {
                if matches!(client.refresh_expiration, RefreshTokenExpiration::Sliding) {
                    state.refresh_grants.touch_sliding(
                        token,
                        now,
                        tenant_sliding_secs(client),
                    );
                }
            }
        }

        let user = state
            .users
            .find_by_subject(&tenant.id, &grant.subject_id)
            .await
            .ok_or_else(|| OidcError::invalid_grant("user for this refresh token no longer exists"))?;
        if !user.active {
            return Err(OidcError::invalid_grant("user account is disabled"));
        }
        if !client.allows_user(&user.subject_id, &user.roles_vec()) {
            return Err(OidcError::invalid_grant("user is not permitted to use this client"));
        }

        let scopes = narrow_scopes(param(params, "scope"), &grant.scopes)?;

        let claims = if client.update_claims_on_refresh {
            state.users.claims_for_scopes(&user, &scopes)
        } else {
            grant.claims_snapshot.clone()
        };

        let auth_method = amr_from_claims(&claims);
        let mut outcome = TokenOutcome::simple(Some(grant.subject_id.clone()), scopes, claims);
        outcome.session_id = grant.session_id.clone();
        outcome.auth_method = auth_method;
        outcome.issue_id_token = true;
        outcome.issue_refresh_token = true;
        outcome.refresh_usage = client.refresh_usage;
        outcome.refresh_expiration = client.refresh_expiration;
        Ok(outcome)
    }
}

fn tenant_sliding_secs(client: &Client) -> i64 {
    client.lifetimes.refresh_token_sliding_secs as i64
}

// ── client_credentials ───────────────────────────────────────────────────

struct ClientCredentialsGrant;

#[async_trait]
impl GrantHandler for ClientCredentialsGrant {
    async fn handle(
        &self,
        _state: &AppState,
        _tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError> {
        const IDENTITY_SCOPES: &[&str] = &["openid", "profile", "email", "phone", "offline_access"];
        let default_scopes: Vec<String> = client
            .allowed_scopes
            .iter()
            .filter(|s| !IDENTITY_SCOPES.contains(&s.as_str()))
            .cloned()
            .collect();
        let scopes = narrow_scopes(param(params, "scope"), &default_scopes)?;
        Ok(TokenOutcome::simple(None, scopes, Claims::new()))
    }
}

// ── device_code ───────────────────────────────────────────────────────────

struct DeviceCodeGrant;

#[async_trait]
impl GrantHandler for DeviceCodeGrant {
    async fn handle(
        &self,
        state: &AppState,
        tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError> {
        let device_code = require_param(params, "device_code")?;
        let entry = state
            .device_codes
            .get_by_device_code(device_code)
            .ok_or_else(OidcError::expired_token)?;

        if entry.tenant_id != tenant.id || entry.client_id != client.client_id {
            return Err(OidcError::invalid_grant("device code was not issued to this client"));
        }

        let now = state.clock.now();
        if entry.is_expired(now) {
            state.device_codes.remove(device_code);
            return Err(OidcError::expired_token());
        }

        match entry.status {
            DeviceCodeStatus::Pending => Err(OidcError::authorization_pending()),
            DeviceCodeStatus::Denied => {
                state.device_codes.remove(device_code);
                Err(OidcError::access_denied("the user denied the authorization request"))
            }
            DeviceCodeStatus::Authorized => {
                let claimed = state
                    .device_codes
                    .claim_for_issuance(device_code)
                    .ok_or_else(|| OidcError::invalid_grant("device code token has already been issued"))?;
                state.device_codes.remove(device_code);

                let subject_id = claimed
                    .subject_id
                    .ok_or_else(|| OidcError::server_error("authorized device code missing subject_id"))?;
                let user = state
                    .users
                    .find_by_subject(&tenant.id, &subject_id)
                    .await
                    .ok_or_else(|| OidcError::invalid_grant("user for this device code no longer exists"))?;
                if !user.active {
                    return Err(OidcError::invalid_grant("user account is disabled"));
                }

                let mut claims = state.users.claims_for_scopes(&user, &claimed.scopes);
                for (k, v) in &claimed.claims_snapshot {
                    claims.entry(k.clone()).or_insert_with(|| v.clone());
                }

                let auth_method = amr_from_claims(&claims);
                let mut outcome = TokenOutcome::simple(Some(subject_id), claimed.scopes, claims);
                outcome.session_id = claimed.session_id;
                outcome.auth_method = auth_method;
                outcome.issue_id_token = true;
                outcome.issue_refresh_token = client.allows_grant_type("refresh_token");
                outcome.refresh_usage = client.refresh_usage;
                outcome.refresh_expiration = client.refresh_expiration;
                Ok(outcome)
            }
        }
    }
}

// ── password (ROPC) ───────────────────────────────────────────────────────

struct PasswordGrant;

#[async_trait]
impl GrantHandler for PasswordGrant {
    async fn handle(
        &self,
        state: &AppState,
        tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError> {
        let username = require_param(params, "username")?;
        let password = require_param(params, "password")?;

        if !state.users.verify_password(&tenant.id, username, password).await {
            // Never disclose whether the username exists (§7).
            return Err(OidcError::invalid_grant("invalid username or password"));
        }
        let user = state
            .users
            .find_by_username(&tenant.id, username)
            .await
            .ok_or_else(|| OidcError::invalid_grant("invalid username or password"))?;
        if !user.active {
            return Err(OidcError::invalid_grant("user account is disabled"));
        }
        if !client.allows_user(&user.subject_id, &user.roles_vec()) {
            return Err(OidcError::invalid_grant("user is not permitted to use this client"));
        }

        let scopes = narrow_scopes(param(params, "scope"), &client.allowed_scopes.iter().cloned().collect::<Vec<_>>())?;
        let claims = state.users.claims_for_scopes(&user, &scopes);

        let mut outcome = TokenOutcome::simple(Some(user.subject_id), scopes, claims);
        outcome.issue_id_token = true;
        outcome.issue_refresh_token = client.allows_grant_type("refresh_token");
        outcome.refresh_usage = client.refresh_usage;
        outcome.refresh_expiration = client.refresh_expiration;
        Ok(outcome)
    }
}

// ── CIBA ──────────────────────────────────────────────────────────────────

/// Status of a backchannel authentication request, reported by whatever
/// polls the out-of-band authenticator. Modeled as a capability so a real
/// deployment can plug in its own backchannel notifier (push/SMS/email) —
/// the backchannel transport itself is out of scope (§1).
#[async_trait]
pub trait CibaService: Send + Sync {
    async fn poll(&self, tenant_id: &str, client_id: &str, auth_req_id: &str) -> CibaStatus;
}

pub enum CibaStatus {
    Pending,
    Denied,
    Expired,
    Consumed,
    Approved { subject_id: String, scopes: Vec<String> },
}

struct CibaGrant;

#[async_trait]
impl GrantHandler for CibaGrant {
    async fn handle(
        &self,
        state: &AppState,
        tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError> {
        let auth_req_id = require_param(params, "auth_req_id")?;
        let Some(ciba) = state.config.ciba_service.as_ref() else {
            return Err(OidcError::unsupported_grant_type("CIBA is not configured for this deployment"));
        };

        match ciba.poll(&tenant.id, &client.client_id, auth_req_id).await {
            CibaStatus::Pending => Err(OidcError::authorization_pending()),
            CibaStatus::Denied => Err(OidcError::access_denied("the user denied the authorization request")),
            CibaStatus::Expired => Err(OidcError::expired_token()),
            CibaStatus::Consumed => Err(OidcError::invalid_grant("auth_req_id has already been used")),
            CibaStatus::Approved { subject_id, scopes } => {
                let user = state
                    .users
                    .find_by_subject(&tenant.id, &subject_id)
                    .await
                    .ok_or_else(|| OidcError::invalid_grant("user for this request no longer exists"))?;
                let claims = state.users.claims_for_scopes(&user, &scopes);
                let mut outcome = TokenOutcome::simple(Some(subject_id), scopes, claims);
                outcome.issue_id_token = true;
                outcome.issue_refresh_token = client.allows_grant_type("refresh_token");
                outcome.refresh_usage = client.refresh_usage;
                outcome.refresh_expiration = client.refresh_expiration;
                Ok(outcome)
            }
        }
    }
}

// ── token exchange (RFC 8693) ────────────────────────────────────────────

struct TokenExchangeGrant;

#[async_trait]
impl GrantHandler for TokenExchangeGrant {
    async fn handle(
        &self,
        state: &AppState,
        tenant: &Tenant,
        client: &Client,
        params: &HashMap<String, String>,
    ) -> Result<TokenOutcome, OidcError> {
        let subject_token = require_param(params, "subject_token")?;
        let subject_claims = decode_own_token(state, tenant, subject_token)?;

        let subject_id = subject_claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| OidcError::invalid_grant("subject_token missing 'sub' claim"))?
            .to_string();

        let subject_scopes: Vec<String> = subject_claims
            .get("scope")
            .and_then(Value::as_str)
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let scopes = narrow_scopes(param(params, "scope"), &subject_scopes)?;

        let act = if let Some(actor_token) = param(params, "actor_token") {
            let actor_claims = decode_own_token(state, tenant, actor_token)?;
            let actor_sub = actor_claims
                .get("sub")
                .and_then(Value::as_str)
                .ok_or_else(|| OidcError::invalid_grant("actor_token missing 'sub' claim"))?;
            let previous_act = actor_claims.get("act").cloned();
            Some(crate::token::TokenService::build_act_claim(actor_sub, previous_act))
        } else {
            None
        };

        let user = state.users.find_by_subject(&tenant.id, &subject_id).await;
        let claims = match &user {
            Some(user) => state.users.claims_for_scopes(user, &scopes),
            None => Claims::new(),
        };

        let mut outcome = TokenOutcome::simple(Some(subject_id), scopes, claims);
        outcome.act = act;
        let _ = client;
        Ok(outcome)
    }
}

/// Validate a bearer token this server itself issued, for use as a
/// token-exchange `subject_token`/`actor_token` (§4.6: reuses the same
/// signing keys used for issuance rather than a separate trust store).
fn decode_own_token(state: &AppState, tenant: &Tenant, token: &str) -> Result<Claims, OidcError> {
    let header = jsonwebtoken::decode_header(token)
        .map_err(|e| OidcError::invalid_grant(format!("malformed token: {e}")))?;
    let kid = header
        .kid
        .ok_or_else(|| OidcError::invalid_grant("token is missing a 'kid' header"))?;

    let snapshot = state.keys.snapshot(&tenant.id);
    let entry = snapshot
        .find(&kid)
        .ok_or_else(|| OidcError::invalid_grant("token was not signed by a known key for this tenant"))?;

    // Audience is the presenting client, not the exchanging one, and isn't
    // knowable here — signature/expiry is what "this server issued it" means.
    let mut validation = jsonwebtoken::Validation::new(header.alg);
    validation.validate_aud = false;

    let data = jsonwebtoken::decode::<Claims>(token, &entry.material.decoding_key, &validation)
        .map_err(|e| OidcError::invalid_grant(format!("token signature invalid or expired: {e}")))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_scopes_rejects_scope_escalation() {
        let allowed = vec!["openid".to_string(), "profile".to_string()];
        assert!(narrow_scopes(Some("openid email"), &allowed).is_err());
        assert!(narrow_scopes(Some("openid"), &allowed).is_ok());
        assert_eq!(narrow_scopes(None, &allowed).unwrap(), allowed);
    }

    #[test]
    fn builtin_registry_has_all_nine_grant_types() {
        let registry = GrantRegistry::with_builtins();
        assert!(registry.get("authorization_code").is_some());
        assert!(registry.get("refresh_token").is_some());
        assert!(registry.get("client_credentials").is_some());
        assert!(registry.get("urn:ietf:params:oauth:grant-type:device_code").is_some());
        assert!(registry.get("password").is_some());
        assert!(registry.get("urn:openid:params:grant-type:ciba").is_some());
        assert!(registry.get("urn:ietf:params:oauth:grant-type:token-exchange").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn extension_grant_can_be_registered() {
        struct Noop;
        #[async_trait]
        impl GrantHandler for Noop {
            async fn handle(
                &self,
                _state: &AppState,
                _tenant: &Tenant,
                _client: &Client,
                _params: &HashMap<String, String>,
            ) -> Result<TokenOutcome, OidcError> {
                Ok(TokenOutcome::simple(None, vec![], Claims::new()))
            }
        }
        let registry = GrantRegistry::with_builtins().register("urn:example:custom", Box::new(Noop));
        assert!(registry.get("urn:example:custom").is_some());
    }
}
