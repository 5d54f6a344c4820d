//! Core entities from the domain model: tenants, clients, users, and the
//! short-lived artifacts the protocol layer mints and consumes.
//!
//! Every entity is a plain serde-serializable value. Relationships are by
//! opaque id looked up through a store (see [`crate::store`]), never by
//! in-memory reference — tenants, clients, users, and grants would
//! otherwise form a reference cycle.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A claims value: the claims bag has dynamic keys and heterogeneous value
/// shapes (a delegation chain's `act` claim is itself an object).
pub type Claims = HashMap<String, Value>;

/// Strategy used to resolve which tenant a request belongs to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TenantResolution {
    Subdomain,
    Path,
    Header,
}

/// Root of isolation. Every user, client, token, and audit record belongs
/// to exactly one tenant; cross-tenant reads are denied at the store layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub resolution: TenantResolution,
    /// Subdomain, path segment, or header value used to resolve this tenant,
    /// depending on `resolution`.
    pub resolution_key: String,
}

/// Refresh-token reuse policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RefreshTokenUsage {
    OneTimeOnly,
    ReUse,
}

/// Refresh-token expiration policy.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RefreshTokenExpiration {
    Absolute,
    Sliding,
}

/// Token lifetimes configured per client, in seconds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TokenLifetimes {
    pub auth_code_secs: u64,
    pub access_token_secs: u64,
    pub id_token_secs: u64,
    pub refresh_token_absolute_secs: u64,
    pub refresh_token_sliding_secs: u64,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            auth_code_secs: 300,
            access_token_secs: 3600,
            id_token_secs: 3600,
            refresh_token_absolute_secs: 60 * 60 * 24 * 30,
            refresh_token_sliding_secs: 60 * 60 * 24 * 14,
        }
    }
}

/// A relying-party registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Client {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret_hash: Option<String>,
    pub redirect_uris: HashSet<String>,
    pub allowed_scopes: HashSet<String>,
    pub allowed_grant_types: HashSet<String>,
    pub pkce_required: bool,
    /// Allows the `plain` PKCE transform method, normally disabled.
    pub pkce_plain_allowed: bool,
    pub dpop_required: bool,
    pub par_required: bool,
    pub consent_required: bool,
    pub local_login_enabled: bool,
    pub allowed_idps: HashSet<String>,
    pub allowed_users: HashSet<String>,
    pub allowed_roles: HashSet<String>,
    pub lifetimes: TokenLifetimes,
    pub refresh_usage: RefreshTokenUsage,
    pub refresh_expiration: RefreshTokenExpiration,
    pub update_claims_on_refresh: bool,
    /// journey purpose (e.g. "login", "registration") -> policy id.
    pub journey_policies: HashMap<String, String>,
}

impl Client {
    /// Byte-exact redirect URI match, per §3's invariant.
    pub fn allows_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.contains(redirect_uri)
    }

    pub fn allows_grant_type(&self, grant_type: &str) -> bool {
        self.allowed_grant_types.contains(grant_type)
    }

    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_scopes.contains(scope)
    }

    pub fn allows_user(&self, subject_id: &str, roles: &[String]) -> bool {
        let user_ok = self.allowed_users.is_empty() || self.allowed_users.contains(subject_id);
        let role_ok = self.allowed_roles.is_empty()
            || roles.iter().any(|r| self.allowed_roles.contains(r));
        user_ok && role_ok
    }

    pub fn journey_policy_for(&self, purpose: &str) -> Option<&str> {
        self.journey_policies.get(purpose).map(String::as_str)
    }
}

/// An authenticated principal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub tenant_id: String,
    pub subject_id: String,
    pub username: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password_hash: Option<String>,
    pub email_verified: bool,
    pub active: bool,
    pub roles: HashSet<String>,
    pub custom_properties: Claims,
}

impl User {
    pub fn roles_vec(&self) -> Vec<String> {
        self.roles.iter().cloned().collect()
    }
}

/// PKCE challenge method.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PkceMethod {
    Plain,
    S256,
}

/// A single-use authorization code minted at the end of a successful
/// authorize flow.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub tenant_id: String,
    pub client_id: String,
    pub subject_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<PkceMethod>,
    pub nonce: Option<String>,
    pub session_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
    pub claims_snapshot: Claims,
    pub consumed: bool,
}

impl AuthorizationCode {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// The (subject, client, session) triple shared by sibling grants —
    /// used to revoke the whole family on replay detection.
    pub fn family_key(&self) -> GrantFamilyKey {
        GrantFamilyKey {
            subject_id: self.subject_id.clone(),
            client_id: self.client_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// (subject_id, client_id, session_id) — the unit of replay revocation.
/// A `None` session_id is a distinct, non-matching value: two grants with
/// `session_id = None` are never considered part of the same family
/// (see DESIGN.md).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GrantFamilyKey {
    pub subject_id: String,
    pub client_id: String,
    pub session_id: Option<String>,
}

/// A persisted refresh-token grant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshTokenGrant {
    pub token: String,
    pub tenant_id: String,
    pub client_id: String,
    pub subject_id: String,
    pub session_id: Option<String>,
    pub scopes: Vec<String>,
    pub claims_snapshot: Claims,
    pub created_at: i64,
    pub last_used_at: i64,
    pub consumed_at: Option<i64>,
    pub absolute_expires_at: i64,
    pub sliding_expires_at: i64,
}

impl RefreshTokenGrant {
    pub fn effective_expiry(&self) -> i64 {
        self.absolute_expires_at.min(self.sliding_expires_at)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.effective_expiry()
    }

    pub fn family_key(&self) -> GrantFamilyKey {
        GrantFamilyKey {
            subject_id: self.subject_id.clone(),
            client_id: self.client_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

/// (subject_id, client_id) -> granted scopes, with expiration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub tenant_id: String,
    pub subject_id: String,
    pub client_id: String,
    pub scopes: HashSet<String>,
    pub expires_at: i64,
}

impl ConsentRecord {
    pub fn covers(&self, requested: &[String], now: i64) -> bool {
        now <= self.expires_at && requested.iter().all(|s| self.scopes.contains(s))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceCodeStatus {
    Pending,
    Authorized,
    Denied,
}

/// Device authorization grant (RFC 8628) pending/resolved state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub tenant_id: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub status: DeviceCodeStatus,
    pub subject_id: Option<String>,
    pub session_id: Option<String>,
    pub claims_snapshot: Claims,
    pub created_at: i64,
    pub expires_at: i64,
    pub interval_secs: u64,
    /// Set true the instant a poll has successfully minted a token for this
    /// code, so a second concurrent poll cannot mint twice (one-shot claim,
    /// see DESIGN.md).
    pub token_issued: bool,
}

impl DeviceCode {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

/// Pushed Authorization Request entry (RFC 9126), one-time use.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParEntry {
    pub request_uri: String,
    pub tenant_id: String,
    pub client_id: String,
    pub params: HashMap<String, String>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl ParEntry {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SigningKeyStatus {
    Pending,
    Active,
    Expired,
    Revoked,
    Archived,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SigningAlgorithm {
    Rs256,
    Es256,
}

/// Metadata for a signing key; the key material itself lives behind a
/// [`crate::keys::KeyMaterialProvider`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningKeyMeta {
    pub key_id: String,
    pub tenant_id: String,
    pub algorithm: SigningAlgorithm,
    pub status: SigningKeyStatus,
    pub include_in_jwks: bool,
    pub rotation_priority: i32,
    pub created_at: i64,
    /// When this key stops being returned by JWKS (Expired overlap window).
    pub jwks_retire_at: Option<i64>,
}

/// A journey policy reference, as the protocol layer sees it. Kept here
/// (rather than in `r2e-journey`) because clients reference policies by id
/// and the protocol layer must be able to resolve `journey_policy_for`
/// without depending on the journey engine's execution types.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JourneyPolicyRef {
    pub policy_id: String,
    pub tenant_id: String,
    pub name: String,
}

/// Stored while a journey is suspended, so that on completion the original
/// authorize request can be resumed by `correlation_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolContext {
    pub correlation_id: String,
    pub tenant_id: String,
    pub endpoint_type: ProtocolEndpoint,
    pub request: crate::authorize::AuthorizeRequest,
    pub policy_id: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProtocolEndpoint {
    Authorize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum WebhookDeliveryStatus {
    Pending,
    Succeeded,
    Failed,
    Exhausted,
}

/// Durable at-least-once webhook delivery record (see `r2e-webhooks`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: String,
    pub tenant_id: String,
    pub endpoint_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: WebhookDeliveryStatus,
    pub attempts: u32,
    pub next_retry_at: i64,
    pub response_status: Option<u16>,
    pub last_error: Option<String>,
}

/// Current wall-clock time as a unix timestamp. Centralized so tests can
/// inject a fixed clock and the rest of the crate never calls
/// `chrono::Utc::now()` directly (per spec.md §9's "inject clocks ... to
/// make tests deterministic").
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
