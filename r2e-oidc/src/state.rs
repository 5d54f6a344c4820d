//! Shared server state: tenant/client/user registries plus every store and
//! service a handler or grant needs, aggregated behind one `Arc<AppState>`.

use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::rngs::OsRng;

use r2e_security::DpopValidator;

use crate::config::ServerConfig;
use crate::coordinator::JourneyCoordinator;
use crate::domain::{Claims, Client, Clock, Tenant, TenantResolution, User};
use crate::keys::KeyRegistry;
use crate::store::{
    CodeStore, ConsentStore, DeviceCodeStore, ParStore, ProtocolStateStore, RefreshGrantStore,
};
use crate::token::TokenService;

/// Tenant-scoped user lookup and password verification, and the "profile
/// service" that derives claims for a set of granted scopes (§4.2).
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_subject(&self, tenant_id: &str, subject_id: &str) -> Option<User>;
    async fn find_by_username(&self, tenant_id: &str, username: &str) -> Option<User>;
    async fn verify_password(&self, tenant_id: &str, username: &str, password: &str) -> bool;

    /// Standard OIDC scope-to-claims mapping: `profile`/`email`/`phone`
    /// expose the matching user attributes; `openid` contributes nothing
    /// beyond `sub` (added by the token service itself).
    fn claims_for_scopes(&self, user: &User, scopes: &[String]) -> Claims {
        let mut claims = Claims::new();
        for scope in scopes {
            match scope.as_str() {
                "profile" => {
                    claims.insert("preferred_username".into(), serde_json::json!(user.username));
                }
                "email" => {
                    if let Some(email) = &user.email {
                        claims.insert("email".into(), serde_json::json!(email));
                        claims.insert("email_verified".into(), serde_json::json!(user.email_verified));
                    }
                }
                "phone" => {
                    if let Some(phone) = &user.phone {
                        claims.insert("phone_number".into(), serde_json::json!(phone));
                    }
                }
                _ => {}
            }
        }
        for (k, v) in &user.custom_properties {
            claims.insert(k.clone(), v.clone());
        }
        claims
    }
}

/// Hash a plaintext password for storage in [`User::password_hash`].
pub fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .expect("failed to hash password")
        .to_string()
}

/// In-memory, tenant-scoped user directory. Production deployments plug in
/// their own `UserDirectory` backed by whatever persistence they use — the
/// SQL schema/ORM choice is explicitly out of scope (§1).
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<(String, String), User>,
    by_username: DashMap<(String, String), String>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        let key = (user.tenant_id.clone(), user.subject_id.clone());
        self.by_username
            .insert((user.tenant_id.clone(), user.username.clone()), user.subject_id.clone());
        self.users.insert(key, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_subject(&self, tenant_id: &str, subject_id: &str) -> Option<User> {
        self.users
            .get(&(tenant_id.to_string(), subject_id.to_string()))
            .map(|e| e.value().clone())
    }

    async fn find_by_username(&self, tenant_id: &str, username: &str) -> Option<User> {
        let subject_id = self
            .by_username
            .get(&(tenant_id.to_string(), username.to_string()))?
            .clone();
        self.find_by_subject(tenant_id, &subject_id).await
    }

    async fn verify_password(&self, tenant_id: &str, username: &str, password: &str) -> bool {
        let Some(user) = self.find_by_username(tenant_id, username).await else {
            return false;
        };
        let Some(hash) = user.password_hash else {
            return false;
        };
        let password = password.to_string();
        tokio::task::spawn_blocking(move || {
            let Ok(parsed) = PasswordHash::new(&hash) else {
                return false;
            };
            Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
        })
        .await
        .unwrap_or(false)
    }
}

/// Registry of tenants, resolvable by id or by the key their
/// [`TenantResolution`] strategy extracts from a request (subdomain, path
/// segment, or header value).
#[derive(Default)]
pub struct TenantRegistry {
    by_id: DashMap<String, Tenant>,
    by_resolution_key: DashMap<String, String>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant: Tenant) {
        self.by_resolution_key
            .insert(tenant.resolution_key.clone(), tenant.id.clone());
        self.by_id.insert(tenant.id.clone(), tenant);
    }

    pub fn get(&self, tenant_id: &str) -> Option<Tenant> {
        self.by_id.get(tenant_id).map(|e| e.value().clone())
    }

    pub fn resolve(&self, strategy: TenantResolution, key: &str) -> Option<Tenant> {
        let _ = strategy;
        let tenant_id = self.by_resolution_key.get(key)?.clone();
        self.get(&tenant_id)
    }
}

/// Registry of clients, keyed by `(tenant_id, client_id)` (§3: `client_id`
/// is only unique per tenant).
#[derive(Default)]
pub struct ClientDirectory {
    clients: DashMap<(String, String), Client>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Client) {
        self.clients
            .insert((client.tenant_id.clone(), client.client_id.clone()), client);
    }

    pub fn get(&self, tenant_id: &str, client_id: &str) -> Option<Client> {
        self.clients
            .get(&(tenant_id.to_string(), client_id.to_string()))
            .map(|e| e.value().clone())
    }
}

/// Every store and service a request handler or grant handler needs,
/// bundled so `Arc<AppState>` is the only thing axum routes thread through
/// `State<...>` (§5, §6).
pub struct AppState {
    pub config: ServerConfig,
    pub clock: Arc<dyn Clock>,
    pub tenants: TenantRegistry,
    pub clients: ClientDirectory,
    pub users: Arc<dyn UserDirectory>,
    pub codes: CodeStore,
    pub pars: ParStore,
    pub device_codes: DeviceCodeStore,
    pub refresh_grants: RefreshGrantStore,
    pub consents: ConsentStore,
    pub protocol_states: ProtocolStateStore,
    pub keys: KeyRegistry,
    pub token_service: TokenService,
    pub dpop: DpopValidator,
    pub grants: crate::grants::GrantRegistry,
    /// The journey engine, if one is wired up. Unset makes the authorize
    /// endpoint fall back to its minimal inline local-login surface (see
    /// `handlers::authorize_issue_code`). A `OnceLock` rather than a plain
    /// field because the engine typically holds an `Arc<AppState>` back to
    /// this same state (to reach `protocol_states`, `clock`, ...) — the
    /// deployment binary builds `AppState` first, wraps it in `Arc`, builds
    /// the engine from that `Arc`, then publishes it here, rather than
    /// fighting a construction-order cycle.
    pub journey: std::sync::OnceLock<Arc<dyn JourneyCoordinator>>,
}

impl AppState {
    pub fn new(config: ServerConfig, clock: Arc<dyn Clock>, users: Arc<dyn UserDirectory>) -> Self {
        let keys = KeyRegistry::new();
        let token_service = TokenService::new(keys.clone(), clock.clone());
        Self {
            codes: CodeStore::new(Duration::from_secs(config.auth_code_ttl_secs)),
            pars: ParStore::new(Duration::from_secs(config.par_ttl_secs)),
            device_codes: DeviceCodeStore::new(Duration::from_secs(config.device_code_ttl_secs)),
            refresh_grants: RefreshGrantStore::new(Duration::from_secs(config.refresh_token_max_ttl_secs)),
            consents: ConsentStore::new(Duration::from_secs(config.consent_ttl_secs)),
            protocol_states: ProtocolStateStore::new(Duration::from_secs(config.protocol_state_ttl_secs)),
            dpop: DpopValidator::new(Duration::from_secs(config.dpop_acceptance_window_secs)),
            keys,
            token_service,
            tenants: TenantRegistry::new(),
            clients: ClientDirectory::new(),
            users,
            grants: crate::grants::GrantRegistry::with_builtins(),
            journey: std::sync::OnceLock::new(),
            config,
            clock,
        }
    }

    /// Wire a journey engine in before this state is ever shared (e.g. a
    /// test harness with no coordinator/state cycle to worry about).
    pub fn with_journey_coordinator(self, coordinator: Arc<dyn JourneyCoordinator>) -> Self {
        self.set_journey_coordinator(coordinator);
        self
    }

    /// Publish the journey coordinator once this state is already behind an
    /// `Arc` — the usual path, since the coordinator itself holds an
    /// `Arc<AppState>` pointing back here. A no-op if already set.
    pub fn set_journey_coordinator(&self, coordinator: Arc<dyn JourneyCoordinator>) {
        let _ = self.journey.set(coordinator);
    }

    pub fn issuer_for(&self, tenant: &Tenant) -> String {
        format!("{}/{}", self.config.issuer_base, tenant.id)
    }
}
