//! Per-tenant signing keys and JWKS publication (§4.7).
//!
//! Key material lives behind a [`KeyMaterialProvider`]; the rest of the
//! crate only ever sees a [`SigningKeySet`] snapshot. Rotation swaps the
//! `Arc` behind a `RwLock` so in-flight token issuance and JWKS reads never
//! observe a half-rotated set, matching §5's "readers hold an immutable
//! snapshot, writers swap the pointer."

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;

use crate::domain::{SigningAlgorithm, SigningKeyMeta, SigningKeyStatus};

#[derive(Debug)]
pub enum KeyError {
    UnsupportedAlgorithm(SigningAlgorithm),
    Generation(String),
    Persistence(String),
    NotFound(String),
}

impl std::fmt::Display for KeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyError::UnsupportedAlgorithm(alg) => write!(f, "unsupported signing algorithm: {alg:?}"),
            KeyError::Generation(m) => write!(f, "key generation failed: {m}"),
            KeyError::Persistence(m) => write!(f, "key persistence failed: {m}"),
            KeyError::NotFound(kid) => write!(f, "no key material for kid {kid}"),
        }
    }
}

impl std::error::Error for KeyError {}

/// Live key material for signing and verification. Cheap to clone — the
/// inner `jsonwebtoken` keys are themselves reference-counted internally.
#[derive(Clone)]
pub struct KeyMaterial {
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
    pub algorithm: SigningAlgorithm,
    /// Base64url RSA modulus/exponent, used to build the JWKS entry.
    n: String,
    e: String,
}

/// Generates and persists signing key material. The local implementation
/// backs onto PEM files on disk; an external-KMS implementation is a
/// documented extension point (DESIGN.md) and out of scope here per §1's
/// Non-goals around SQL/ORM/KMS wiring.
pub trait KeyMaterialProvider: Send + Sync {
    fn generate(&self, kid: &str, algorithm: SigningAlgorithm) -> Result<KeyMaterial, KeyError>;
    fn load(&self, kid: &str) -> Result<KeyMaterial, KeyError>;
}

/// Persists RSA private keys as PKCS8 PEM files under `base_dir`, one file
/// per `kid`. File permissions are restricted to the owner on unix; this is
/// a development/self-hosted posture, not a substitute for a real KMS.
pub struct LocalFileKeyProvider {
    base_dir: std::path::PathBuf,
}

impl LocalFileKeyProvider {
    pub fn new(base_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, kid: &str) -> std::path::PathBuf {
        self.base_dir.join(format!("{kid}.pem"))
    }

    fn material_from_private_key(
        private_key: RsaPrivateKey,
    ) -> Result<KeyMaterial, KeyError> {
        let public_key = RsaPublicKey::from(&private_key);
        let pkcs8_pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(pkcs8_pem.as_bytes())
            .map_err(|e| KeyError::Generation(e.to_string()))?;

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        let decoding_key = DecodingKey::from_rsa_components(&n, &e)
            .map_err(|e| KeyError::Generation(e.to_string()))?;

        Ok(KeyMaterial {
            encoding_key,
            decoding_key,
            algorithm: SigningAlgorithm::Rs256,
            n,
            e,
        })
    }
}

impl KeyMaterialProvider for LocalFileKeyProvider {
    fn generate(&self, kid: &str, algorithm: SigningAlgorithm) -> Result<KeyMaterial, KeyError> {
        if algorithm != SigningAlgorithm::Rs256 {
            return Err(KeyError::UnsupportedAlgorithm(algorithm));
        }
        let private_key =
            RsaPrivateKey::new(&mut OsRng, 2048).map_err(|e| KeyError::Generation(e.to_string()))?;

        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| KeyError::Persistence(e.to_string()))?;
        let pem = private_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| KeyError::Persistence(e.to_string()))?;
        let path = self.path_for(kid);
        std::fs::write(&path, pem.as_bytes()).map_err(|e| KeyError::Persistence(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::material_from_private_key(private_key)
    }

    fn load(&self, kid: &str) -> Result<KeyMaterial, KeyError> {
        let path = self.path_for(kid);
        let pem = std::fs::read_to_string(&path)
            .map_err(|_| KeyError::NotFound(kid.to_string()))?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| KeyError::Persistence(e.to_string()))?;
        Self::material_from_private_key(private_key)
    }
}

/// One signing key's metadata paired with its live material.
#[derive(Clone)]
pub struct KeyEntry {
    pub meta: SigningKeyMeta,
    pub material: KeyMaterial,
}

/// An immutable, atomically-published view of a tenant's signing keys.
/// Token issuance signs with [`Self::active`]; JWKS publishes
/// [`Self::jwks`].
#[derive(Clone, Default)]
pub struct SigningKeySet {
    entries: Vec<KeyEntry>,
}

impl SigningKeySet {
    pub fn new(entries: Vec<KeyEntry>) -> Self {
        Self { entries }
    }

    /// The key currently used to sign new tokens: the `Active` key with the
    /// highest `rotation_priority`.
    pub fn active(&self) -> Option<&KeyEntry> {
        self.entries
            .iter()
            .filter(|e| e.meta.status == SigningKeyStatus::Active)
            .max_by_key(|e| e.meta.rotation_priority)
    }

    pub fn find(&self, kid: &str) -> Option<&KeyEntry> {
        self.entries.iter().find(|e| e.meta.key_id == kid)
    }

    /// §4.7: JWKS includes every key flagged `include_in_jwks` that hasn't
    /// been fully retired, so verifiers can validate tokens signed by a
    /// recently-expired key during its overlap window.
    pub fn jwks(&self, now: i64) -> JwksResponse {
        let keys = self
            .entries
            .iter()
            .filter(|e| {
                e.meta.include_in_jwks
                    && e.meta.status != SigningKeyStatus::Revoked
                    && e.meta.jwks_retire_at.map(|t| now < t).unwrap_or(true)
            })
            .map(|e| JwkEntry {
                kty: "RSA",
                alg: "RS256",
                r#use: "sig",
                kid: e.meta.key_id.clone(),
                n: e.material.n.clone(),
                e: e.material.e.clone(),
            })
            .collect();
        JwksResponse { keys }
    }

    pub fn with_entry(&self, entry: KeyEntry) -> Self {
        let mut entries = self.entries.clone();
        entries.retain(|e| e.meta.key_id != entry.meta.key_id);
        entries.push(entry);
        Self { entries }
    }

    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }
}

#[derive(Serialize)]
pub struct JwksResponse {
    pub keys: Vec<JwkEntry>,
}

#[derive(Serialize)]
pub struct JwkEntry {
    pub kty: &'static str,
    pub alg: &'static str,
    #[serde(rename = "use")]
    pub r#use: &'static str,
    pub kid: String,
    pub n: String,
    pub e: String,
}

/// Registry of per-tenant signing key snapshots. Readers call
/// [`Self::snapshot`] once and use that `Arc` for the lifetime of a single
/// request; [`Self::publish`] is the only write path, used by rotation.
#[derive(Clone, Default)]
pub struct KeyRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<SigningKeySet>>>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, tenant_id: &str) -> Arc<SigningKeySet> {
        self.inner
            .read()
            .expect("key registry lock poisoned")
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn publish(&self, tenant_id: &str, set: SigningKeySet) {
        self.inner
            .write()
            .expect("key registry lock poisoned")
            .insert(tenant_id.to_string(), Arc::new(set));
    }
}

/// Shared state for the periodic rotation task.
#[derive(Clone)]
pub struct RotationState {
    pub registry: KeyRegistry,
    pub provider: Arc<dyn KeyMaterialProvider>,
    pub tenant_ids: Vec<String>,
    pub active_lifetime_secs: i64,
    pub retire_overlap_secs: i64,
    pub clock: Arc<dyn crate::domain::Clock>,
}

/// Build a scheduled task that, on each tick, ensures every tenant has a
/// `Pending` key ready to take over, promotes a due `Pending` key to
/// `Active`, and retires the previously-`Active` key with a JWKS overlap
/// window so in-flight tokens it signed keep validating (§4.7, §5).
pub fn rotation_task(
    state: RotationState,
    schedule: r2e_scheduler::ScheduleConfig,
) -> r2e_scheduler::ScheduledTaskDef<RotationState> {
    r2e_scheduler::ScheduledTaskDef {
        name: "oidc-signing-key-rotation".to_string(),
        schedule,
        state,
        task: Box::new(|state: RotationState| {
            Box::pin(async move {
                for tenant_id in &state.tenant_ids {
                    if let Err(err) = rotate_tenant(&state, tenant_id) {
                        tracing::error!(tenant_id, error = %err, "signing key rotation failed");
                    }
                }
            })
        }),
    }
}

fn rotate_tenant(state: &RotationState, tenant_id: &str) -> Result<(), KeyError> {
    let now = state.clock.now();
    let current = state.registry.snapshot(tenant_id);

    let pending = current
        .entries()
        .iter()
        .find(|e| e.meta.status == SigningKeyStatus::Pending)
        .cloned();

    let mut next = (*current).clone();

    let due_for_promotion = pending
        .as_ref()
        .map(|p| now >= p.meta.created_at)
        .unwrap_or(false);

    if due_for_promotion {
        let promoted_kid = pending.as_ref().unwrap().meta.key_id.clone();
        if let Some(previous_active) = current.active() {
            let mut retired = previous_active.clone();
            retired.meta.status = SigningKeyStatus::Expired;
            retired.meta.jwks_retire_at = Some(now + state.retire_overlap_secs);
            next = next.with_entry(retired);
        }
        if let Some(mut promoted) = pending {
            promoted.meta.status = SigningKeyStatus::Active;
            next = next.with_entry(promoted);
        }
        tracing::info!(tenant_id, kid = %promoted_kid, "promoted signing key to active");
    }

    let has_pending = next
        .entries()
        .iter()
        .any(|e| e.meta.status == SigningKeyStatus::Pending);
    if !has_pending {
        let kid = uuid::Uuid::new_v4().to_string();
        let material = state.provider.generate(&kid, SigningAlgorithm::Rs256)?;
        let meta = SigningKeyMeta {
            key_id: kid.clone(),
            tenant_id: tenant_id.to_string(),
            algorithm: SigningAlgorithm::Rs256,
            status: SigningKeyStatus::Pending,
            include_in_jwks: true,
            rotation_priority: next.entries().iter().map(|e| e.meta.rotation_priority).max().unwrap_or(0) + 1,
            created_at: now + state.active_lifetime_secs,
            jwks_retire_at: None,
        };
        next = next.with_entry(KeyEntry { meta, material });
        tracing::info!(tenant_id, kid, "generated pending signing key for next rotation");
    }

    state.registry.publish(tenant_id, next);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SystemClock;

    fn meta(kid: &str, status: SigningKeyStatus, priority: i32) -> SigningKeyMeta {
        SigningKeyMeta {
            key_id: kid.to_string(),
            tenant_id: "t1".into(),
            algorithm: SigningAlgorithm::Rs256,
            status,
            include_in_jwks: true,
            rotation_priority: priority,
            created_at: 0,
            jwks_retire_at: None,
        }
    }

    fn material(provider: &LocalFileKeyProvider, kid: &str) -> KeyMaterial {
        provider.generate(kid, SigningAlgorithm::Rs256).unwrap()
    }

    #[test]
    fn active_is_highest_priority_active_key() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFileKeyProvider::new(dir.path());
        let set = SigningKeySet::new(vec![
            KeyEntry { meta: meta("k1", SigningKeyStatus::Active, 1), material: material(&provider, "k1") },
            KeyEntry { meta: meta("k2", SigningKeyStatus::Active, 2), material: material(&provider, "k2") },
            KeyEntry { meta: meta("k3", SigningKeyStatus::Pending, 3), material: material(&provider, "k3") },
        ]);
        assert_eq!(set.active().unwrap().meta.key_id, "k2");
    }

    #[test]
    fn jwks_excludes_revoked_and_retired_keys() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFileKeyProvider::new(dir.path());
        let mut retired = meta("k1", SigningKeyStatus::Expired, 1);
        retired.jwks_retire_at = Some(100);
        let set = SigningKeySet::new(vec![
            KeyEntry { meta: retired, material: material(&provider, "k1") },
            KeyEntry { meta: meta("k2", SigningKeyStatus::Revoked, 2), material: material(&provider, "k2") },
            KeyEntry { meta: meta("k3", SigningKeyStatus::Active, 3), material: material(&provider, "k3") },
        ]);
        let jwks = set.jwks(200);
        assert_eq!(jwks.keys.len(), 1);
        assert_eq!(jwks.keys[0].kid, "k3");
    }

    #[test]
    fn local_provider_round_trips_key_material() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalFileKeyProvider::new(dir.path());
        provider.generate("k1", SigningAlgorithm::Rs256).unwrap();
        assert!(provider.load("k1").is_ok());
        assert!(provider.load("missing").is_err());
    }

    #[test]
    fn rotation_generates_pending_then_promotes_when_due() {
        let dir = tempfile::tempdir().unwrap();
        let provider: Arc<dyn KeyMaterialProvider> = Arc::new(LocalFileKeyProvider::new(dir.path()));
        let registry = KeyRegistry::new();
        let state = RotationState {
            registry: registry.clone(),
            provider,
            tenant_ids: vec!["t1".to_string()],
            active_lifetime_secs: 0,
            retire_overlap_secs: 3600,
            clock: Arc::new(SystemClock),
        };

        rotate_tenant(&state, "t1").unwrap();
        let first = registry.snapshot("t1");
        assert!(first.entries().iter().any(|e| e.meta.status == SigningKeyStatus::Pending));

        rotate_tenant(&state, "t1").unwrap();
        let second = registry.snapshot("t1");
        assert!(second.active().is_some());
    }
}
