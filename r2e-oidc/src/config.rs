//! Server-wide configuration: everything that is the same across tenants.
//! Per-tenant and per-client behavior (token lifetimes, allowed grants,
//! consent requirements, ...) lives on [`crate::domain::Tenant`]/
//! [`crate::domain::Client`] instead, since those vary per registration.

use std::sync::Arc;

use serde::Deserialize;

use crate::grants::CibaService;

/// Configuration for the multi-tenant OIDC server. Constructed once at
/// startup (typically from YAML/env via the host binary) and shared
/// read-only through [`crate::state::AppState`].
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    /// Issuer base URL; the per-tenant issuer is `{issuer_base}/{tenant_id}`
    /// (§3, §6).
    pub issuer_base: String,
    pub access_token_ttl_secs: u64,
    pub id_token_ttl_secs: u64,
    pub auth_code_ttl_secs: u64,
    pub par_ttl_secs: u64,
    pub device_code_ttl_secs: u64,
    pub refresh_token_max_ttl_secs: u64,
    pub consent_ttl_secs: u64,
    pub protocol_state_ttl_secs: u64,
    /// Acceptable clock skew for DPoP proof `iat` validation (§4.6).
    pub dpop_acceptance_window_secs: u64,
    /// How long a replayed grant family's revocation fan-out is retried via
    /// webhooks before giving up (see `r2e-webhooks`).
    pub key_rotation_overlap_secs: i64,

    /// Out-of-band backchannel authenticator for CIBA, if this deployment
    /// enables it. `None` means the grant type is rejected with
    /// `unsupported_grant_type` (§4.2).
    #[serde(skip)]
    pub ciba_service: Option<Arc<dyn CibaService>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            issuer_base: "https://localhost:8443".into(),
            access_token_ttl_secs: 3600,
            id_token_ttl_secs: 3600,
            auth_code_ttl_secs: 300,
            par_ttl_secs: 60,
            device_code_ttl_secs: 600,
            refresh_token_max_ttl_secs: 60 * 60 * 24 * 30,
            consent_ttl_secs: 60 * 60 * 24 * 365,
            protocol_state_ttl_secs: 1800,
            dpop_acceptance_window_secs: 60,
            key_rotation_overlap_secs: 60 * 60 * 24,
            ciba_service: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("issuer_base", &self.issuer_base)
            .field("access_token_ttl_secs", &self.access_token_ttl_secs)
            .field("id_token_ttl_secs", &self.id_token_ttl_secs)
            .field("auth_code_ttl_secs", &self.auth_code_ttl_secs)
            .field("par_ttl_secs", &self.par_ttl_secs)
            .field("device_code_ttl_secs", &self.device_code_ttl_secs)
            .field("refresh_token_max_ttl_secs", &self.refresh_token_max_ttl_secs)
            .field("consent_ttl_secs", &self.consent_ttl_secs)
            .field("protocol_state_ttl_secs", &self.protocol_state_ttl_secs)
            .field("dpop_acceptance_window_secs", &self.dpop_acceptance_window_secs)
            .field("key_rotation_overlap_secs", &self.key_rotation_overlap_secs)
            .field("ciba_service", &self.ciba_service.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_ciba_service() {
        let config = ServerConfig::default();
        assert!(config.ciba_service.is_none());
    }
}
