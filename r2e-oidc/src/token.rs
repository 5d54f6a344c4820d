//! Token minting: access tokens, ID tokens, and the claims assembly rules
//! in §4.2 (nonce, profile-derived claims, claims snapshot, `act`
//! delegation chaining for token exchange).

use std::sync::Arc;

use jsonwebtoken::{encode, Algorithm, Header};
use serde_json::{json, Value};

use crate::domain::{Claims, Clock, SigningAlgorithm};
use crate::error::OidcError;
use crate::keys::KeyRegistry;

#[derive(Clone)]
pub struct TokenService {
    keys: KeyRegistry,
    clock: Arc<dyn Clock>,
}

fn jsonwebtoken_algorithm(alg: SigningAlgorithm) -> Algorithm {
    match alg {
        SigningAlgorithm::Rs256 => Algorithm::RS256,
        SigningAlgorithm::Es256 => Algorithm::ES256,
    }
}

impl TokenService {
    pub fn new(keys: KeyRegistry, clock: Arc<dyn Clock>) -> Self {
        Self { keys, clock }
    }

    fn sign(&self, tenant_id: &str, claims: &Value) -> Result<String, OidcError> {
        let snapshot = self.keys.snapshot(tenant_id);
        let active = snapshot
            .active()
            .ok_or_else(|| OidcError::server_error("no active signing key for tenant"))?;

        let mut header = Header::new(jsonwebtoken_algorithm(active.material.algorithm));
        header.kid = Some(active.meta.key_id.clone());

        encode(&header, claims, &active.material.encoding_key)
            .map_err(|e| OidcError::server_error(format!("failed to sign token: {e}")))
    }

    /// Mint a bearer or DPoP-bound access token. `cnf_jkt` embeds the DPoP
    /// key thumbprint (§4.6) when the client requires proof-of-possession.
    pub fn mint_access_token(
        &self,
        tenant_id: &str,
        issuer: &str,
        subject: &str,
        client_id: &str,
        scopes: &[String],
        lifetime_secs: u64,
        claims: &Claims,
        cnf_jkt: Option<&str>,
        act: Option<Value>,
    ) -> Result<(String, i64), OidcError> {
        let now = self.clock.now();
        let exp = now + lifetime_secs as i64;

        let mut body = json!({
            "iss": issuer,
            "sub": subject,
            "aud": client_id,
            "client_id": client_id,
            "iat": now,
            "exp": exp,
            "scope": scopes.join(" "),
        });
        merge_claims(&mut body, claims);
        if let Some(jkt) = cnf_jkt {
            body["cnf"] = json!({ "jkt": jkt });
        }
        if let Some(act) = act {
            body["act"] = act;
        }

        let token = self.sign(tenant_id, &body)?;
        Ok((token, exp))
    }

    /// Mint an OIDC ID token. `amr` is the authentication-method-reference
    /// set by the journey's `set_authenticated` call (§4.4's
    /// authentication-state contract).
    #[allow(clippy::too_many_arguments)]
    pub fn mint_id_token(
        &self,
        tenant_id: &str,
        issuer: &str,
        subject: &str,
        client_id: &str,
        nonce: Option<&str>,
        auth_time: Option<i64>,
        amr: Option<&[String]>,
        acr: Option<&str>,
        lifetime_secs: u64,
        claims: &Claims,
    ) -> Result<String, OidcError> {
        let now = self.clock.now();
        let exp = now + lifetime_secs as i64;

        let mut body = json!({
            "iss": issuer,
            "sub": subject,
            "aud": client_id,
            "iat": now,
            "exp": exp,
        });
        if let Some(nonce) = nonce {
            body["nonce"] = json!(nonce);
        }
        if let Some(auth_time) = auth_time {
            body["auth_time"] = json!(auth_time);
        }
        if let Some(amr) = amr {
            body["amr"] = json!(amr);
        }
        if let Some(acr) = acr {
            body["acr"] = json!(acr);
        }
        merge_claims(&mut body, claims);

        self.sign(tenant_id, &body)
    }

    /// Build (or extend) the `act` delegation-chain claim for token
    /// exchange: `act:{sub: actor_subject, act: previous_act?}` (§4.2,
    /// scenario 6).
    pub fn build_act_claim(actor_subject: &str, previous_act: Option<Value>) -> Value {
        let mut act = json!({ "sub": actor_subject });
        if let Some(previous) = previous_act {
            act["act"] = previous;
        }
        act
    }
}

/// Merge claims into `body`, never letting caller-supplied claims clobber
/// registered/reserved claim names (§7: never echo user-controlled data
/// into protected positions).
fn merge_claims(body: &mut Value, claims: &Claims) {
    const RESERVED: &[&str] = &[
        "iss", "sub", "aud", "iat", "exp", "nbf", "scope", "client_id", "cnf", "act", "nonce",
        "auth_time", "amr", "acr",
    ];
    let Value::Object(map) = body else { return };
    for (k, v) in claims {
        if RESERVED.contains(&k.as_str()) {
            tracing::warn!(claim = %k, "ignoring reserved claim name in claims snapshot");
            continue;
        }
        map.insert(k.clone(), v.clone());
    }
}
