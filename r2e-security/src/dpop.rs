//! DPoP (RFC 9449) proof-of-possession validation.
//!
//! A DPoP proof is a JWT of type `dpop+jwt`, signed by a key embedded in its
//! own header (`jwk`), that binds a request to that key: `htm`/`htu` pin the
//! method and URL, `iat` bounds the proof's freshness, and `jti` is a
//! single-use nonce the caller must not replay.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use r2e_cache::TtlCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug)]
pub enum DpopError {
    Missing,
    Malformed(String),
    WrongType,
    BadSignature(String),
    MethodMismatch,
    UrlMismatch,
    Expired,
    NotYetValid,
    Replayed,
    NonceRequired,
    NonceMismatch,
    UnsupportedKeyType(String),
}

impl std::fmt::Display for DpopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DpopError::Missing => write!(f, "missing DPoP proof"),
            DpopError::Malformed(m) => write!(f, "malformed DPoP proof: {m}"),
            DpopError::WrongType => write!(f, "DPoP proof is not typ=dpop+jwt"),
            DpopError::BadSignature(m) => write!(f, "DPoP signature invalid: {m}"),
            DpopError::MethodMismatch => write!(f, "DPoP htm does not match request method"),
            DpopError::UrlMismatch => write!(f, "DPoP htu does not match request URL"),
            DpopError::Expired => write!(f, "DPoP proof iat too old"),
            DpopError::NotYetValid => write!(f, "DPoP proof iat in the future"),
            DpopError::Replayed => write!(f, "DPoP jti already used"),
            DpopError::NonceRequired => write!(f, "server-issued DPoP nonce required"),
            DpopError::NonceMismatch => write!(f, "DPoP nonce does not match or has expired"),
            DpopError::UnsupportedKeyType(k) => write!(f, "unsupported DPoP JWK key type: {k}"),
        }
    }
}

impl std::error::Error for DpopError {}

/// Claims carried by a validated DPoP proof.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DpopClaims {
    pub htm: String,
    pub htu: String,
    pub iat: i64,
    pub jti: String,
    #[serde(default)]
    pub ath: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// A validated DPoP proof: the claims plus the thumbprint of the key that
/// signed it (`cnf.jkt`), which the server binds to issued access tokens.
#[derive(Debug, Clone)]
pub struct DpopProof {
    pub claims: DpopClaims,
    pub jkt: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddedJwk {
    kty: String,
    #[serde(default)]
    crv: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
    #[serde(default)]
    x: Option<String>,
    #[serde(default)]
    y: Option<String>,
}

#[derive(Deserialize)]
struct DpopHeader {
    typ: Option<String>,
    alg: String,
    jwk: EmbeddedJwk,
}

/// Validates DPoP proofs per RFC 9449, tracking replay of `jti` and, when
/// configured, server-issued nonces via TTL caches.
pub struct DpopValidator {
    clock_skew_secs: i64,
    jti_window: TtlCache<String, ()>,
    nonces: TtlCache<String, String>,
}

impl DpopValidator {
    /// `acceptance_window` bounds both the `iat` skew tolerated and the
    /// window a `jti` is remembered for replay detection (§4.2: "the
    /// acceptance window").
    pub fn new(acceptance_window: std::time::Duration) -> Self {
        Self {
            clock_skew_secs: acceptance_window.as_secs() as i64,
            jti_window: TtlCache::new(acceptance_window),
            nonces: TtlCache::new(std::time::Duration::from_secs(300)),
        }
    }

    /// Issue a fresh server nonce bound to `client_id`, valid until it is
    /// consumed or the TTL cache evicts it.
    pub fn issue_nonce(&self, client_id: &str) -> String {
        let nonce = uuid::Uuid::new_v4().to_string();
        self.nonces.insert(client_id.to_string(), nonce.clone());
        nonce
    }

    /// Validate a DPoP proof JWT against the given HTTP method and URL.
    ///
    /// `required_nonce` is `Some(client_id)` when the server previously
    /// issued a nonce to this client and now requires it to be echoed back.
    pub fn validate(
        &self,
        proof_jwt: &str,
        method: &str,
        url: &str,
        required_nonce_for: Option<&str>,
    ) -> Result<DpopProof, DpopError> {
        let header_b64 = proof_jwt
            .split('.')
            .next()
            .ok_or_else(|| DpopError::Malformed("no header segment".into()))?;
        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| DpopError::Malformed(e.to_string()))?;
        let header: DpopHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| DpopError::Malformed(e.to_string()))?;

        if header.typ.as_deref() != Some("dpop+jwt") {
            return Err(DpopError::WrongType);
        }

        let (decoding_key, algorithm, jkt) = decoding_key_for(&header.jwk)?;

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let data = decode::<DpopClaims>(proof_jwt, &decoding_key, &validation)
            .map_err(|e| DpopError::BadSignature(e.to_string()))?;
        let claims = data.claims;

        if claims.htm.to_ascii_uppercase() != method.to_ascii_uppercase() {
            return Err(DpopError::MethodMismatch);
        }
        if normalize_url(&claims.htu) != normalize_url(url) {
            return Err(DpopError::UrlMismatch);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs() as i64;
        if claims.iat > now + self.clock_skew_secs {
            return Err(DpopError::NotYetValid);
        }
        if now - claims.iat > self.clock_skew_secs {
            return Err(DpopError::Expired);
        }

        if !self.jti_window.put_if_absent(claims.jti.clone(), ()) {
            return Err(DpopError::Replayed);
        }

        if let Some(client_id) = required_nonce_for {
            let expected = self.nonces.get(&client_id.to_string());
            match (&claims.nonce, expected) {
                (Some(got), Some(want)) if *got == want => {
                    self.nonces.remove(&client_id.to_string());
                }
                (None, Some(_)) => return Err(DpopError::NonceRequired),
                _ => return Err(DpopError::NonceMismatch),
            }
        }

        Ok(DpopProof { claims, jkt })
    }
}

fn normalize_url(u: &str) -> String {
    // RFC 9449 compares htu ignoring query and fragment.
    u.split(['?', '#']).next().unwrap_or(u).trim_end_matches('/').to_string()
}

/// Build a `DecodingKey` from an embedded JWK and compute its RFC 7638
/// thumbprint (`jkt`), the value bound into `cnf.jkt` on issued tokens.
fn decoding_key_for(jwk: &EmbeddedJwk) -> Result<(DecodingKey, Algorithm, String), DpopError> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_deref()
                .ok_or_else(|| DpopError::Malformed("RSA jwk missing n".into()))?;
            let e = jwk
                .e
                .as_deref()
                .ok_or_else(|| DpopError::Malformed("RSA jwk missing e".into()))?;
            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|err| DpopError::BadSignature(err.to_string()))?;
            let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
            Ok((key, Algorithm::RS256, thumbprint(&canonical)))
        }
        "EC" => {
            let x = jwk
                .x
                .as_deref()
                .ok_or_else(|| DpopError::Malformed("EC jwk missing x".into()))?;
            let y = jwk
                .y
                .as_deref()
                .ok_or_else(|| DpopError::Malformed("EC jwk missing y".into()))?;
            let crv = jwk.crv.as_deref().unwrap_or("P-256");
            let key = DecodingKey::from_ec_components(x, y)
                .map_err(|err| DpopError::BadSignature(err.to_string()))?;
            let canonical = format!(r#"{{"crv":"{crv}","kty":"EC","x":"{x}","y":"{y}"}}"#);
            Ok((key, Algorithm::ES256, thumbprint(&canonical)))
        }
        other => Err(DpopError::UnsupportedKeyType(other.to_string())),
    }
}

fn thumbprint(canonical_json: &str) -> String {
    let digest = Sha256::digest(canonical_json.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::traits::PublicKeyParts;
    use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};

    #[test]
    fn normalize_url_strips_query_and_trailing_slash() {
        assert_eq!(
            normalize_url("https://rs.example/resource/?a=1#frag"),
            normalize_url("https://rs.example/resource")
        );
    }

    #[test]
    fn thumbprint_is_deterministic() {
        let a = thumbprint(r#"{"e":"AQAB","kty":"RSA","n":"abc"}"#);
        let b = thumbprint(r#"{"e":"AQAB","kty":"RSA","n":"abc"}"#);
        assert_eq!(a, b);
    }

    fn b64url(bytes: &[u8]) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    fn now() -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
    }

    /// Builds a signed `dpop+jwt` proof with the given key embedded in its
    /// header, the shape `DpopValidator::validate` expects to verify.
    fn build_proof(
        key: &RsaPrivateKey,
        pubkey: &RsaPublicKey,
        htm: &str,
        htu: &str,
        iat: i64,
        jti: &str,
        nonce: Option<&str>,
    ) -> String {
        let n = b64url(&pubkey.n().to_bytes_be());
        let e = b64url(&pubkey.e().to_bytes_be());
        let header = serde_json::json!({
            "typ": "dpop+jwt",
            "alg": "RS256",
            "jwk": { "kty": "RSA", "n": n, "e": e },
        });
        let mut claims = serde_json::json!({ "htm": htm, "htu": htu, "iat": iat, "jti": jti });
        if let Some(nonce) = nonce {
            claims["nonce"] = serde_json::json!(nonce);
        }
        let signing_input = format!("{}.{}", b64url(header.to_string().as_bytes()), b64url(claims.to_string().as_bytes()));
        let digest = Sha256::digest(signing_input.as_bytes());
        let signature = key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).expect("rsa signing succeeds");
        format!("{signing_input}.{}", b64url(&signature))
    }

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).expect("key generation succeeds");
        let pubkey = RsaPublicKey::from(&key);
        (key, pubkey)
    }

    #[test]
    fn validates_a_well_formed_proof_and_returns_its_thumbprint() {
        let (key, pubkey) = test_keypair();
        let proof = build_proof(&key, &pubkey, "POST", "https://as.example/connect/token", now(), "jti-1", None);
        let validator = DpopValidator::new(std::time::Duration::from_secs(60));

        let result = validator.validate(&proof, "POST", "https://as.example/connect/token", None).unwrap();
        assert_eq!(result.claims.jti, "jti-1");
        assert!(!result.jkt.is_empty());
    }

    #[test]
    fn rejects_a_replayed_jti() {
        let (key, pubkey) = test_keypair();
        let proof = build_proof(&key, &pubkey, "POST", "https://as.example/connect/token", now(), "jti-replay", None);
        let validator = DpopValidator::new(std::time::Duration::from_secs(60));

        validator.validate(&proof, "POST", "https://as.example/connect/token", None).unwrap();
        let second = validator.validate(&proof, "POST", "https://as.example/connect/token", None);
        assert!(matches!(second, Err(DpopError::Replayed)));
    }

    #[test]
    fn rejects_htm_mismatch() {
        let (key, pubkey) = test_keypair();
        let proof = build_proof(&key, &pubkey, "GET", "https://as.example/connect/token", now(), "jti-2", None);
        let validator = DpopValidator::new(std::time::Duration::from_secs(60));

        let result = validator.validate(&proof, "POST", "https://as.example/connect/token", None);
        assert!(matches!(result, Err(DpopError::MethodMismatch)));
    }

    #[test]
    fn rejects_htu_mismatch() {
        let (key, pubkey) = test_keypair();
        let proof = build_proof(&key, &pubkey, "POST", "https://as.example/connect/token", now(), "jti-3", None);
        let validator = DpopValidator::new(std::time::Duration::from_secs(60));

        let result = validator.validate(&proof, "POST", "https://as.example/connect/userinfo", None);
        assert!(matches!(result, Err(DpopError::UrlMismatch)));
    }

    #[test]
    fn rejects_a_forged_signature() {
        let (key, pubkey) = test_keypair();
        let mut proof = build_proof(&key, &pubkey, "POST", "https://as.example/connect/token", now(), "jti-4", None);
        // Corrupt the signature segment so it no longer verifies against the
        // embedded public key.
        proof.push('A');
        let validator = DpopValidator::new(std::time::Duration::from_secs(60));

        let result = validator.validate(&proof, "POST", "https://as.example/connect/token", None);
        assert!(matches!(result, Err(DpopError::BadSignature(_))));
    }

    #[test]
    fn nonce_challenge_is_required_and_consumed_once() {
        let (key, pubkey) = test_keypair();
        let validator = DpopValidator::new(std::time::Duration::from_secs(60));
        let nonce = validator.issue_nonce("client-1");

        let proof = build_proof(
            &key,
            &pubkey,
            "POST",
            "https://as.example/connect/token",
            now(),
            "jti-5",
            Some(&nonce),
        );
        let result = validator.validate(&proof, "POST", "https://as.example/connect/token", Some("client-1"));
        assert!(result.is_ok());

        // The nonce was consumed; the same challenge value is rejected on
        // another (freshly jti'd) proof.
        let replay_proof = build_proof(
            &key,
            &pubkey,
            "POST",
            "https://as.example/connect/token",
            now(),
            "jti-6",
            Some(&nonce),
        );
        let second = validator.validate(&replay_proof, "POST", "https://as.example/connect/token", Some("client-1"));
        assert!(matches!(second, Err(DpopError::NonceMismatch)));
    }

    #[test]
    fn missing_nonce_is_rejected_when_required() {
        let (key, pubkey) = test_keypair();
        let validator = DpopValidator::new(std::time::Duration::from_secs(60));
        validator.issue_nonce("client-2");

        let proof = build_proof(&key, &pubkey, "POST", "https://as.example/connect/token", now(), "jti-7", None);
        let result = validator.validate(&proof, "POST", "https://as.example/connect/token", Some("client-2"));
        assert!(matches!(result, Err(DpopError::NonceRequired)));
    }
}
