//! Client authentication (§4.2: "secret, JWT assertion, mTLS, or
//! public-client PKCE").
//!
//! Confidential clients authenticate with a hashed secret (HTTP Basic or
//! `client_secret`/`client_id` form fields); public clients authenticate
//! implicitly by presenting the PKCE verifier that matches the code
//! challenge from the authorize step. JWT-bearer and mTLS client
//! authentication are modeled as an extension point
//! ([`ClientAuthMethod::JwtAssertion`], [`ClientAuthMethod::Mtls`]) rather
//! than fully implemented — see DESIGN.md.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;

use crate::domain::Client;
use crate::error::OidcError;

/// How the client proved its identity on this request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// Confidential client, `client_secret_basic` or `client_secret_post`.
    Secret,
    /// Public client; no secret presented, relies on PKCE.
    Public,
    /// `private_key_jwt` — not implemented; see DESIGN.md.
    JwtAssertion,
    /// mTLS client certificate binding — not implemented; see DESIGN.md.
    Mtls,
}

/// Hash a plaintext client secret for storage in [`Client::client_secret_hash`].
pub fn hash_secret(secret: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .expect("failed to hash client secret")
        .to_string()
}

async fn verify_secret(hash: &str, secret: &str) -> bool {
    let hash = hash.to_string();
    let secret = secret.to_string();
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&hash) else {
            return false;
        };
        Argon2::default().verify_password(secret.as_bytes(), &parsed).is_ok()
    })
    .await
    .unwrap_or(false)
}

/// Authenticate a client against the credentials presented on a token
/// request. `client_secret` is `None` for a public client relying on PKCE;
/// the caller (the grant handler) is responsible for enforcing that public
/// clients present a PKCE verifier.
pub async fn authenticate(
    client: &Client,
    client_secret: Option<&str>,
) -> Result<ClientAuthMethod, OidcError> {
    match (&client.client_secret_hash, client_secret) {
        (Some(hash), Some(secret)) => {
            if verify_secret(hash, secret).await {
                Ok(ClientAuthMethod::Secret)
            } else {
                Err(OidcError::invalid_client("client secret does not match"))
            }
        }
        (Some(_), None) => Err(OidcError::invalid_client("client_secret is required")),
        (None, Some(_)) => Err(OidcError::invalid_client(
            "client is public and does not accept a client_secret",
        )),
        (None, None) => Ok(ClientAuthMethod::Public),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn confidential_client(secret_hash: Option<String>) -> Client {
        Client {
            tenant_id: "t1".into(),
            client_id: "c1".into(),
            client_secret_hash: secret_hash,
            redirect_uris: HashSet::new(),
            allowed_scopes: HashSet::new(),
            allowed_grant_types: HashSet::new(),
            pkce_required: false,
            pkce_plain_allowed: false,
            dpop_required: false,
            par_required: false,
            consent_required: false,
            local_login_enabled: true,
            allowed_idps: HashSet::new(),
            allowed_users: HashSet::new(),
            allowed_roles: HashSet::new(),
            lifetimes: Default::default(),
            refresh_usage: crate::domain::RefreshTokenUsage::OneTimeOnly,
            refresh_expiration: crate::domain::RefreshTokenExpiration::Absolute,
            update_claims_on_refresh: false,
            journey_policies: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn correct_secret_authenticates() {
        let client = confidential_client(Some(hash_secret("s3cret")));
        let method = authenticate(&client, Some("s3cret")).await.unwrap();
        assert_eq!(method, ClientAuthMethod::Secret);
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let client = confidential_client(Some(hash_secret("s3cret")));
        assert!(authenticate(&client, Some("wrong")).await.is_err());
    }

    #[tokio::test]
    async fn public_client_with_no_secret_is_accepted_pending_pkce() {
        let client = confidential_client(None);
        let method = authenticate(&client, None).await.unwrap();
        assert_eq!(method, ClientAuthMethod::Public);
    }

    #[tokio::test]
    async fn confidential_client_without_secret_presented_fails() {
        let client = confidential_client(Some(hash_secret("s3cret")));
        assert!(authenticate(&client, None).await.is_err());
    }
}
