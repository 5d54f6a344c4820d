//! PKCE (RFC 7636) verifier/challenge checking.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::domain::PkceMethod;

/// Verifier must be 43-128 characters of unreserved URI characters
/// (`A-Z`, `a-z`, `0-9`, `-`, `.`, `_`, `~`).
pub fn verifier_is_well_formed(verifier: &str) -> bool {
    let len = verifier.len();
    (43..=128).contains(&len)
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Verify `verifier` against `challenge` for the given `method`.
///
/// `plain` is only accepted when the caller has confirmed the client is
/// configured to allow it (`Client::pkce_plain_allowed`) — this function
/// itself just implements the byte comparison RFC 7636 specifies.
pub fn verify(method: PkceMethod, verifier: &str, challenge: &str) -> bool {
    if !verifier_is_well_formed(verifier) {
        return false;
    }
    match method {
        PkceMethod::Plain => verifier == challenge,
        PkceMethod::S256 => {
            let digest = Sha256::digest(verifier.as_bytes());
            let computed = URL_SAFE_NO_PAD.encode(digest);
            computed == challenge
        }
    }
}

pub fn parse_method(s: &str) -> Option<PkceMethod> {
    match s {
        "plain" => Some(PkceMethod::Plain),
        "S256" => Some(PkceMethod::S256),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s256_round_trip() {
        let verifier = "E9Melhoa2OwvFrEMTJguEh-RHNsdaFfnKkf56oZ3eCg0tGqg";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        assert!(verify(PkceMethod::S256, verifier, &challenge));
    }

    #[test]
    fn s256_mismatch_fails() {
        assert!(!verify(
            PkceMethod::S256,
            "E9Melhoa2OwvFrEMTJguEh-RHNsdaFfnKkf56oZ3eCg0tGqg",
            "not-the-right-challenge-00000000000000000000000"
        ));
    }

    #[test]
    fn plain_exact_match() {
        let v = "a-verifier-that-is-at-least-43-characters-long12345";
        assert!(verify(PkceMethod::Plain, v, v));
    }

    #[test]
    fn verifier_too_short_rejected() {
        assert!(!verifier_is_well_formed("short"));
    }

    #[test]
    fn verifier_with_invalid_chars_rejected() {
        let v = "a".repeat(50) + "!";
        assert!(!verifier_is_well_formed(&v));
    }
}
