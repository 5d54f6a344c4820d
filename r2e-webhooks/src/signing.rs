//! HMAC-SHA256 request signing (§4.5): `X-Webhook-Signature =
//! sha256=hex(HMAC_SHA256(endpoint_secret, timestamp + "." + body))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Sign `body` for delivery at `timestamp` (unix seconds), returning the
/// `sha256=...` header value.
pub fn sign(secret: &str, timestamp: i64, body: &str) -> String {
    let signed = format!("{timestamp}.{body}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(signed.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received `X-Webhook-Signature` value against the expected one,
/// in constant time. Receivers are expected to do the equivalent of this;
/// exposed here so the delivery's own retry logging can sanity-check a
/// configured secret without shelling out to a receiver.
pub fn verify(secret: &str, timestamp: i64, body: &str, signature: &str) -> bool {
    let expected = sign(secret, timestamp, body);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}
