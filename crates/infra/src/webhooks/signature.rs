//! HubSpot webhook signature verification
//!
//! The signature header carries the hex-encoded HMAC-SHA256 of the raw
//! request body keyed with the app secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `raw_body` under `secret`.
pub fn compute_signature(secret: &str, raw_body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(raw_body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Whether `header` is the signature of `raw_body` under `secret`.
///
/// The comparison is constant-time. Malformed hex never matches.
pub fn verify_signature(secret: &str, raw_body: &[u8], header: &str) -> bool {
    let Ok(expected) = hex::decode(header.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    mac.verify_slice(&expected).is_ok()
}
