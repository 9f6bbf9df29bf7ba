//! HMAC-SHA256 verification of webhook deliveries.
//!
//! The source-control host signs the raw request body with the repository's
//! shared secret and sends the result as `sha256=<hex-digest>` in the
//! `X-Hub-Signature-256` header.

use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::instrument;

type HmacSha256 = Hmac<Sha256>;

/// Prefix of every signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute the signature header value for `payload` signed with `secret`.
///
/// Returns `sha256=` followed by the lowercase hex digest.
pub fn compute_signature(payload: &[u8], secret: &str) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(payload);

    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a delivery signature.
///
/// Returns `false` when the header is absent or empty. Otherwise the expected
/// `sha256=<hex>` string is compared with the header in constant time, so the
/// comparison does not leak how many leading characters matched.
#[instrument(skip(payload, secret, signature_header), fields(payload_len = payload.len()))]
pub fn verify(payload: &[u8], secret: &str, signature_header: Option<&str>) -> bool {
    let signature = match signature_header {
        Some(s) if !s.is_empty() => s,
        _ => return false,
    };

    let expected = match compute_signature(payload, secret) {
        Ok(expected) => expected,
        Err(_) => return false,
    };

    // `ct_eq` on slices of different lengths returns false without inspecting
    // the contents; the expected length is public anyway.
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
