//! Cryptographic utilities for webhook verification.
//!
//! Stripe signs each delivery with `Stripe-Signature: t=<unix>,v1=<hex>[,v1=...]`
//! where each `v1` is HMAC-SHA256 over `"<t>.<raw body>"` keyed by the
//! endpoint secret. Several `v1` entries appear while a secret is rolled.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Why a webhook signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// No signature header on the request.
    #[error("missing signature header")]
    MissingHeader,

    /// Header present but lacks a timestamp or any `v1` entry.
    #[error("malformed signature header")]
    Malformed,

    /// Signed timestamp is too far from the current time.
    #[error("signature timestamp outside tolerance")]
    TimestampOutOfTolerance,

    /// No `v1` entry matches the expected signature.
    #[error("signature mismatch")]
    Mismatch,

    /// The secret could not key the MAC.
    #[error("invalid signing key")]
    InvalidKey,
}

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Errors
///
/// Returns `SignatureError::InvalidKey` if the MAC rejects the key.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify a `Stripe-Signature` header against the raw payload.
///
/// `tolerance_seconds` bounds the distance between the signed timestamp and
/// `now` (Unix seconds); zero disables the check. Returns the signed
/// timestamp on success.
///
/// # Errors
///
/// Returns a `SignatureError` describing the first failed check.
pub fn verify_stripe_signature(
    secret: &str,
    payload: &str,
    header: Option<&str>,
    tolerance_seconds: u64,
    now: i64,
) -> Result<i64, SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;

    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let signed_at: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    if tolerance_seconds > 0 && now.abs_diff(signed_at) > tolerance_seconds {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))?;
    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(signed_at)
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header value for a payload.
///
/// Used by tests and local tooling to produce deliveries the verifier accepts.
///
/// # Errors
///
/// Returns `SignatureError::InvalidKey` if the MAC rejects the key.
pub fn sign_stripe_payload(
    secret: &str,
    payload: &str,
    timestamp: i64,
) -> Result<String, SignatureError> {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))?;
    Ok(format!("t={timestamp},v1={signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn hmac_sha256_produces_correct_length() {
        let result =
            hmac_sha256_hex("key", "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(result.len(), 64); // SHA256 = 32 bytes = 64 hex chars
        assert_eq!(
            result,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn constant_time_eq_different_strings() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }

    #[test]
    fn signed_payload_verifies() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign_stripe_payload(SECRET, payload, NOW).unwrap();
        assert_eq!(
            verify_stripe_signature(SECRET, payload, Some(&header), 300, NOW + 10),
            Ok(NOW)
        );
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let payload = "{}";
        let good = hmac_sha256_hex(SECRET, &format!("{NOW}.{payload}")).unwrap();
        let header = format!("t={NOW},v1=deadbeef,v1={good}");
        assert!(verify_stripe_signature(SECRET, payload, Some(&header), 300, NOW).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let header = sign_stripe_payload(SECRET, r#"{"amount":1}"#, NOW).unwrap();
        assert_eq!(
            verify_stripe_signature(SECRET, r#"{"amount":9}"#, Some(&header), 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign_stripe_payload("whsec_other", "{}", NOW).unwrap();
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", Some(&header), 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let header = sign_stripe_payload(SECRET, "{}", NOW - 301).unwrap();
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", Some(&header), 300, NOW),
            Err(SignatureError::TimestampOutOfTolerance)
        );
        assert!(verify_stripe_signature(SECRET, "{}", Some(&header), 0, NOW).is_ok());
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", None, 300, NOW),
            Err(SignatureError::MissingHeader)
        );
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", Some("v1=abc"), 300, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", Some(&format!("t={NOW}")), 300, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_stripe_signature(SECRET, "{}", Some("t=abc,v1=abc"), 300, NOW),
            Err(SignatureError::Malformed)
        );
    }
}
