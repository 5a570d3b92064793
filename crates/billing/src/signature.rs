//! Webhook signature verification
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=...][,v0=...]`. The
//! signed payload is `"<t>.<raw body>"`, keyed by the endpoint secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `"<timestamp>.<payload>"`
pub fn compute_signature(payload: &str, timestamp: i64, secret: &str) -> BillingResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::Config("Invalid webhook secret".to_string()))?;
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a signature header against the raw delivery body.
///
/// `now` is unix seconds; deliveries older or newer than `tolerance_secs`
/// are rejected.
pub fn verify_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        if let Some((key, value)) = part.trim().split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => candidates.push(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::VerificationFailed("Missing timestamp in signature header".to_string())
    })?;

    if candidates.is_empty() {
        tracing::warn!("Missing v1 signature in signature header");
        return Err(BillingError::VerificationFailed(
            "Missing v1 signature in signature header".to_string(),
        ));
    }

    if (now - timestamp).abs() > tolerance_secs {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            diff = (now - timestamp).abs(),
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::VerificationFailed(
            "Webhook timestamp outside tolerance".to_string(),
        ));
    }

    let expected = compute_signature(payload, timestamp, secret)?;
    let matched = candidates
        .iter()
        .any(|candidate| bool::from(expected.as_bytes().ct_eq(candidate.as_bytes())));

    if !matched {
        tracing::warn!("Webhook signature mismatch");
        return Err(BillingError::VerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }

    Ok(())
}
