//! Webhook signature verification (HMAC-SHA256).
//!
//! The header carries a timestamp and one or more signatures:
//! `t=1700000000,v1=5257a869...`. Each `v1` is the hex HMAC of
//! `"{t}.{raw body}"` under the shared secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::FulfillmentError;

/// Maximum accepted distance between the signed timestamp and now.
pub const TOLERANCE_SECS: i64 = 300;

/// Verifies a signature header against the raw request body.
///
/// `now` is a unix timestamp; events outside [`TOLERANCE_SECS`] are
/// rejected to block replays of captured requests.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), FulfillmentError> {
    let invalid = |reason: &str| FulfillmentError::InvalidSignature(reason.to_string());

    if secret.is_empty() {
        return Err(invalid("webhook secret not configured"));
    }

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }

    let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(invalid("missing v1 signature"));
    }

    let ts: i64 = timestamp.parse().map_err(|_| invalid("invalid timestamp"))?;
    if (now - ts).abs() > TOLERANCE_SECS {
        return Err(invalid("timestamp outside tolerance"));
    }

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| invalid("HMAC key error"))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = signatures.iter().any(|sig| {
        hex::decode(sig)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });
    if matched {
        Ok(())
    } else {
        Err(invalid("signature mismatch"))
    }
}

/// Produces a signature header for `payload`; used by tests and local tooling.
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, FulfillmentError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| FulfillmentError::InvalidSignature("HMAC key error".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}
