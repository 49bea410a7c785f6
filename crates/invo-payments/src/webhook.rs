//! Webhook signature verification
//!
//! Stripe signs each delivery with an HMAC-SHA256 over `"{timestamp}.{body}"`
//! carried in the `stripe-signature` header as `t=<ts>,v1=<hex>,...`.
//! Verification happens against the raw body before anything is parsed;
//! a failure here never touches internal state.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Deliveries older than this are rejected even with a valid signature
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Errors from webhook handling
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// Signature header missing, malformed, expired or mismatched
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Body passed verification but is not a provider event
    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// Verify a delivery's signature header against the shared webhook secret
///
/// `now_unix` is passed in so the tolerance window is testable.
pub fn verify_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), WebhookError> {
    // Header format: t=timestamp,v1=signature,v0=signature
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature_header.split(',') {
        match part.split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => v1_signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("missing timestamp in signature header");
        WebhookError::InvalidSignature
    })?;
    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("missing v1 signature in signature header");
        WebhookError::InvalidSignature
    })?;

    if (now_unix - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(timestamp, now_unix, "webhook timestamp outside tolerance");
        return Err(WebhookError::InvalidSignature);
    }

    // The secret's "whsec_" prefix is not part of the key material
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{timestamp}.{payload}");

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::warn!("webhook signature mismatch");
        return Err(WebhookError::InvalidSignature);
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn sign_for_tests(payload: &str, secret: &str, timestamp: i64) -> String {
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
