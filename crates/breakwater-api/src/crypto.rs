//! Webhook signature verification.
//!
//! Computes HMAC-SHA256 over the raw request body and compares against
//! the header value in constant time. Verification fails closed: a
//! missing secret, malformed header, or mismatch all reject the request.
//! The raw body must be used; re-serializing the JSON can change byte
//! layout and invalidate a legitimate signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature verification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Signature header missing or empty.
    #[error("signature header missing")]
    MissingSignature,

    /// Signature header did not match any supported format.
    #[error("invalid signature format: {0}")]
    InvalidFormat(String),

    /// Signature did not match the payload.
    #[error("signature mismatch")]
    Mismatch,

    /// No usable secret was configured.
    #[error("signing secret missing or invalid")]
    InvalidSecret,
}

/// Verifies a webhook signature against the raw payload.
///
/// Supported header formats, covering common providers:
/// - `sha256=<hex>` (GitHub style)
/// - `v1=<hex>` (Stripe style)
/// - `<hex>` (raw 64-character hex)
///
/// # Errors
///
/// Returns a [`SignatureError`] describing why verification failed; any
/// error means the request must be rejected.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> Result<(), SignatureError> {
    if signature.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    if secret.is_empty() {
        return Err(SignatureError::InvalidSecret);
    }

    let provided_hex = parse_signature_format(signature)?;
    let expected_hex = sign_payload(payload, secret)?;

    if constant_time_eq(provided_hex.as_bytes(), expected_hex.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Computes the HMAC-SHA256 of a payload as lowercase hex.
///
/// This is the value a legitimate sender would place in the signature
/// header; exposed for tests and for signing outbound test fixtures.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the key is rejected.
pub fn sign_payload(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Extracts the hex digest from a signature header.
fn parse_signature_format(signature: &str) -> Result<String, SignatureError> {
    if let Some(hex) = signature.strip_prefix("sha256=") {
        return Ok(hex.to_string());
    }

    if let Some(hex) = signature.strip_prefix("v1=") {
        return Ok(hex.to_string());
    }

    if signature.len() == 64 && signature.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(signature.to_string());
    }

    Err(SignatureError::InvalidFormat(
        "expected 'sha256=<hex>', 'v1=<hex>', or raw hex".to_string(),
    ))
}

/// Constant-time comparison over same-length byte strings.
///
/// Every byte is inspected regardless of where the first difference
/// occurs, so verification time does not reveal how close a forged
/// signature came.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }

    diff == 0
}
