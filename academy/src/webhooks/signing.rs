//! HMAC-SHA256 verification for Standard Webhooks.
//!
//! Standard Webhooks uses the following signature scheme:
//! - Signature is computed over: `{msg_id}.{timestamp}.{payload}`
//! - The signature is base64-encoded HMAC-SHA256
//! - Headers include: `webhook-id`, `webhook-timestamp`, `webhook-signature`
//!
//! The email provider signs its delivery events this way (it sends the same headers with a
//! `svix-` prefix, which are accepted too). The signature header may carry several
//! space-separated signatures during secret rotation; any one matching is enough.
//!
//! See: <https://www.standardwebhooks.com/>

use axum::http::HeaderMap;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64_STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix for webhook secrets
pub const SECRET_PREFIX: &str = "whsec_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing {0} header")]
    MissingHeader(&'static str),

    #[error("webhook timestamp is not a unix timestamp")]
    InvalidTimestamp,

    #[error("webhook timestamp is outside the accepted tolerance")]
    TimestampOutOfTolerance,

    #[error("no signature matched")]
    NoMatchingSignature,

    #[error("webhook secret is not a valid whsec_ secret")]
    InvalidSecret,
}

/// Extract the raw secret bytes from a `whsec_` prefixed secret.
///
/// Returns `None` if the secret doesn't have the correct prefix or invalid base64.
pub fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let encoded = secret.strip_prefix(SECRET_PREFIX)?;
    BASE64_STANDARD.decode(encoded).ok()
}

fn compute(msg_id: &str, timestamp: i64, payload: &[u8], key: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(format!("{msg_id}.{timestamp}.").as_bytes());
    mac.update(payload);
    Some(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Sign a webhook payload according to Standard Webhooks spec.
///
/// Returns the signature in format `v1,{base64-hmac-sha256}`, or `None` for a malformed secret.
pub fn sign_payload(msg_id: &str, timestamp: i64, payload: &str, secret: &str) -> Option<String> {
    let key = decode_secret(secret)?;
    compute(msg_id, timestamp, payload.as_bytes(), &key).map(|sig| format!("v1,{sig}"))
}

/// Verify a `webhook-signature` header value against a payload.
///
/// `signature` may hold several space-separated `v1,` entries; other versions are skipped.
pub fn verify_signature(msg_id: &str, timestamp: i64, payload: &[u8], signature: &str, secret: &str) -> bool {
    let Some(key) = decode_secret(secret) else {
        return false;
    };
    let Some(expected) = compute(msg_id, timestamp, payload, &key) else {
        return false;
    };

    signature
        .split_whitespace()
        .filter_map(|candidate| candidate.strip_prefix("v1,"))
        .any(|candidate| constant_time_eq(candidate.as_bytes(), expected.as_bytes()))
}

fn header<'a>(headers: &'a HeaderMap, name: &'static str, alias: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .or_else(|| headers.get(alias))
        .and_then(|value| value.to_str().ok())
        .ok_or(SignatureError::MissingHeader(name))
}

/// Verify a signed request: headers present, timestamp within `tolerance` of `now` (unix
/// seconds) in either direction, and at least one matching signature.
pub fn verify_headers(headers: &HeaderMap, payload: &[u8], secret: &str, tolerance: Duration, now: i64) -> Result<(), SignatureError> {
    if decode_secret(secret).is_none() {
        return Err(SignatureError::InvalidSecret);
    }

    let msg_id = header(headers, "webhook-id", "svix-id")?;
    let timestamp = header(headers, "webhook-timestamp", "svix-timestamp")?;
    let signature = header(headers, "webhook-signature", "svix-signature")?;

    let timestamp: i64 = timestamp.trim().parse().map_err(|_| SignatureError::InvalidTimestamp)?;
    if now.abs_diff(timestamp) > tolerance.as_secs() {
        return Err(SignatureError::TimestampOutOfTolerance);
    }

    if verify_signature(msg_id, timestamp, payload, signature, secret) {
        Ok(())
    } else {
        Err(SignatureError::NoMatchingSignature)
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
