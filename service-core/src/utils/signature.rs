//! Webhook signatures in the Svix format used by the identity provider.
//!
//! Signed content is `"{msg_id}.{timestamp}.{body}"`, the key is the base64
//! payload of a `whsec_`-prefixed secret, and the signature header carries
//! one or more space-separated `v1,<base64 HMAC-SHA256>` entries.

use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";
const SIGNATURE_VERSION: &str = "v1";

fn decode_secret(secret: &str) -> Result<Vec<u8>, anyhow::Error> {
    let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret);
    STANDARD
        .decode(encoded)
        .map_err(|e| anyhow::anyhow!("Webhook secret is not valid base64: {}", e))
}

/// Compute the `v1,<signature>` entry for a payload.
pub fn sign_webhook(
    secret: &str,
    msg_id: &str,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, anyhow::Error> {
    let key = decode_secret(secret)?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(msg_id.as_bytes());
    mac.update(b".");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let digest = mac.finalize().into_bytes();
    Ok(format!("{},{}", SIGNATURE_VERSION, STANDARD.encode(digest)))
}

/// True when any `v1` entry of `signature_header` matches, compared in
/// constant time.
pub fn verify_webhook(
    secret: &str,
    msg_id: &str,
    timestamp: i64,
    payload: &[u8],
    signature_header: &str,
) -> Result<bool, anyhow::Error> {
    let expected = sign_webhook(secret, msg_id, timestamp, payload)?;
    let expected_bytes = expected.as_bytes();

    let matched = signature_header
        .split_whitespace()
        .filter(|entry| entry.starts_with("v1,"))
        .any(|entry| {
            let candidate = entry.as_bytes();
            candidate.len() == expected_bytes.len() && bool::from(candidate.ct_eq(expected_bytes))
        });

    Ok(matched)
}
