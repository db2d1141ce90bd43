//! `Rail-Signature` header verification
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac-sha256>[,v1=...]`, the MAC
//! taken over `"{t}.{raw body}"` with the endpoint's shared secret. Several
//! `v1` entries may be present while a secret is being rolled.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::WebhookError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Rail-Signature";

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    WebhookError::InvalidSignature("malformed timestamp".to_string())
                })?);
            }
            "v1" => {
                // undecodable entries are ignored; another v1 may still match
                if let Ok(sig) = hex::decode(value) {
                    signatures.push(sig);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| WebhookError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(WebhookError::InvalidSignature(
            "no v1 signature".to_string(),
        ));
    }
    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

fn mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(format!("HMAC init failed: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verify `header` against `payload`.
///
/// `now` is unix seconds; events signed more than `tolerance_secs` away from
/// it are rejected as replays. The comparison is constant-time.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), WebhookError> {
    let parsed = parse_header(header)?;

    // `t` is unauthenticated and may be any i64
    let tolerance = u64::try_from(tolerance_secs).unwrap_or(0);
    if now.abs_diff(parsed.timestamp) > tolerance {
        return Err(WebhookError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    for candidate in &parsed.signatures {
        if mac(secret, parsed.timestamp, payload)?
            .verify_slice(candidate)
            .is_ok()
        {
            return Ok(());
        }
    }
    Err(WebhookError::InvalidSignature(
        "no matching signature".to_string(),
    ))
}

/// Build a header value for `payload` signed at `timestamp`
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let digest = mac(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
}
