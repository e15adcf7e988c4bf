//! Provider webhook signatures.
//!
//! Header format: `ts=<unix seconds>;h1=<hex hmac>[;h1=<hex hmac>...]`. The
//! MAC is HMAC-SHA256 over `"{ts}:{raw body}"`. Several `h1` entries may be
//! present while the provider rotates secrets; any match is accepted.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "paddle-signature";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("malformed signature header: {0}")]
    Malformed(String),
    #[error("signature timestamp {0} outside the accepted window")]
    Expired(i64),
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParsedSignature {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

pub fn parse_header(header: &str) -> Result<ParsedSignature, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| SignatureError::Malformed(format!("expected key=value, got {part:?}")))?;
        match key {
            "ts" => {
                let ts = value
                    .parse::<i64>()
                    .map_err(|_| SignatureError::Malformed(format!("bad timestamp {value:?}")))?;
                timestamp = Some(ts);
            }
            "h1" => {
                let sig = hex::decode(value)
                    .map_err(|_| SignatureError::Malformed("h1 is not hex".to_string()))?;
                signatures.push(sig);
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| SignatureError::Malformed("missing ts".to_string()))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("missing h1".to_string()));
    }

    Ok(ParsedSignature {
        timestamp,
        signatures,
    })
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::Malformed("unusable secret".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b":");
    mac.update(body);
    Ok(mac)
}

/// Header value a provider would send for `body` at `timestamp`.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let signature = mac_for(secret, timestamp, body)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default();
    format!("ts={timestamp};h1={signature}")
}

/// Verifies `header` against `body`. `max_age` of `None` disables the
/// timestamp window.
pub fn verify(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
    max_age: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header.ok_or(SignatureError::Missing)?)?;

    if let Some(max_age) = max_age {
        let age = (now.timestamp() - parsed.timestamp).unsigned_abs();
        if age > max_age.as_secs() {
            return Err(SignatureError::Expired(parsed.timestamp));
        }
    }

    let mac = mac_for(secret, parsed.timestamp, body)?;
    let matched = parsed
        .signatures
        .iter()
        .any(|candidate| mac.clone().verify_slice(candidate).is_ok());

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
