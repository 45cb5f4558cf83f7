//! Gateway webhook authentication.
//!
//! The signature header has the form `t=<unix seconds>,v1=<hex hmac>[,v1=...]`
//! and the HMAC-SHA256 is computed over `"{t}.{raw body}"`.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

use super::PaymentIntent;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;
pub const PAYMENT_SUCCEEDED_EVENT: &str = "payment_intent.succeeded";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature verification failed")]
    Mismatch,
    #[error("invalid webhook secret configuration")]
    InvalidSecret,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: PaymentIntent,
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=').ok_or(SignatureError::Malformed)?;
        match key {
            "t" => timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?),
            // Unknown schemes (v0 test signatures) are ignored; bad hex is not.
            "v1" => signatures.push(hex::decode(value).map_err(|_| SignatureError::Malformed)?),
            _ => {}
        }
    }

    match timestamp {
        Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
            timestamp,
            signatures,
        }),
        _ => Err(SignatureError::Malformed),
    }
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verifies `header` against `payload` using constant-time comparison.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_header(header)?;

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let mac = mac_for(secret, parsed.timestamp, payload)?;
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

/// Produces a header value the way the gateway does. Used by tests and tooling.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> Result<String, SignatureError> {
    let mac = mac_for(secret, timestamp, payload)?;
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;

    #[test]
    fn accepts_valid_signature() {
        let header = sign_payload(SECRET, BODY, 1_700_000_000).unwrap();
        assert!(verify_signature(SECRET, BODY, &header, 1_700_000_010, DEFAULT_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn accepts_when_any_v1_matches() {
        let good = sign_payload(SECRET, BODY, 1_700_000_000).unwrap();
        let good_sig = good.split("v1=").nth(1).unwrap();
        let header = format!("t=1700000000,v1={},v1={}", "00".repeat(32), good_sig);
        assert!(verify_signature(SECRET, BODY, &header, 1_700_000_000, DEFAULT_TOLERANCE_SECS).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_payload(SECRET, BODY, 1_700_000_000).unwrap();
        let result = verify_signature(SECRET, b"{}", &header, 1_700_000_000, DEFAULT_TOLERANCE_SECS);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign_payload("whsec_other", BODY, 1_700_000_000).unwrap();
        let result = verify_signature(SECRET, BODY, &header, 1_700_000_000, DEFAULT_TOLERANCE_SECS);
        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign_payload(SECRET, BODY, 1_700_000_000).unwrap();
        let result = verify_signature(SECRET, BODY, &header, 1_700_001_000, DEFAULT_TOLERANCE_SECS);
        assert_eq!(result, Err(SignatureError::Expired));
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", "t=abc,v1=00", "v1=00", "t=1700000000", "t=1700000000,v1=zz"] {
            assert_eq!(
                verify_signature(SECRET, BODY, header, 1_700_000_000, DEFAULT_TOLERANCE_SECS),
                Err(SignatureError::Malformed),
                "header {:?}",
                header
            );
        }
    }
}
