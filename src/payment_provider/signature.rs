//! `t=<unix>,v1=<hex hmac>` webhook signatures (HMAC-SHA256 over `"<t>.<body>"`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::ProviderError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature
pub const SIGNATURE_HEADER: &str = "stripe-signature";

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, ProviderError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ProviderError::NotConfigured(format!("webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Produces a complete signature header value for `payload`.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, ProviderError> {
    let digest = mac_for(secret, timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
}

/// Verifies a signature header against `payload`.
///
/// Any of several `v1` entries may match; the timestamp must be within
/// `tolerance_secs` of `now`.
pub fn verify(
    header: &str,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> Result<(), ProviderError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| ProviderError::InvalidSignature("missing timestamp".into()))?;
    if candidates.is_empty() {
        return Err(ProviderError::InvalidSignature("missing v1 signature".into()));
    }
    if now.abs_diff(timestamp) > tolerance_secs {
        return Err(ProviderError::InvalidSignature(
            "timestamp outside tolerance".into(),
        ));
    }

    let matched = candidates.into_iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        mac_for(secret, timestamp, payload)
            .map(|mac| mac.verify_slice(&expected).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(ProviderError::InvalidSignature("signature mismatch".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn accepts_own_signature() {
        let header = sign(SECRET, NOW, b"{\"id\":\"evt\"}").unwrap();
        assert!(verify(&header, b"{\"id\":\"evt\"}", SECRET, 300, NOW + 10).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign(SECRET, NOW, b"original").unwrap();
        assert_eq!(
            verify(&header, b"tampered", SECRET, 300, NOW),
            Err(ProviderError::InvalidSignature("signature mismatch".into()))
        );
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = sign("whsec_other", NOW, b"body").unwrap();
        assert!(verify(&header, b"body", SECRET, 300, NOW).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = sign(SECRET, NOW, b"body").unwrap();
        assert!(verify(&header, b"body", SECRET, 300, NOW + 301).is_err());
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let valid = sign(SECRET, NOW, b"body").unwrap();
        let v1 = valid.split("v1=").nth(1).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", NOW, v1);
        assert!(verify(&header, b"body", SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn rejects_malformed_headers() {
        assert!(verify("garbage", b"body", SECRET, 300, NOW).is_err());
        assert!(verify(&format!("t={}", NOW), b"body", SECRET, 300, NOW).is_err());
        assert!(verify("v1=abcd", b"body", SECRET, 300, NOW).is_err());
    }
}
