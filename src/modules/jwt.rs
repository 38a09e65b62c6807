//! Expiry extraction from the upstream access token.
//!
//! The token is an opaque three-segment dotted structure. We only need the
//! `exp` claim out of the middle segment; the signature is minted and
//! verified by the upstream, never by us. Malformed tokens simply yield
//! `None`, which the account pool treats as "refresh proactively".

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;

/// Parse the `exp` claim (seconds since epoch) out of a bearer token.
pub fn token_expiry(token: &str) -> Option<i64> {
    let payload = payload_segment(token)?;
    let decoded = decode_segment(payload)?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_f64().map(|exp| exp as i64)
}

fn payload_segment(token: &str) -> Option<&str> {
    let mut parts = token.split('.');
    let header = parts.next()?;
    let payload = parts.next()?;
    let signature = parts.next()?;
    if parts.next().is_some() || header.is_empty() || payload.is_empty() || signature.is_empty() {
        return None;
    }
    Some(payload)
}

/// Padding-tolerant base64url decode: upstream tokens come both padded and
/// unpadded depending on the minting path.
fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine as _;

    fn make_token(claims: &serde_json::Value) -> String {
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("eyJhbGciOiJSUzI1NiJ9.{}.c2ln", payload)
    }

    #[test]
    fn test_parses_exp_claim() {
        let token = make_token(&serde_json::json!({"exp": 1999999999, "sub": "user"}));
        assert_eq!(token_expiry(&token), Some(1_999_999_999));
    }

    #[test]
    fn test_parses_fractional_exp() {
        let token = make_token(&serde_json::json!({"exp": 1999999999.5}));
        assert_eq!(token_expiry(&token), Some(1_999_999_999));
    }

    #[test]
    fn test_accepts_padded_payload() {
        let claims = serde_json::json!({"exp": 1234567890});
        let payload = URL_SAFE.encode(claims.to_string());
        let token = format!("hdr.{}.sig", payload);
        assert_eq!(token_expiry(&token), Some(1_234_567_890));
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        assert_eq!(token_expiry(""), None);
        assert_eq!(token_expiry("only-one-segment"), None);
        assert_eq!(token_expiry("a.b"), None);
        assert_eq!(token_expiry("a.b.c.d"), None);
        assert_eq!(token_expiry("a.!!!not-base64!!!.c"), None);
        // Valid base64 but not JSON.
        let token = format!("a.{}.c", URL_SAFE_NO_PAD.encode("not json"));
        assert_eq!(token_expiry(&token), None);
    }

    #[test]
    fn test_missing_exp_claim() {
        let token = make_token(&serde_json::json!({"sub": "user"}));
        assert_eq!(token_expiry(&token), None);
    }
}
