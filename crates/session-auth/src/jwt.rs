//! JWT expiry decoding
//!
//! The client never verifies signatures; it only reads the `exp` claim to
//! decide whether a credential is still worth attaching. Anything that does
//! not decode to a numeric `exp` yields `None`, which callers treat as
//! expired.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    exp: Option<serde_json::Number>,
}

/// Decode the `exp` claim (seconds since the unix epoch) from a JWT.
///
/// Returns `None` for tokens without a payload segment, payloads that are
/// not base64url JSON objects, and missing, negative or non-numeric `exp`.
pub fn expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.exp?;
    exp.as_u64().or_else(|| {
        exp.as_f64()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| secs as u64)
    })
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
