//! HMAC-SHA256 request signing for the agent/controller channel.
//!
//! Every request from the controller to an agent carries an `X-Timestamp`
//! header and, if the host has a shared secret configured, an `X-Signature`
//! header. The signature covers the HTTP method, the normalized request
//! path, the canonical (compact) JSON body, and the timestamp, so a replayed
//! or tampered request fails verification.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Why a signature check failed.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The timestamp is further from the verifier's clock than `ttl_secs`.
    #[error("signature lifetime expired (age={age_secs}s)")]
    Expired {
        /// Absolute age of the timestamp in seconds, signed by direction of drift.
        age_secs: i64,
    },
    /// The computed signature does not match the one on the request.
    #[error("invalid signature")]
    Mismatch,
}

/// The two headers a signed request carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// Value for `X-Timestamp`: unix seconds at signing time.
    pub timestamp: i64,
    /// Value for `X-Signature`, absent when no secret is configured for the peer.
    pub signature: Option<String>,
}

/// Produce signing headers for an outbound request.
///
/// `body` is the already-serialized compact JSON body, or an empty slice
/// when the request has no body. `now` is injected rather than read from
/// the clock so callers (and tests) control it directly.
pub fn sign(secret: Option<&str>, method: &str, path: &str, body: &[u8], now: i64) -> SignedHeaders {
    let Some(secret) = secret else {
        return SignedHeaders {
            timestamp: now,
            signature: None,
        };
    };

    let signature = compute_signature(secret, method, path, body, now);
    SignedHeaders {
        timestamp: now,
        signature: Some(signature),
    }
}

/// Verify signing headers on an inbound request.
///
/// When no secret is configured for the peer, any signature (including a
/// missing one) is accepted, but the timestamp is still required to be
/// within `ttl_secs` of `now`. Comparison of the computed and presented
/// signatures is constant-time via [`hmac::Mac::verify_slice`].
pub fn verify(
    secret: Option<&str>,
    ttl_secs: i64,
    now: i64,
    timestamp: i64,
    signature: Option<&str>,
    method: &str,
    path: &str,
    body: &[u8],
) -> Result<(), SigningError> {
    let age = now - timestamp;
    if age.abs() > ttl_secs {
        return Err(SigningError::Expired { age_secs: age });
    }

    let Some(secret) = secret else {
        return Ok(());
    };

    let presented = signature.unwrap_or_default();
    let sig_bytes = signing_bytes(method, path, body, timestamp);
    let presented_bytes = BASE64.decode(presented).map_err(|_| SigningError::Mismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(&sig_bytes);
    mac.verify_slice(&presented_bytes).map_err(|_| SigningError::Mismatch)
}

/// Normalize a request path to begin with exactly one leading slash.
pub fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

fn compute_signature(secret: &str, method: &str, path: &str, body: &[u8], timestamp: i64) -> String {
    let sig_bytes = signing_bytes(method, path, body, timestamp);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(&sig_bytes);
    BASE64.encode(mac.finalize().into_bytes())
}

fn signing_bytes(method: &str, path: &str, body: &[u8], timestamp: i64) -> Vec<u8> {
    let normalized = normalize_path(path);
    let mut buf = Vec::with_capacity(method.len() + normalized.len() + body.len() + 20);
    buf.extend_from_slice(method.to_uppercase().as_bytes());
    buf.extend_from_slice(normalized.as_bytes());
    buf.extend_from_slice(body);
    buf.extend_from_slice(timestamp.to_string().as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path_adds_single_leading_slash() {
        assert_eq!(normalize_path("container/list"), "/container/list");
        assert_eq!(normalize_path("/container/list"), "/container/list");
        assert_eq!(normalize_path("//container/list"), "/container/list");
    }

    #[test]
    fn sign_without_secret_has_no_signature() {
        let headers = sign(None, "GET", "/public/health", b"", 1_700_000_000);
        assert!(headers.signature.is_none());
        assert_eq!(headers.timestamp, 1_700_000_000);
    }

    #[test]
    fn round_trip_sign_then_verify_succeeds() {
        let secret = "hunter2";
        let body = br#"{"all":true}"#;
        let headers = sign(Some(secret), "POST", "/container/list", body, 1_700_000_000);

        let result = verify(
            Some(secret),
            10,
            1_700_000_005,
            headers.timestamp,
            headers.signature.as_deref(),
            "POST",
            "/container/list",
            body,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let secret = "hunter2";
        let headers = sign(Some(secret), "GET", "/public/health", b"", 1_700_000_000);

        let result = verify(
            Some(secret),
            10,
            1_700_000_021,
            headers.timestamp,
            headers.signature.as_deref(),
            "GET",
            "/public/health",
            b"",
        );
        assert!(matches!(result, Err(SigningError::Expired { .. })));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = "hunter2";
        let headers = sign(Some(secret), "POST", "/container/create", b"{\"image\":\"a\"}", 1_700_000_000);

        let result = verify(
            Some(secret),
            10,
            1_700_000_001,
            headers.timestamp,
            headers.signature.as_deref(),
            "POST",
            "/container/create",
            b"{\"image\":\"b\"}",
        );
        assert!(matches!(result, Err(SigningError::Mismatch)));
    }

    #[test]
    fn verify_without_secret_ignores_signature_but_checks_timestamp() {
        let result = verify(None, 10, 1_700_000_005, 1_700_000_000, None, "GET", "/public/health", b"");
        assert!(result.is_ok());

        let result = verify(None, 10, 1_700_000_030, 1_700_000_000, None, "GET", "/public/health", b"");
        assert!(matches!(result, Err(SigningError::Expired { .. })));
    }

    proptest::proptest! {
        #[test]
        fn verify_accepts_whatever_sign_produces(
            secret in "[a-zA-Z0-9]{1,32}",
            method in "[A-Z]{3,6}",
            path in "[a-z/]{1,20}",
            body in proptest::collection::vec(proptest::num::u8::ANY, 0..64),
            ts in 1_600_000_000i64..1_800_000_000i64,
        ) {
            let headers = sign(Some(&secret), &method, &path, &body, ts);
            let result = verify(Some(&secret), 30, ts, headers.timestamp, headers.signature.as_deref(), &method, &path, &body);
            prop_assert!(result.is_ok());
        }
    }
}
