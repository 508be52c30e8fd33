//! Signed-webhook verification.
//!
//! Senders sign `"{id}.{timestamp}.{body}"` with HMAC-SHA256 and send three
//! headers: message id, unix timestamp, and a space-separated list of
//! `v1,<base64 signature>` entries. Both the `svix-*` and `webhook-*` header
//! families are accepted.

use std::time::Duration;

use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tracing::warn;

use crate::error::SignatureError;

type HmacSha256 = Hmac<Sha256>;

const SECRET_PREFIX: &str = "whsec_";
const DEFAULT_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Verifies signed webhook deliveries against one shared secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    key: Vec<u8>,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Build a verifier from a `whsec_<base64>` secret. Secrets without the
    /// prefix are used as raw key bytes.
    pub fn new(secret: &SecretString) -> Result<Self, SignatureError> {
        let secret = secret.expose_secret().trim();
        if secret.is_empty() {
            return Err(SignatureError::InvalidSecret);
        }
        let key = match secret.strip_prefix(SECRET_PREFIX) {
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|_| SignatureError::InvalidSecret)?,
            None => secret.as_bytes().to_vec(),
        };
        Ok(Self {
            key,
            tolerance: DEFAULT_TOLERANCE,
        })
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Verify `body` against the signature headers at the current time.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        self.verify_at(headers, body, Utc::now().timestamp())
    }

    fn verify_at(&self, headers: &HeaderMap, body: &[u8], now: i64) -> Result<(), SignatureError> {
        let id = header(headers, "id").ok_or(SignatureError::MissingHeaders)?;
        let timestamp = header(headers, "timestamp").ok_or(SignatureError::MissingHeaders)?;
        let signatures = header(headers, "signature").ok_or(SignatureError::MissingHeaders)?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;
        if now.abs_diff(ts) > self.tolerance.as_secs() {
            return Err(SignatureError::Expired);
        }

        let candidates = signatures.split_whitespace().filter_map(|entry| {
            let (version, sig) = entry.split_once(',')?;
            (version == "v1").then(|| BASE64.decode(sig).ok()).flatten()
        });

        for candidate in candidates {
            // Constant-time comparison.
            if self.mac(id, timestamp, body)?.verify_slice(&candidate).is_ok() {
                return Ok(());
            }
        }
        Err(SignatureError::Mismatch)
    }

    /// Produce a `v1,<base64>` signature for `body`.
    pub fn sign(&self, id: &str, timestamp: i64, body: &[u8]) -> Result<String, SignatureError> {
        let mac = self.mac(id, &timestamp.to_string(), body)?;
        Ok(format!("v1,{}", BASE64.encode(mac.finalize().into_bytes())))
    }

    fn mac(&self, id: &str, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).map_err(|_| SignatureError::InvalidSecret)?;
        mac.update(id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(mac)
    }
}

/// Signature policy for one webhook endpoint.
#[derive(Debug, Clone)]
pub enum WebhookAuth {
    Signed(WebhookVerifier),
    /// No secret configured and unsigned delivery explicitly allowed.
    Unsigned,
    /// No secret configured and unsigned delivery not allowed.
    Reject,
}

impl WebhookAuth {
    /// Resolve the policy from an optional secret and the unsigned-allowed flag.
    pub fn from_config(
        secret: Option<&SecretString>,
        allow_unsigned: bool,
    ) -> Result<Self, SignatureError> {
        match secret {
            Some(secret) => WebhookVerifier::new(secret).map(Self::Signed),
            None if allow_unsigned => Ok(Self::Unsigned),
            None => Ok(Self::Reject),
        }
    }

    pub fn check(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        match self {
            Self::Signed(verifier) => verifier.verify(headers, body).inspect_err(|e| {
                warn!(error = %e, "Webhook signature verification failed");
            }),
            Self::Unsigned => Ok(()),
            Self::Reject => {
                warn!("Unsigned webhook rejected: no secret configured");
                Err(SignatureError::Unsigned)
            }
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, suffix: &str) -> Option<&'a str> {
    ["svix-", "webhook-"].iter().find_map(|family| {
        headers
            .get(format!("{family}{suffix}"))
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn verifier() -> WebhookVerifier {
        let secret = format!("whsec_{}", BASE64.encode(b"super-secret-key"));
        WebhookVerifier::new(&SecretString::from(secret)).unwrap()
    }

    fn signed_headers(v: &WebhookVerifier, family: &str, ts: i64, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let sig = v.sign("msg_1", ts, body).unwrap();
        headers.insert(
            axum::http::HeaderName::from_bytes(format!("{family}-id").as_bytes()).unwrap(),
            HeaderValue::from_static("msg_1"),
        );
        headers.insert(
            axum::http::HeaderName::from_bytes(format!("{family}-timestamp").as_bytes()).unwrap(),
            HeaderValue::from_str(&ts.to_string()).unwrap(),
        );
        headers.insert(
            axum::http::HeaderName::from_bytes(format!("{family}-signature").as_bytes()).unwrap(),
            HeaderValue::from_str(&format!("v1,bm9wZQ== {sig}")).unwrap(),
        );
        headers
    }

    #[test]
    fn valid_signature_passes_for_both_header_families() {
        let v = verifier();
        let body = br#"{"type":"email.received"}"#;
        assert!(v.verify_at(&signed_headers(&v, "svix", NOW, body), body, NOW).is_ok());
        assert!(v.verify_at(&signed_headers(&v, "webhook", NOW, body), body, NOW).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let v = verifier();
        let headers = signed_headers(&v, "svix", NOW, b"original");
        assert_eq!(v.verify_at(&headers, b"tampered", NOW), Err(SignatureError::Mismatch));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let v = verifier();
        let headers = signed_headers(&v, "svix", NOW - 600, b"x");
        assert_eq!(v.verify_at(&headers, b"x", NOW), Err(SignatureError::Expired));
    }

    #[test]
    fn missing_headers_are_rejected() {
        let v = verifier();
        assert_eq!(
            v.verify_at(&HeaderMap::new(), b"x", NOW),
            Err(SignatureError::MissingHeaders)
        );
    }

    #[test]
    fn malformed_secret_is_rejected() {
        let err = WebhookVerifier::new(&SecretString::from("whsec_!!!".to_string())).unwrap_err();
        assert_eq!(err, SignatureError::InvalidSecret);
    }

    #[test]
    fn policy_without_secret() {
        let headers = HeaderMap::new();
        let unsigned = WebhookAuth::from_config(None, true).unwrap();
        assert!(unsigned.check(&headers, b"{}").is_ok());

        let reject = WebhookAuth::from_config(None, false).unwrap();
        assert_eq!(reject.check(&headers, b"{}"), Err(SignatureError::Unsigned));
    }
}
