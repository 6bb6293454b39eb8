use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_VERSION: &str = "v0";
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("request timestamp `{0}` is not a unix time")]
    MalformedTimestamp(String),
    #[error("request timestamp is {age_secs}s away from now (limit {tolerance_secs}s)")]
    Stale { age_secs: i64, tolerance_secs: i64 },
    #[error("signature is missing the `v0=` prefix or is not hex")]
    MalformedSignature,
    #[error("signature does not match request body")]
    Mismatch,
    #[error("signing secret is empty")]
    EmptySecret,
}

/// Verifies `X-Slack-Signature` headers: `v0=` + hex HMAC-SHA256 of `v0:{timestamp}:{body}`.
#[derive(Clone, Debug)]
pub struct RequestSignatureVerifier {
    secret: SecretString,
    tolerance_secs: i64,
}

impl RequestSignatureVerifier {
    pub fn new(secret: SecretString) -> Self {
        Self { secret, tolerance_secs: DEFAULT_TOLERANCE_SECS }
    }

    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn verify(&self, timestamp: &str, body: &[u8], signature: &str) -> Result<(), SignatureError> {
        self.verify_at(timestamp, body, signature, chrono::Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        timestamp: &str,
        body: &[u8],
        signature: &str,
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let sent_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::MalformedTimestamp(timestamp.to_string()))?;
        let age_secs = (now_unix - sent_at).abs();
        if age_secs > self.tolerance_secs {
            return Err(SignatureError::Stale { age_secs, tolerance_secs: self.tolerance_secs });
        }

        let provided = signature
            .strip_prefix("v0=")
            .and_then(|digest| hex::decode(digest).ok())
            .ok_or(SignatureError::MalformedSignature)?;

        let mac = self.mac_for(timestamp.trim(), body)?;
        mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
    }

    /// Produces the header value Slack would send for this request.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let mac = self.mac_for(timestamp, body)?;
        Ok(format!("{SIGNATURE_VERSION}={}", hex::encode(mac.finalize().into_bytes())))
    }

    fn mac_for(&self, timestamp: &str, body: &[u8]) -> Result<HmacSha256, SignatureError> {
        let secret = self.secret.expose_secret();
        if secret.is_empty() {
            return Err(SignatureError::EmptySecret);
        }
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| SignatureError::EmptySecret)?;
        mac.update(SIGNATURE_VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac)
    }
}
