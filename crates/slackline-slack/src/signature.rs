// Slack request signature verification
//
// Slack signs every Events API request:
//   X-Slack-Signature = "v0=" + hex(HMAC-SHA256(secret, "v0:{timestamp}:{body}"))
// A request is accepted only when the signature matches and its timestamp is
// within five minutes of the local clock.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew between Slack and this server
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 60 * 5;

const VERSION: &str = "v0";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature headers")]
    MissingHeaders,

    #[error("invalid request timestamp")]
    InvalidTimestamp,

    #[error("request timestamp outside the accepted window")]
    StaleTimestamp,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies request signatures with the app's signing secret
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify a request against the current clock
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify_at(timestamp, signature, body, chrono::Utc::now().timestamp())
    }

    /// Verify a request against an explicit clock reading (unix seconds)
    pub fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: i64,
    ) -> Result<(), SignatureError> {
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(SignatureError::MissingHeaders);
        };

        let ts: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp)?;
        if (now - ts).abs() > MAX_TIMESTAMP_SKEW_SECS {
            return Err(SignatureError::StaleTimestamp);
        }

        let provided = signature
            .strip_prefix("v0=")
            .and_then(|hex_sig| hex::decode(hex_sig).ok())
            .ok_or(SignatureError::Mismatch)?;

        let mut mac = self.mac(timestamp.trim())?;
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| SignatureError::Mismatch)
    }

    /// Signature header value for `body` sent at `timestamp`
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        match self.mac(timestamp) {
            Ok(mut mac) => {
                mac.update(body);
                format!("{}={}", VERSION, hex::encode(mac.finalize().into_bytes()))
            }
            Err(_) => String::new(),
        }
    }

    fn mac(&self, timestamp: &str) -> Result<HmacSha256, SignatureError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SignatureError::Mismatch)?;
        mac.update(VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        Ok(mac)
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_531_420_618;
    const BODY: &[u8] = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&command=%2Fweather";

    #[test]
    fn test_known_slack_example() {
        // Example from the Slack request verification documentation
        let verifier = SignatureVerifier::new("8f742231b10e8888abcd99yyyzzz85a5");
        let body = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&team_domain=testteamnow&channel_id=G8PSS9T3V&channel_name=foobar&user_id=U2CERLKJA&user_name=roadrunner&command=%2Fwebhook-collect&text=&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2FT1DC2JH3J%2F397700885554%2F96rGlfmibIGlgcZRskXaIFfN&trigger_id=398738663015.47445629121.803a0bc887a14d10d2c447fce8b6703c";

        assert_eq!(
            verifier.verify_at(
                Some("1531420618"),
                Some("v0=a2114d57b48eac39b9ad189dd8316235a7b4a8d21a10bd27519666489c69b503"),
                body,
                NOW,
            ),
            Ok(())
        );
    }

    #[test]
    fn test_sign_then_verify() {
        let verifier = SignatureVerifier::new("secret");
        let signature = verifier.sign("1531420618", BODY);

        assert!(signature.starts_with("v0="));
        assert_eq!(
            verifier.verify_at(Some("1531420618"), Some(&signature), BODY, NOW + 10),
            Ok(())
        );
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let verifier = SignatureVerifier::new("secret");
        let signature = verifier.sign("1531420618", BODY);

        assert_eq!(
            verifier.verify_at(Some("1531420618"), Some(&signature), b"tampered", NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let signature = SignatureVerifier::new("secret").sign("1531420618", BODY);

        assert_eq!(
            SignatureVerifier::new("other").verify_at(
                Some("1531420618"),
                Some(&signature),
                BODY,
                NOW
            ),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let verifier = SignatureVerifier::new("secret");
        let signature = verifier.sign("1531420618", BODY);

        assert_eq!(
            verifier.verify_at(
                Some("1531420618"),
                Some(&signature),
                BODY,
                NOW + MAX_TIMESTAMP_SKEW_SECS + 1
            ),
            Err(SignatureError::StaleTimestamp)
        );
    }

    #[test]
    fn test_missing_and_malformed_headers() {
        let verifier = SignatureVerifier::new("secret");

        assert_eq!(
            verifier.verify_at(None, Some("v0=00"), BODY, NOW),
            Err(SignatureError::MissingHeaders)
        );
        assert_eq!(
            verifier.verify_at(Some("yesterday"), Some("v0=00"), BODY, NOW),
            Err(SignatureError::InvalidTimestamp)
        );
        assert_eq!(
            verifier.verify_at(Some("1531420618"), Some("v1=abcd"), BODY, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let debug = format!("{:?}", SignatureVerifier::new("top-secret"));
        assert!(!debug.contains("top-secret"));
    }
}
