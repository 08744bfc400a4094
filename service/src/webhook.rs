//! Processor notification envelope and signature verification.
//!
//! Notifications arrive as `{"type": "...", "data": {"object": {...}}}` with a
//! `t=<unix seconds>,v1=<hex hmac>` signature header. The HMAC-SHA256 is taken
//! over `"<t>.<raw body>"` with the shared webhook secret.

use crate::checkout::BOOKING_METADATA_KEY;
use crate::config::{AppEnv, WebhookConfig};
use eventpass_core::processor::SessionPaymentStatus;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a notification was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    /// No signature header.
    #[error("Missing signature header")]
    MissingSignature,

    /// Header without a usable `t=` or `v1=` part.
    #[error("Malformed signature header")]
    MalformedSignature,

    /// Signed timestamp too far from now.
    #[error("Signature timestamp outside tolerance")]
    TimestampOutOfTolerance,

    /// No `v1` signature matched.
    #[error("Signature mismatch")]
    SignatureMismatch,

    /// Verification is on but no secret is configured.
    #[error("Webhook secret not configured")]
    MissingSecret,

    /// Body is not a notification envelope.
    #[error("Invalid notification payload: {0}")]
    Parse(String),
}

/// Reply to an accepted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Acknowledgement {
    /// Always `true`.
    pub received: bool,
}

impl Acknowledgement {
    /// The acknowledgement.
    pub const RECEIVED: Self = Self { received: true };
}

/// Verify a `t=<ts>,v1=<hex>` signature over `raw_body`.
///
/// Several `v1=` entries are allowed (secret rotation); any match passes.
///
/// # Errors
///
/// Returns the [`WebhookError`] describing the first check that failed.
pub fn verify_signature(
    raw_body: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: u64,
    now_unix: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(sig) = part.strip_prefix("v1=") {
            candidates.push(sig);
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
    if candidates.is_empty() {
        return Err(WebhookError::MalformedSignature);
    }
    let signed_at: i64 = timestamp
        .parse()
        .map_err(|_| WebhookError::MalformedSignature)?;
    if now_unix.abs_diff(signed_at) > tolerance_secs {
        return Err(WebhookError::TimestampOutOfTolerance);
    }

    let mac = keyed_mac(raw_body, timestamp, secret)?;
    let matched = candidates
        .iter()
        .filter_map(|candidate| hex::decode(candidate).ok())
        .any(|received| mac.clone().verify_slice(&received).is_ok());

    if matched {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// Build a signature header for `raw_body`, as the processor would.
///
/// # Errors
///
/// Returns [`WebhookError::MissingSecret`] if `secret` cannot key the MAC.
pub fn signature_header(raw_body: &[u8], secret: &str, timestamp: i64) -> Result<String, WebhookError> {
    let mac = keyed_mac(raw_body, &timestamp.to_string(), secret)?;
    Ok(format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes())))
}

/// MAC over `<timestamp>.<raw_body>`, not yet finalized.
fn keyed_mac(raw_body: &[u8], timestamp: &str, secret: &str) -> Result<HmacSha256, WebhookError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| WebhookError::MissingSecret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    Ok(mac)
}

/// Signature policy for inbound notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookVerifier {
    /// Check signatures with this secret.
    Verify {
        /// Shared secret.
        secret: String,
        /// Accepted clock skew in seconds.
        tolerance_secs: u64,
    },
    /// No secret configured; every notification is rejected.
    Unconfigured,
    /// Non-production only: accept without checking.
    Skip,
}

impl WebhookVerifier {
    /// Policy for `config` in `env`. Skipping is never honoured in production.
    #[must_use]
    pub fn from_config(config: &WebhookConfig, env: AppEnv) -> Self {
        match &config.secret {
            _ if config.skip_verification && !env.is_production() => Self::Skip,
            Some(secret) => Self::Verify {
                secret: secret.clone(),
                tolerance_secs: config.tolerance_secs,
            },
            None => Self::Unconfigured,
        }
    }

    /// Check a notification.
    ///
    /// # Errors
    ///
    /// Any [`WebhookError`] from [`verify_signature`], [`WebhookError::MissingSignature`]
    /// or [`WebhookError::MissingSecret`].
    pub fn verify(&self, raw_body: &[u8], signature: Option<&str>, now_unix: i64) -> Result<(), WebhookError> {
        match self {
            Self::Skip => {
                tracing::warn!("Webhook signature verification skipped");
                Ok(())
            }
            Self::Unconfigured => Err(WebhookError::MissingSecret),
            Self::Verify {
                secret,
                tolerance_secs,
            } => {
                let header = signature.ok_or(WebhookError::MissingSignature)?;
                verify_signature(raw_body, header, secret, *tolerance_secs, now_unix)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

/// Checkout session object inside a notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionObject {
    /// Session id.
    pub id: String,
    /// Payment state, when reported.
    #[serde(default)]
    pub payment_status: Option<SessionPaymentStatus>,
    /// Linked payment reference.
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Session metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Amount in minor units.
    #[serde(default)]
    pub amount_total: Option<i64>,
}

impl SessionObject {
    /// Booking reference from the metadata, verbatim.
    #[must_use]
    pub fn booking_ref(&self) -> Option<&str> {
        self.metadata.get(BOOKING_METADATA_KEY).map(String::as_str)
    }
}

/// Payment reference object inside a notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentObject {
    /// Payment reference.
    pub id: String,
    /// Payment metadata.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Amount received in minor units.
    #[serde(default)]
    pub amount_received: Option<i64>,
}

impl PaymentObject {
    /// Session id recorded in the metadata, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.metadata.get("session_id").map(String::as_str)
    }
}

/// A parsed processor notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorNotification {
    /// `checkout.session.completed`
    SessionCompleted(SessionObject),
    /// `checkout.session.async_payment_succeeded`
    SessionAsyncSucceeded(SessionObject),
    /// `checkout.session.async_payment_failed`
    SessionAsyncFailed(SessionObject),
    /// `checkout.session.expired`
    SessionExpired(SessionObject),
    /// `payment_intent.succeeded`
    PaymentSucceeded(PaymentObject),
    /// `payment_intent.payment_failed`
    PaymentFailed(PaymentObject),
    /// Anything else; acknowledged and ignored.
    Other(String),
}

impl ProcessorNotification {
    /// Parse a raw notification body.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Parse`] if the envelope or a known object is malformed.
    pub fn parse(raw_body: &[u8]) -> Result<Self, WebhookError> {
        let envelope: Envelope =
            serde_json::from_slice(raw_body).map_err(|e| WebhookError::Parse(e.to_string()))?;
        let object = envelope.data.object;

        let session = |object: serde_json::Value| -> Result<SessionObject, WebhookError> {
            serde_json::from_value(object).map_err(|e| WebhookError::Parse(e.to_string()))
        };
        let payment = |object: serde_json::Value| -> Result<PaymentObject, WebhookError> {
            serde_json::from_value(object).map_err(|e| WebhookError::Parse(e.to_string()))
        };

        Ok(match envelope.kind.as_str() {
            "checkout.session.completed" => Self::SessionCompleted(session(object)?),
            "checkout.session.async_payment_succeeded" => Self::SessionAsyncSucceeded(session(object)?),
            "checkout.session.async_payment_failed" => Self::SessionAsyncFailed(session(object)?),
            "checkout.session.expired" => Self::SessionExpired(session(object)?),
            "payment_intent.succeeded" => Self::PaymentSucceeded(payment(object)?),
            "payment_intent.payment_failed" => Self::PaymentFailed(payment(object)?),
            _ => Self::Other(envelope.kind),
        })
    }

    /// Notification type.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::SessionCompleted(_) => "checkout.session.completed",
            Self::SessionAsyncSucceeded(_) => "checkout.session.async_payment_succeeded",
            Self::SessionAsyncFailed(_) => "checkout.session.async_payment_failed",
            Self::SessionExpired(_) => "checkout.session.expired",
            Self::PaymentSucceeded(_) => "payment_intent.succeeded",
            Self::PaymentFailed(_) => "payment_intent.payment_failed",
            Self::Other(kind) => kind,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_735_689_600;

    fn body() -> Vec<u8> {
        br#"{"type":"checkout.session.completed","data":{"object":{"id":"cs_1","payment_status":"paid","payment_intent":"pi_1","metadata":{"bookingId":"b"},"amount_total":2500}}}"#.to_vec()
    }

    #[test]
    fn accepts_valid_signature() {
        let header = signature_header(&body(), SECRET, NOW).unwrap();
        assert_eq!(verify_signature(&body(), &header, SECRET, 300, NOW + 10), Ok(()));
    }

    #[test]
    fn rejects_tampered_body() {
        let header = signature_header(&body(), SECRET, NOW).unwrap();
        let mut tampered = body();
        tampered.push(b' ');
        assert_eq!(
            verify_signature(&tampered, &header, SECRET, 300, NOW),
            Err(WebhookError::SignatureMismatch)
        );
    }

    #[test]
    fn rejects_wrong_secret_and_stale_timestamp() {
        let header = signature_header(&body(), "other", NOW).unwrap();
        assert_eq!(
            verify_signature(&body(), &header, SECRET, 300, NOW),
            Err(WebhookError::SignatureMismatch)
        );

        let header = signature_header(&body(), SECRET, NOW - 301).unwrap();
        assert_eq!(
            verify_signature(&body(), &header, SECRET, 300, NOW),
            Err(WebhookError::TimestampOutOfTolerance)
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        for header in ["", "t=abc,v1=00", "v1=00", "t=1735689600"] {
            assert_eq!(
                verify_signature(&body(), header, SECRET, 300, NOW),
                Err(WebhookError::MalformedSignature),
                "header {header:?}"
            );
        }
    }

    #[test]
    fn any_v1_entry_may_match() {
        let valid = signature_header(&body(), SECRET, NOW).unwrap();
        let v1 = valid.split_once(",v1=").unwrap().1;
        let header = format!("t={NOW},v1=deadbeef,v1={v1}");
        assert_eq!(verify_signature(&body(), &header, SECRET, 300, NOW), Ok(()));
    }

    #[test]
    fn truncated_or_padded_signatures_never_match() {
        let valid = signature_header(&body(), SECRET, NOW).unwrap();
        let v1 = valid.split_once(",v1=").unwrap().1;
        for candidate in [&v1[..32], &v1[..v1.len() - 2], &format!("{v1}00")[..]] {
            let header = format!("t={NOW},v1={candidate}");
            assert_eq!(
                verify_signature(&body(), &header, SECRET, 300, NOW),
                Err(WebhookError::SignatureMismatch),
                "candidate {candidate:?}"
            );
        }
    }

    #[test]
    fn verifier_policy_follows_environment() {
        let config = WebhookConfig {
            secret: None,
            tolerance_secs: 300,
            skip_verification: true,
        };
        assert_eq!(WebhookVerifier::from_config(&config, AppEnv::Development), WebhookVerifier::Skip);
        assert_eq!(
            WebhookVerifier::from_config(&config, AppEnv::Production),
            WebhookVerifier::Unconfigured
        );
        assert_eq!(
            WebhookVerifier::Unconfigured.verify(&body(), None, NOW),
            Err(WebhookError::MissingSecret)
        );

        let verifier = WebhookVerifier::Verify {
            secret: SECRET.to_string(),
            tolerance_secs: 300,
        };
        assert_eq!(verifier.verify(&body(), None, NOW), Err(WebhookError::MissingSignature));
    }

    #[test]
    fn parses_known_and_unknown_types() {
        let ProcessorNotification::SessionCompleted(session) =
            ProcessorNotification::parse(&body()).unwrap()
        else {
            unreachable!("expected a completed session");
        };
        assert_eq!(session.payment_status, Some(SessionPaymentStatus::Paid));
        assert_eq!(session.booking_ref(), Some("b"));
        assert_eq!(session.amount_total, Some(2500));

        let other = br#"{"type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        assert_eq!(
            ProcessorNotification::parse(other).unwrap(),
            ProcessorNotification::Other("customer.created".to_string())
        );

        let payment = br#"{"type":"payment_intent.succeeded","data":{"object":{"id":"pi_9","metadata":{"session_id":"cs_9"}}}}"#;
        let ProcessorNotification::PaymentSucceeded(payment) =
            ProcessorNotification::parse(payment).unwrap()
        else {
            unreachable!("expected a payment");
        };
        assert_eq!(payment.session_id(), Some("cs_9"));
        assert_eq!(payment.amount_received, None);
    }

    #[test]
    fn rejects_non_envelopes() {
        assert!(matches!(
            ProcessorNotification::parse(b"not json"),
            Err(WebhookError::Parse(_))
        ));
        assert!(matches!(
            ProcessorNotification::parse(br#"{"type":"checkout.session.completed","data":{"object":{}}}"#),
            Err(WebhookError::Parse(_))
        ));
    }
}
