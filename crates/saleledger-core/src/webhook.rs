//! # Gateway Webhooks
//!
//! Signature verification and event parsing for the card gateway's
//! server-to-server notifications.
//!
//! ## Signature Scheme
//! ```text
//!  Gateway-Signature: t=1700000000,v1=5257a869e7ec...,v1=<rotated key>
//!
//!  signed_payload = "<t>" + "." + <raw request body>
//!  v1             = hex(HMAC-SHA256(signing_secret, signed_payload))
//!
//!  accepted iff |now - t| <= tolerance  AND  any v1 matches (constant time)
//! ```
//!
//! Nothing in the body is trusted before [`WebhookVerifier::verify`] passes.

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default replay window.
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

/// Event type of a captured payment.
pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";

/// Event type of a declined or errored payment.
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

// =============================================================================
// Signature Verification
// =============================================================================

/// Why a signature header was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("Signature header is malformed: {0}")]
    MalformedHeader(&'static str),

    #[error("Signature timestamp {timestamp} outside tolerance ({tolerance_secs}s)")]
    TimestampOutsideTolerance { timestamp: i64, tolerance_secs: i64 },

    #[error("No signature matches the payload")]
    Mismatch,
}

/// Verifies gateway signature headers with the provider signing secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: Vec<u8>,
    tolerance_secs: i64,
}

impl fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<Vec<u8>>, tolerance_secs: i64) -> Self {
        WebhookVerifier {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verifies against the current wall clock.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verifies as if the current Unix time were `now`.
    pub fn verify_at(&self, payload: &[u8], header: &str, now: i64) -> Result<(), SignatureError> {
        let parsed = parse_header(header)?;

        // `t` is not authenticated yet and may be any i64.
        if now.abs_diff(parsed.timestamp) > self.tolerance_secs.unsigned_abs() {
            return Err(SignatureError::TimestampOutsideTolerance {
                timestamp: parsed.timestamp,
                tolerance_secs: self.tolerance_secs,
            });
        }

        let expected = self.compute(payload, parsed.timestamp);
        let matched = parsed
            .signatures
            .iter()
            .any(|candidate| constant_time_eq(candidate.as_bytes(), expected.as_bytes()));

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }

    /// Builds a header for `payload` at `timestamp`.
    ///
    /// Used by tests and local replay tooling.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> String {
        format!("t={},v1={}", timestamp, self.compute(payload, timestamp))
    }

    fn compute(&self, payload: &[u8], timestamp: i64) -> String {
        // HMAC accepts keys of any length
        let mut mac = match HmacSha256::new_from_slice(&self.secret) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }
}

struct ParsedHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_header(header: &str) -> Result<ParsedHeader, SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::MalformedHeader("timestamp is not a number"))?,
                )
            }
            "v1" => signatures.push(value.to_ascii_lowercase()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader("missing v1 signature"));
    }

    Ok(ParsedHeader {
        timestamp,
        signatures,
    })
}

// =============================================================================
// Events
// =============================================================================

/// A verified gateway notification, reduced to what the ledger acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    PaymentSucceeded {
        event_id: String,
        intent_id: String,
    },
    PaymentFailed {
        event_id: String,
        intent_id: String,
        /// Raw provider code, not yet truncated.
        error_code: Option<String>,
    },
    /// Any other event type. Acknowledged and ignored.
    Unhandled { event_id: String, kind: String },
}

/// The body could not be interpreted.
#[derive(Debug, Error)]
#[error("Unreadable gateway event: {0}")]
pub struct EventParseError(String);

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    last_payment_error: Option<RawPaymentError>,
}

#[derive(Deserialize)]
struct RawPaymentError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
}

impl GatewayEvent {
    /// Parses a verified request body.
    pub fn parse(payload: &[u8]) -> Result<Self, EventParseError> {
        let raw: RawEvent =
            serde_json::from_slice(payload).map_err(|e| EventParseError(e.to_string()))?;

        let object = raw.data.map(|d| d.object);
        let intent_id = || {
            object
                .as_ref()
                .and_then(|o| o.id.clone())
                .ok_or_else(|| EventParseError(format!("{} without data.object.id", raw.kind)))
        };

        match raw.kind.as_str() {
            EVENT_PAYMENT_SUCCEEDED => Ok(GatewayEvent::PaymentSucceeded {
                intent_id: intent_id()?,
                event_id: raw.id,
            }),
            EVENT_PAYMENT_FAILED => {
                let error_code = object
                    .as_ref()
                    .and_then(|o| o.last_payment_error.as_ref())
                    .and_then(|e| e.code.clone().or_else(|| e.decline_code.clone()));
                Ok(GatewayEvent::PaymentFailed {
                    intent_id: intent_id()?,
                    event_id: raw.id,
                    error_code,
                })
            }
            _ => Ok(GatewayEvent::Unhandled {
                event_id: raw.id,
                kind: raw.kind,
            }),
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            GatewayEvent::PaymentSucceeded { event_id, .. }
            | GatewayEvent::PaymentFailed { event_id, .. }
            | GatewayEvent::Unhandled { event_id, .. } => event_id,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
