//! # Confirmation Tokens
//!
//! Short-lived, stateless tokens that bind a payment reference to an issuer
//! and an expiry. Used for manual confirmation (QR transfers, offline card
//! terminals) where no server-side session exists.
//!
//! ## Layout
//! ```text
//! ┌──────────────────┐ . ┌──────────────────────────────────────┐ . ┌──────────┐
//! │ {"alg":"HS256",  │   │ {"reference":"pi_..","issuer":12,    │   │ HMAC     │
//! │  "typ":"JWT"}    │   │  "iat":1700000000,"exp":1700000900}  │   │ SHA-256  │
//! └──────────────────┘   └──────────────────────────────────────┘   └──────────┘
//!      base64url               base64url (fixed field order)          base64url
//! ```
//!
//! ## Verification
//! Signature and expiry are checked independently. A forged token and an
//! expired, correctly signed token fail with different [`TokenError`]
//! variants so logs can tell them apart; callers see [`TokenRejection`].

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use constant_time_eq::constant_time_eq;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Claims
// =============================================================================

/// Token payload.
///
/// Field order is the serialization order, which keeps signatures
/// deterministic for identical inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationClaims {
    /// External reference of the payment transaction.
    pub reference: String,
    /// User that issued the token.
    pub issuer: i64,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Expires at (Unix seconds). Invalid from this instant on.
    pub exp: i64,
}

// =============================================================================
// Errors
// =============================================================================

/// Why a token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Malformed confirmation token: {0}")]
    Malformed(String),

    /// Signature does not match. `expired` records whether the payload was
    /// also past its expiry, for the log line.
    #[error("Confirmation token signature mismatch")]
    BadSignature { expired: bool },

    /// Correctly signed but past its expiry.
    #[error("Confirmation token for {reference} expired at {expired_at}")]
    Expired { reference: String, expired_at: i64 },

    #[error("Token lifetime must be positive, got {0}s")]
    InvalidTtl(i64),

    #[error("Failed to sign confirmation token: {0}")]
    Signing(String),
}

/// Caller-facing outcome of a failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    Invalid,
    Expired,
}

impl TokenError {
    pub fn rejection(&self) -> TokenRejection {
        match self {
            TokenError::Expired { .. } => TokenRejection::Expired,
            _ => TokenRejection::Invalid,
        }
    }

    /// True when the token was not produced with our key.
    pub fn is_forgery(&self) -> bool {
        matches!(self, TokenError::BadSignature { .. })
    }
}

// =============================================================================
// Service
// =============================================================================

/// Issues and verifies confirmation tokens with one shared secret.
#[derive(Clone)]
pub struct ConfirmationTokenService {
    key: EncodingKey,
}

impl fmt::Debug for ConfirmationTokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfirmationTokenService")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl ConfirmationTokenService {
    pub fn new(secret: &[u8]) -> Self {
        ConfirmationTokenService {
            key: EncodingKey::from_secret(secret),
        }
    }

    /// Issues a token valid for `ttl` from now.
    pub fn issue(&self, reference: &str, issuer: i64, ttl: Duration) -> Result<String, TokenError> {
        self.issue_at(reference, issuer, ttl, Utc::now())
    }

    /// Issues a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        reference: &str,
        issuer: i64,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl(ttl.num_seconds()));
        }

        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::InvalidTtl(ttl.num_seconds()))?;

        let claims = ConfirmationClaims {
            reference: reference.to_string(),
            issuer,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Verifies a token against the current time.
    pub fn verify(&self, token: &str) -> Result<ConfirmationClaims, TokenError> {
        self.verify_at(token, Utc::now())
    }

    /// Verifies a token as if the current time were `now`.
    ///
    /// ## Checks
    /// 1. Three base64url segments, HS256 header, decodable claims
    /// 2. Signature recomputed over `header.payload`, compared in constant time
    /// 3. `exp` compared against `now`
    ///
    /// Steps 2 and 3 both run; a bad signature wins over expiry.
    pub fn verify_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationClaims, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header_b64, payload_b64, signature] = segments.as_slice() else {
            return Err(TokenError::Malformed("expected three segments".into()));
        };

        let header =
            jsonwebtoken::decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::HS256 {
            return Err(TokenError::Malformed(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let claims: ConfirmationClaims =
            serde_json::from_slice(&payload).map_err(|e| TokenError::Malformed(e.to_string()))?;

        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        let expected =
            jsonwebtoken::crypto::sign(signing_input.as_bytes(), &self.key, Algorithm::HS256)
                .map_err(|e| TokenError::Signing(e.to_string()))?;

        let signature_ok = constant_time_eq(expected.as_bytes(), signature.as_bytes());
        let expired = claims.exp <= now.timestamp();

        match (signature_ok, expired) {
            (false, expired) => Err(TokenError::BadSignature { expired }),
            (true, true) => Err(TokenError::Expired {
                reference: claims.reference,
                expired_at: claims.exp,
            }),
            (true, false) => Ok(claims),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn service() -> ConfirmationTokenService {
        ConfirmationTokenService::new(b"confirmation-secret")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_round_trip_before_expiry() {
        let svc = service();
        let token = svc
            .issue_at("pi_abc", 42, Duration::minutes(15), t0())
            .unwrap();

        let claims = svc
            .verify_at(&token, t0() + Duration::minutes(14))
            .unwrap();
        assert_eq!(claims.reference, "pi_abc");
        assert_eq!(claims.issuer, 42);
    }

    #[test]
    fn test_expired_after_ttl() {
        let svc = service();
        let token = svc
            .issue_at("pi_abc", 42, Duration::minutes(15), t0())
            .unwrap();

        let err = svc
            .verify_at(&token, t0() + Duration::minutes(15))
            .unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }));
        assert_eq!(err.rejection(), TokenRejection::Expired);
        assert!(!err.is_forgery());
    }

    #[test]
    fn test_issue_is_deterministic() {
        let svc = service();
        let a = svc.issue_at("pi_abc", 1, Duration::seconds(60), t0()).unwrap();
        let b = svc.issue_at("pi_abc", 1, Duration::seconds(60), t0()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wrong_key_is_forgery() {
        let token = service()
            .issue_at("pi_abc", 1, Duration::minutes(5), t0())
            .unwrap();
        let other = ConfirmationTokenService::new(b"another-secret");

        let err = other.verify_at(&token, t0()).unwrap_err();
        assert_eq!(err, TokenError::BadSignature { expired: false });
        assert_eq!(err.rejection(), TokenRejection::Invalid);
    }

    #[test]
    fn test_tampered_payload_is_forgery() {
        let svc = service();
        let token = svc
            .issue_at("pi_abc", 1, Duration::minutes(5), t0())
            .unwrap();
        let parts: Vec<&str> = token.split('.').collect();

        let forged_claims = ConfirmationClaims {
            reference: "pi_other".into(),
            issuer: 1,
            iat: t0().timestamp(),
            exp: (t0() + Duration::minutes(5)).timestamp(),
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).unwrap());
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert!(svc.verify_at(&forged, t0()).unwrap_err().is_forgery());
    }

    #[test]
    fn test_forged_and_expired_reports_both() {
        let token = service()
            .issue_at("pi_abc", 1, Duration::minutes(5), t0())
            .unwrap();
        let other = ConfirmationTokenService::new(b"another-secret");

        let err = other
            .verify_at(&token, t0() + Duration::hours(1))
            .unwrap_err();
        assert_eq!(err, TokenError::BadSignature { expired: true });
    }

    #[test]
    fn test_malformed() {
        let svc = service();
        assert!(matches!(
            svc.verify_at("not-a-token", t0()),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            svc.verify_at("a.b.c.d", t0()),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_positive_ttl_rejected() {
        let err = service()
            .issue_at("pi_abc", 1, Duration::zero(), t0())
            .unwrap_err();
        assert_eq!(err, TokenError::InvalidTtl(0));
    }

    #[test]
    fn test_ttl_past_calendar_range_rejected() {
        let ttl = Duration::days(365 * 1_000_000);
        let err = service().issue_at("pi_abc", 1, ttl, t0()).unwrap_err();
        assert_eq!(err, TokenError::InvalidTtl(ttl.num_seconds()));
    }
}
