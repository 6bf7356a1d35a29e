//! # Manual Confirmation
//!
//! Lets staff confirm payments the gateway never reports (QR transfers,
//! standalone card terminals) with a short-lived signed token.
//!
//! ```text
//!  issue_for_transaction(txn, issuer)          confirm(token)
//!     │                                           │
//!     ├─ txn has no external_ref?                 ├─ verify signature + expiry
//!     │     assign "manual_<uuid>"                │
//!     └─ sign {reference, issuer, iat, exp}       └─ settle(External(reference))
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use saleledger_core::token::{ConfirmationClaims, ConfirmationTokenService, TokenError};
use saleledger_core::validation::validate_external_ref;
use saleledger_core::{CoreError, PaymentState, TransactionRef};

use crate::audit::AuditContext;
use crate::error::EngineResult;
use crate::payments::{PaymentLedger, SettleOutcome};

/// A token handed to whoever will confirm the payment.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub transaction_id: i64,
    pub reference: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConfirmationService {
    tokens: ConfirmationTokenService,
    default_ttl: Duration,
    payments: PaymentLedger,
}

impl ConfirmationService {
    pub fn new(tokens: ConfirmationTokenService, default_ttl: Duration, payments: PaymentLedger) -> Self {
        ConfirmationService {
            tokens,
            default_ttl,
            payments,
        }
    }

    /// Signs a token for an existing external reference.
    pub fn issue(&self, reference: &str, issuer: i64, ttl: Option<Duration>) -> EngineResult<String> {
        validate_external_ref(reference)?;
        Ok(self
            .tokens
            .issue(reference, issuer, ttl.unwrap_or(self.default_ttl))?)
    }

    /// Issues a token for a PENDING transaction, assigning it a manual
    /// reference first when it has none.
    pub async fn issue_for_transaction(
        &self,
        transaction_id: i64,
        issuer: i64,
        ttl: Option<Duration>,
    ) -> EngineResult<IssuedToken> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or(TokenError::InvalidTtl(ttl.num_seconds()))?;

        let transaction = self.payments.get(transaction_id).await?;
        if transaction.state != PaymentState::Pending {
            return Err(CoreError::InvalidTransactionState {
                transaction_id,
                current: transaction.state,
                action: "issue confirmation",
            }
            .into());
        }

        let reference = match transaction.external_ref {
            Some(existing) => existing,
            None => self.assign_manual_reference(transaction_id).await?,
        };

        let token = self.tokens.issue_at(&reference, issuer, ttl, now)?;

        info!(
            transaction_id,
            issuer,
            reference = %reference,
            ttl_secs = ttl.num_seconds(),
            "Confirmation token issued"
        );

        Ok(IssuedToken {
            transaction_id,
            reference,
            token,
            expires_at,
        })
    }

    /// Checks a token, logging forgeries and expiries separately.
    pub fn verify(&self, token: &str) -> EngineResult<ConfirmationClaims> {
        self.tokens.verify(token).map_err(|e| {
            match &e {
                TokenError::BadSignature { expired } => {
                    warn!(expired = *expired, "Forged confirmation token rejected")
                }
                TokenError::Expired {
                    reference,
                    expired_at,
                } => info!(%reference, expired_at, "Expired confirmation token rejected"),
                other => warn!(error = %other, "Unusable confirmation token rejected"),
            }
            e.into()
        })
    }

    /// Verifies the token and settles the payment it names.
    pub async fn confirm(&self, token: &str, ctx: &AuditContext) -> EngineResult<SettleOutcome> {
        let claims = self.verify(token)?;
        let ctx = AuditContext {
            actor_id: ctx.actor_id.or(Some(claims.issuer)),
            client_ip: ctx.client_ip.clone(),
        };
        let reference = TransactionRef::External(claims.reference);
        self.payments
            .settle(&reference, Some(claims.issuer), &ctx)
            .await
    }

    async fn assign_manual_reference(&self, transaction_id: i64) -> EngineResult<String> {
        let candidate = format!("manual_{}", Uuid::new_v4().simple());
        if self
            .payments
            .attach_reference(transaction_id, &candidate)
            .await?
        {
            return Ok(candidate);
        }

        // Lost a race: another issuer or an intent request got there first.
        let current = self.payments.get(transaction_id).await?;
        match current.external_ref {
            Some(reference) if current.state == PaymentState::Pending => Ok(reference),
            _ => Err(CoreError::InvalidTransactionState {
                transaction_id,
                current: current.state,
                action: "issue confirmation",
            }
            .into()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, ErrorCategory};
    use crate::testing;
    use saleledger_core::token::TokenRejection;
    use saleledger_core::SaleStatus;

    #[tokio::test]
    async fn test_issue_and_confirm_settles_sale() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 4200, 3).await;
        let created = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap();
        let txn = created.transaction.unwrap();

        let issued = engine
            .confirmations()
            .issue_for_transaction(txn.id, 7, None)
            .await
            .unwrap();
        assert!(issued.reference.starts_with("manual_"));

        let outcome = engine
            .confirmations()
            .confirm(&issued.token, &AuditContext::actor(7).with_ip("10.0.0.5"))
            .await
            .unwrap();
        match outcome {
            SettleOutcome::Settled {
                transaction,
                sale_completed,
            } => {
                assert_eq!(transaction.processor_id, Some(7));
                assert!(sale_completed);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let again = engine
            .confirmations()
            .confirm(&issued.token, &AuditContext::actor(7))
            .await
            .unwrap();
        assert!(matches!(again, SettleOutcome::AlreadySettled { .. }));
        assert_eq!(
            engine.sales().get(created.sale.id).await.unwrap().sale.status,
            SaleStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_existing_reference_is_reused() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 100, 3).await;
        let txn = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();

        let confirmations = engine.confirmations();
        let first = confirmations
            .issue_for_transaction(txn.id, 1, None)
            .await
            .unwrap();
        let second = confirmations
            .issue_for_transaction(txn.id, 2, Some(Duration::minutes(1)))
            .await
            .unwrap();
        assert_eq!(first.reference, second.reference);
    }

    #[tokio::test]
    async fn test_forged_and_expired_tokens_rejected() {
        let (engine, _) = testing::engine().await;
        let confirmations = engine.confirmations();

        let forged = ConfirmationTokenService::new(b"not-our-key")
            .issue("manual_x", 1, Duration::minutes(5))
            .unwrap();
        let err = confirmations
            .confirm(&forged, &AuditContext::system())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert!(matches!(
            err,
            EngineError::Token(ref t) if t.rejection() == TokenRejection::Invalid
        ));

        let expired = ConfirmationTokenService::new(engine.config().confirmation_secret())
            .issue_at(
                "manual_x",
                1,
                Duration::minutes(5),
                Utc::now() - Duration::hours(1),
            )
            .unwrap();
        let err = confirmations.verify(&expired).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Token(ref t) if t.rejection() == TokenRejection::Expired
        ));
    }

    #[tokio::test]
    async fn test_cannot_issue_for_settled_transaction() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 100, 3).await;
        let txn = engine
            .sales()
            .create_in_person(testing::in_person(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();

        let err = engine
            .confirmations()
            .issue_for_transaction(txn.id, 1, None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_assigns_nothing() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 100, 3).await;
        let txn = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();

        let err = engine
            .confirmations()
            .issue_for_transaction(txn.id, 1, Some(Duration::days(365 * 1_000_000)))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Token(TokenError::InvalidTtl(_))));
        assert_eq!(err.category(), ErrorCategory::Validation);

        let stored = engine.payments().get(txn.id).await.unwrap();
        assert_eq!(stored.external_ref, None);
    }

    #[tokio::test]
    async fn test_issue_rejects_blank_reference() {
        let (engine, _) = testing::engine().await;
        let err = engine.confirmations().issue("  ", 1, None).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }
}
