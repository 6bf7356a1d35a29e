//! # Gateway Webhook Processor
//!
//! Applies verified gateway notifications to the payment ledger.
//!
//! ## Response Policy
//! ```text
//! ┌──────────────────────────────────────┬──────────────────────────────────┐
//! │  Situation                           │  Result                          │
//! ├──────────────────────────────────────┼──────────────────────────────────┤
//! │  signature missing / wrong / stale   │  SignatureInvalid (no mutation)  │
//! │  succeeded, transaction PENDING      │  Applied (settled)               │
//! │  succeeded, already COMPLETED        │  Duplicate                       │
//! │  failed, transaction PENDING         │  Applied (failed)                │
//! │  failed, already terminal            │  Duplicate                       │
//! │  unknown external reference          │  UnknownReference                │
//! │  other event type / unreadable body  │  Ignored                         │
//! │  succeeded on FAILED / CANCELLED     │  Ignored (logged)                │
//! │  storage unavailable                 │  Processing error (redelivery)   │
//! └──────────────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Everything except the first and last rows is acknowledged so the
//! provider stops redelivering.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use saleledger_core::webhook::{GatewayEvent, SignatureError, WebhookVerifier};
use saleledger_core::TransactionRef;

use crate::audit::AuditContext;
use crate::error::{EngineError, ErrorCategory};
use crate::payments::{FailOutcome, PaymentLedger, SettleOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    UnknownReference,
    Ignored,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Webhook signature rejected: {0}")]
    SignatureInvalid(#[from] SignatureError),

    #[error("Webhook could not be processed: {0}")]
    Processing(EngineError),
}

#[derive(Debug, Clone)]
pub struct WebhookProcessor {
    verifier: WebhookVerifier,
    payments: PaymentLedger,
}

impl WebhookProcessor {
    pub fn new(verifier: WebhookVerifier, payments: PaymentLedger) -> Self {
        WebhookProcessor { verifier, payments }
    }

    /// Verifies and applies one delivery.
    pub async fn handle(&self, payload: &[u8], header: &str) -> Result<WebhookOutcome, WebhookError> {
        if let Err(e) = self.verifier.verify(payload, header) {
            warn!(error = %e, "Webhook signature rejected");
            return Err(e.into());
        }

        let event = match GatewayEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Unreadable webhook acknowledged");
                return Ok(WebhookOutcome::Ignored);
            }
        };

        let ctx = AuditContext::system();
        match event {
            GatewayEvent::PaymentSucceeded { event_id, intent_id } => {
                let reference = TransactionRef::External(intent_id);
                match self.payments.settle(&reference, None, &ctx).await {
                    Ok(SettleOutcome::Settled { transaction, .. }) => {
                        info!(%event_id, transaction_id = transaction.id, "Webhook settled payment");
                        Ok(WebhookOutcome::Applied)
                    }
                    Ok(SettleOutcome::AlreadySettled { transaction }) => {
                        debug!(%event_id, transaction_id = transaction.id, "Duplicate success webhook");
                        Ok(WebhookOutcome::Duplicate)
                    }
                    Err(e) => absorb(&event_id, &reference, e),
                }
            }

            GatewayEvent::PaymentFailed {
                event_id,
                intent_id,
                error_code,
            } => {
                let reference = TransactionRef::External(intent_id);
                match self
                    .payments
                    .fail(&reference, error_code.as_deref(), &ctx)
                    .await
                {
                    Ok(FailOutcome::Failed { transaction }) => {
                        info!(%event_id, transaction_id = transaction.id, "Webhook failed payment");
                        Ok(WebhookOutcome::Applied)
                    }
                    Ok(FailOutcome::AlreadyTerminal { transaction }) => {
                        debug!(
                            %event_id,
                            transaction_id = transaction.id,
                            state = %transaction.state,
                            "Failure webhook for terminal payment"
                        );
                        Ok(WebhookOutcome::Duplicate)
                    }
                    Err(e) => absorb(&event_id, &reference, e),
                }
            }

            GatewayEvent::Unhandled { event_id, kind } => {
                debug!(%event_id, %kind, "Webhook event type ignored");
                Ok(WebhookOutcome::Ignored)
            }
        }
    }
}

/// Decides which engine errors a verified delivery swallows.
fn absorb(
    event_id: &str,
    reference: &TransactionRef,
    err: EngineError,
) -> Result<WebhookOutcome, WebhookError> {
    match err.category() {
        ErrorCategory::NotFound => {
            warn!(event_id, %reference, "Webhook for unknown payment reference dropped");
            Ok(WebhookOutcome::UnknownReference)
        }
        ErrorCategory::Validation | ErrorCategory::Conflict => {
            warn!(event_id, %reference, error = %err, "Webhook not applicable; acknowledged");
            Ok(WebhookOutcome::Ignored)
        }
        _ => {
            error!(event_id, %reference, error = %err, "Webhook processing failed");
            Err(WebhookError::Processing(err))
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditAction;
    use crate::testing::{self, StaticGateway};
    use saleledger_core::{Money, PaymentState, SaleStatus};

    fn succeeded(event_id: &str, intent_id: &str) -> Vec<u8> {
        format!(
            r#"{{"id":"{}","type":"payment_intent.succeeded","data":{{"object":{{"id":"{}"}}}}}}"#,
            event_id, intent_id
        )
        .into_bytes()
    }

    fn failed(event_id: &str, intent_id: &str, code: &str) -> Vec<u8> {
        format!(
            r#"{{"id":"{}","type":"payment_intent.payment_failed","data":{{"object":{{"id":"{}","last_payment_error":{{"code":"{}"}}}}}}}}"#,
            event_id, intent_id, code
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_duplicate_delivery_on_online_sale() {
        let (engine, sink) = testing::engine().await;
        let product = testing::product(&engine, 1000, 10).await;
        let created = engine
            .sales()
            .create_online(testing::online(product, 3), &AuditContext::actor(100))
            .await
            .unwrap();
        let txn = created.transaction.unwrap();
        let intent = engine
            .payments()
            .request_intent(&StaticGateway::default(), txn.id)
            .await
            .unwrap();

        let body = succeeded("evt_1", &intent.id);
        let webhooks = engine.webhooks();
        assert_eq!(
            webhooks.handle(&body, &testing::signed(&engine, &body)).await.unwrap(),
            WebhookOutcome::Applied
        );
        assert_eq!(
            webhooks.handle(&body, &testing::signed(&engine, &body)).await.unwrap(),
            WebhookOutcome::Duplicate
        );

        let sale = engine.sales().get(created.sale.id).await.unwrap().sale;
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(engine.stock().available(product).await.unwrap(), 7);

        let balance = engine.reconciliation().balance(sale.id).await.unwrap();
        assert_eq!(balance.paid_total, Money::from_cents(3000));
        assert_eq!(balance.remaining, Money::zero());

        let settled = sink
            .actions()
            .into_iter()
            .filter(|a| *a == AuditAction::PaymentSettled)
            .count();
        assert_eq!(settled, 1);
    }

    #[tokio::test]
    async fn test_bad_signature_changes_nothing() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 1000, 10).await;
        let txn = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();
        let intent = engine
            .payments()
            .request_intent(&StaticGateway::default(), txn.id)
            .await
            .unwrap();

        let body = succeeded("evt_1", &intent.id);
        let forged = WebhookVerifier::new("whsec_attacker", 300)
            .sign(&body, chrono::Utc::now().timestamp());

        for header in [forged.as_str(), "", "t=abc,v1=00"] {
            let err = engine.webhooks().handle(&body, header).await.unwrap_err();
            assert!(matches!(err, WebhookError::SignatureInvalid(_)));
        }

        let stored = engine.payments().get(txn.id).await.unwrap();
        assert_eq!(stored.state, PaymentState::Pending);
    }

    #[tokio::test]
    async fn test_failure_then_late_success() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 1000, 10).await;
        let txn = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();
        let intent = engine
            .payments()
            .request_intent(&StaticGateway::default(), txn.id)
            .await
            .unwrap();
        let webhooks = engine.webhooks();

        let code = "card_declined_".repeat(6);
        let fail_body = failed("evt_1", &intent.id, &code);
        assert_eq!(
            webhooks
                .handle(&fail_body, &testing::signed(&engine, &fail_body))
                .await
                .unwrap(),
            WebhookOutcome::Applied
        );
        let stored = engine.payments().get(txn.id).await.unwrap();
        assert_eq!(stored.state, PaymentState::Failed);
        assert_eq!(stored.error_code.unwrap().len(), 50);

        let success_body = succeeded("evt_2", &intent.id);
        assert_eq!(
            webhooks
                .handle(&success_body, &testing::signed(&engine, &success_body))
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );
        assert_eq!(
            engine.payments().get(txn.id).await.unwrap().state,
            PaymentState::Failed
        );
    }

    #[tokio::test]
    async fn test_late_failure_does_not_revert_settlement() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 1000, 10).await;
        let created = engine
            .sales()
            .create_online(testing::online(product, 2), &AuditContext::system())
            .await
            .unwrap();
        let txn = created.transaction.unwrap();
        let intent = engine
            .payments()
            .request_intent(&StaticGateway::default(), txn.id)
            .await
            .unwrap();
        let webhooks = engine.webhooks();

        let success_body = succeeded("evt_1", &intent.id);
        assert_eq!(
            webhooks
                .handle(&success_body, &testing::signed(&engine, &success_body))
                .await
                .unwrap(),
            WebhookOutcome::Applied
        );

        let fail_body = failed("evt_2", &intent.id, "card_declined");
        assert_eq!(
            webhooks
                .handle(&fail_body, &testing::signed(&engine, &fail_body))
                .await
                .unwrap(),
            WebhookOutcome::Duplicate
        );

        let stored = engine.payments().get(txn.id).await.unwrap();
        assert_eq!(stored.state, PaymentState::Completed);
        assert_eq!(stored.error_code, None);

        let sale = engine.sales().get(created.sale.id).await.unwrap().sale;
        assert_eq!(sale.status, SaleStatus::Completed);
        let balance = engine.reconciliation().balance(sale.id).await.unwrap();
        assert_eq!(balance.paid_total, Money::from_cents(2000));
    }

    #[tokio::test]
    async fn test_unknown_reference_and_other_events_acknowledged() {
        let (engine, _) = testing::engine().await;
        let webhooks = engine.webhooks();

        let unknown = succeeded("evt_9", "pi_nobody");
        assert_eq!(
            webhooks
                .handle(&unknown, &testing::signed(&engine, &unknown))
                .await
                .unwrap(),
            WebhookOutcome::UnknownReference
        );

        let other = br#"{"id":"evt_10","type":"charge.refunded","data":{"object":{"id":"ch_1"}}}"#;
        assert_eq!(
            webhooks
                .handle(other, &testing::signed(&engine, other))
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );

        let garbage = b"{not json";
        assert_eq!(
            webhooks
                .handle(garbage, &testing::signed(&engine, garbage))
                .await
                .unwrap(),
            WebhookOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_storage_failure_asks_for_redelivery() {
        let (engine, _) = testing::engine().await;
        engine.database().close().await;

        let body = succeeded("evt_1", "pi_1");
        let err = engine
            .webhooks()
            .handle(&body, &testing::signed(&engine, &body))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Processing(e) if e.is_retryable()));
    }
}
