//! # Payment Ledger
//!
//! Payment attempts against a sale and their one-way state machine.
//!
//! ## Transaction States
//! ```text
//!              ┌──── settle ────► COMPLETED ──► confirm_settlement(sale)
//!   open ──► PENDING
//!              ├──── fail ──────► FAILED
//!              └──── cancel ────► CANCELLED   (buyer switch, sale reversal, stale sweep)
//! ```
//!
//! Every transition is a compare-and-set on `state = 'pending'`. Losing the
//! race is not an error: `settle` reports `AlreadySettled`, `cancel`
//! reports `AlreadyCancelled` and `fail` reports `AlreadyTerminal`, so
//! duplicate and out-of-order deliveries are harmless. Settling or
//! cancelling a transaction that ended some other way is a conflict.
//!
//! An online checkout opens one card transaction for the full total. To pay
//! in parts instead, the buyer cancels that attempt, which frees its
//! headroom for new cash, card or QR transactions.
//!
//! ## Headroom
//! A new PENDING transaction may claim at most
//! `declared - completed - pending`. The check and the insert share one
//! write transaction that starts by touching the sale row, so concurrent
//! opens on one sale are serialized and cannot overshoot the total.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use saleledger_core::validation::{
    truncate_error_code, validate_description, validate_external_ref, validate_payment_amount,
};
use saleledger_core::{
    Balance, CoreError, Money, PaymentMethod, PaymentState, PaymentTransaction, SaleStatus,
    TransactionRef, ValidationError,
};
use saleledger_db::{Database, NewTransaction, PaymentRepository, SaleRepository};

use crate::audit::{AuditAction, AuditContext, AuditEntity, AuditEvent, Auditor};
use crate::error::EngineResult;
use crate::gateway::{idempotency_key, IntentRequest, PaymentGateway, PaymentIntent};
use crate::sales::{confirm_settlement_in, sale_completed_event, SettlementCheck};

/// A payment attempt to open against a PENDING sale.
#[derive(Debug, Clone)]
pub struct OpenPayment {
    pub sale_id: i64,
    pub method: PaymentMethod,
    pub amount: Money,
    pub description: String,
    pub external_ref: Option<String>,
    pub processor_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SettleOutcome {
    /// This call moved the transaction to COMPLETED.
    Settled {
        transaction: PaymentTransaction,
        /// The settlement also completed the sale.
        sale_completed: bool,
    },
    /// Someone else settled it first.
    AlreadySettled { transaction: PaymentTransaction },
}

impl SettleOutcome {
    pub fn transaction(&self) -> &PaymentTransaction {
        match self {
            SettleOutcome::Settled { transaction, .. }
            | SettleOutcome::AlreadySettled { transaction } => transaction,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
    Failed { transaction: PaymentTransaction },
    /// Already COMPLETED, FAILED or CANCELLED; nothing changed.
    AlreadyTerminal { transaction: PaymentTransaction },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled { transaction: PaymentTransaction },
    AlreadyCancelled { transaction: PaymentTransaction },
}

#[derive(Debug, Clone)]
pub struct PaymentLedger {
    db: Database,
    auditor: Auditor,
}

impl PaymentLedger {
    pub fn new(db: Database, auditor: Auditor) -> Self {
        PaymentLedger { db, auditor }
    }

    /// Opens a PENDING transaction.
    pub async fn open(&self, request: OpenPayment) -> EngineResult<PaymentTransaction> {
        validate_payment_amount(request.amount)?;
        validate_description(&request.description)?;
        if let Some(reference) = &request.external_ref {
            validate_external_ref(reference)?;
        }

        let sale_id = request.sale_id;
        let mut tx = self.db.begin().await?;
        if !SaleRepository::touch(&mut tx, sale_id).await? {
            return Err(CoreError::SaleNotFound(sale_id).into());
        }

        let sale = SaleRepository::get_in(&mut tx, sale_id)
            .await?
            .ok_or(CoreError::SaleNotFound(sale_id))?;
        if sale.status != SaleStatus::Pending {
            return Err(CoreError::InvalidSaleState {
                sale_id,
                current: sale.status,
                action: "open payment",
            }
            .into());
        }

        let (paid, pending) = PaymentRepository::totals_in(&mut tx, sale_id).await?;
        let balance = Balance::compute(
            sale_id,
            sale.total(),
            Money::from_cents(paid),
            Money::from_cents(pending),
        );
        let headroom = balance.open_headroom();
        if request.amount > headroom {
            return Err(CoreError::AmountExceedsBalance {
                requested: request.amount,
                headroom,
            }
            .into());
        }

        let new = NewTransaction {
            sale_id,
            method: request.method,
            amount_cents: request.amount.cents(),
            state: PaymentState::Pending,
            external_ref: request.external_ref,
            description: request.description.trim().to_string(),
            processor_id: request.processor_id,
        };
        let transaction = PaymentRepository::insert(&mut tx, &new).await?;

        tx.commit().await?;

        info!(
            sale_id,
            transaction_id = transaction.id,
            amount = %request.amount,
            headroom_left = %(headroom - request.amount),
            "Payment opened"
        );
        Ok(transaction)
    }

    /// PENDING → COMPLETED, then completes the sale if it is now fully paid.
    ///
    /// `processor_id` records who confirmed the payment; webhook settlements
    /// pass `None`.
    pub async fn settle(
        &self,
        reference: &TransactionRef,
        processor_id: Option<i64>,
        ctx: &AuditContext,
    ) -> EngineResult<SettleOutcome> {
        let id = self.resolve_id(reference).await?;

        let mut tx = self.db.begin().await?;
        let applied = PaymentRepository::complete_if_pending(&mut tx, id, processor_id).await?;
        let transaction = PaymentRepository::find_in(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::TransactionNotFound(reference.to_string()))?;

        if !applied {
            return match transaction.state {
                PaymentState::Completed => Ok(SettleOutcome::AlreadySettled { transaction }),
                current => Err(CoreError::InvalidTransactionState {
                    transaction_id: id,
                    current,
                    action: "settle",
                }
                .into()),
            };
        }

        let check = confirm_settlement_in(&mut tx, transaction.sale_id).await?;
        tx.commit().await?;

        info!(
            transaction_id = id,
            sale_id = transaction.sale_id,
            amount = %transaction.amount(),
            reference = %reference,
            "Payment settled"
        );

        self.auditor.emit(AuditEvent::new(
            AuditAction::PaymentSettled,
            AuditEntity::PaymentTransaction,
            id,
            ctx,
            Some(json!({ "state": PaymentState::Pending })),
            Some(json!({
                "state": transaction.state,
                "amount_cents": transaction.amount_cents,
            })),
        ));
        let sale_completed = match &check {
            SettlementCheck::Completed(sale) => {
                self.auditor.emit(sale_completed_event(sale, ctx));
                true
            }
            _ => false,
        };

        Ok(SettleOutcome::Settled {
            transaction,
            sale_completed,
        })
    }

    /// PENDING → FAILED with the provider's error code.
    pub async fn fail(
        &self,
        reference: &TransactionRef,
        error_code: Option<&str>,
        ctx: &AuditContext,
    ) -> EngineResult<FailOutcome> {
        let id = self.resolve_id(reference).await?;
        let code = error_code.map(truncate_error_code);

        let mut tx = self.db.begin().await?;
        let applied = PaymentRepository::fail_if_pending(&mut tx, id, code.as_deref()).await?;
        let transaction = PaymentRepository::find_in(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::TransactionNotFound(reference.to_string()))?;
        tx.commit().await?;

        if !applied {
            return Ok(FailOutcome::AlreadyTerminal { transaction });
        }

        info!(
            transaction_id = id,
            sale_id = transaction.sale_id,
            error_code = ?transaction.error_code,
            "Payment failed"
        );
        self.auditor.emit(AuditEvent::new(
            AuditAction::PaymentFailed,
            AuditEntity::PaymentTransaction,
            id,
            ctx,
            Some(json!({ "state": PaymentState::Pending })),
            Some(json!({
                "state": transaction.state,
                "error_code": transaction.error_code,
            })),
        ));

        Ok(FailOutcome::Failed { transaction })
    }

    /// PENDING → CANCELLED, releasing the amount's headroom.
    ///
    /// The sale stays as it is; only this attempt is withdrawn.
    pub async fn cancel(
        &self,
        reference: &TransactionRef,
        ctx: &AuditContext,
    ) -> EngineResult<CancelOutcome> {
        let id = self.resolve_id(reference).await?;

        let mut tx = self.db.begin().await?;
        let applied = PaymentRepository::cancel_if_pending(&mut tx, id).await?;
        let transaction = PaymentRepository::find_in(&mut tx, id)
            .await?
            .ok_or_else(|| CoreError::TransactionNotFound(reference.to_string()))?;

        if !applied {
            return match transaction.state {
                PaymentState::Cancelled => Ok(CancelOutcome::AlreadyCancelled { transaction }),
                current => Err(CoreError::InvalidTransactionState {
                    transaction_id: id,
                    current,
                    action: "cancel",
                }
                .into()),
            };
        }
        tx.commit().await?;

        info!(
            transaction_id = id,
            sale_id = transaction.sale_id,
            amount = %transaction.amount(),
            "Payment cancelled"
        );
        self.auditor.emit(AuditEvent::new(
            AuditAction::PaymentCancelled,
            AuditEntity::PaymentTransaction,
            id,
            ctx,
            Some(json!({ "state": PaymentState::Pending })),
            Some(json!({ "state": transaction.state })),
        ));

        Ok(CancelOutcome::Cancelled { transaction })
    }

    /// Creates a gateway intent for a PENDING transaction and records the
    /// intent id as its external reference.
    ///
    /// The gateway is called with no database transaction open. Retrying
    /// is safe: the idempotency key is derived from the transaction id.
    pub async fn request_intent<G: PaymentGateway>(
        &self,
        gateway: &G,
        transaction_id: i64,
    ) -> EngineResult<PaymentIntent> {
        let transaction = self.get(transaction_id).await?;
        if transaction.state != PaymentState::Pending {
            return Err(CoreError::InvalidTransactionState {
                transaction_id,
                current: transaction.state,
                action: "request intent",
            }
            .into());
        }

        let request = IntentRequest {
            transaction_id,
            sale_id: transaction.sale_id,
            amount: transaction.amount(),
            description: transaction.description.clone(),
            idempotency_key: idempotency_key(transaction_id),
        };
        let intent = gateway.create_intent(request).await?;

        if self.attach_reference(transaction_id, &intent.id).await? {
            info!(transaction_id, intent_id = %intent.id, "Payment intent attached");
            return Ok(intent);
        }

        // Nothing attached: a retry of an earlier request, or the row moved on.
        let current = self.get(transaction_id).await?;
        if current.external_ref.as_deref() == Some(intent.id.as_str()) {
            return Ok(intent);
        }

        warn!(
            transaction_id,
            intent_id = %intent.id,
            existing = ?current.external_ref,
            state = %current.state,
            "Payment intent could not be attached"
        );
        Err(CoreError::InvalidTransactionState {
            transaction_id,
            current: current.state,
            action: "attach intent",
        }
        .into())
    }

    /// Cancels PENDING transactions created more than `older_than` ago.
    ///
    /// Each transaction is cancelled in its own write transaction so a
    /// settlement arriving mid-sweep is never blocked for long. Returns the
    /// ids actually cancelled.
    pub async fn expire_stale(&self, older_than: std::time::Duration) -> EngineResult<Vec<i64>> {
        let age = chrono::Duration::from_std(older_than).map_err(|_| {
            ValidationError::InvalidFormat {
                field: "older_than",
                reason: "duration out of range",
            }
        })?;
        let cutoff = Utc::now() - age;

        let candidates = self.db.payments().stale_pending(cutoff).await?;
        let mut expired = Vec::new();
        for candidate in candidates {
            let mut tx = self.db.begin().await?;
            let cancelled = PaymentRepository::cancel_if_pending(&mut tx, candidate.id).await?;
            tx.commit().await?;

            if cancelled {
                self.auditor.emit(AuditEvent::new(
                    AuditAction::PaymentCancelled,
                    AuditEntity::PaymentTransaction,
                    candidate.id,
                    &AuditContext::system(),
                    Some(json!({ "state": PaymentState::Pending })),
                    Some(json!({ "state": PaymentState::Cancelled, "reason": "expired" })),
                ));
                expired.push(candidate.id);
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), cutoff = %cutoff, "Stale pending payments expired");
        }
        Ok(expired)
    }

    pub async fn get(&self, transaction_id: i64) -> EngineResult<PaymentTransaction> {
        self.db
            .payments()
            .find(transaction_id)
            .await?
            .ok_or_else(|| CoreError::TransactionNotFound(transaction_id.to_string()).into())
    }

    pub async fn list_for_sale(&self, sale_id: i64) -> EngineResult<Vec<PaymentTransaction>> {
        Ok(self.db.payments().list_for_sale(sale_id).await?)
    }

    /// Sets the external reference of a PENDING transaction that has none.
    pub(crate) async fn attach_reference(&self, transaction_id: i64, reference: &str) -> EngineResult<bool> {
        Ok(self
            .db
            .payments()
            .attach_external_ref(transaction_id, reference)
            .await?)
    }

    /// Resolved on the pool, before any write transaction starts.
    async fn resolve_id(&self, reference: &TransactionRef) -> EngineResult<i64> {
        self.db
            .payments()
            .resolve(reference)
            .await?
            .map(|t| t.id)
            .ok_or_else(|| CoreError::TransactionNotFound(reference.to_string()).into())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, ErrorCategory};
    use crate::testing::{self, FailingGateway, StaticGateway};
    use crate::Engine;
    use saleledger_core::ERROR_CODE_MAX_LEN;

    /// Online sale whose automatic full-amount card attempt was withdrawn,
    /// leaving the whole total open for new attempts.
    async fn open_sale(engine: &Engine, total_cents: i64) -> i64 {
        let product = testing::product(engine, total_cents, 5).await;
        let created = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap();
        let first = created.transaction.unwrap();
        engine
            .payments()
            .cancel(&first.id.into(), &AuditContext::actor(100))
            .await
            .unwrap();
        created.sale.id
    }

    fn payment(sale_id: i64, cents: i64) -> OpenPayment {
        OpenPayment {
            sale_id,
            method: PaymentMethod::Qr,
            amount: Money::from_cents(cents),
            description: "Split payment".into(),
            external_ref: None,
            processor_id: Some(3),
        }
    }

    #[tokio::test]
    async fn test_split_payment_completes_sale() {
        let (engine, sink) = testing::engine().await;
        let product = testing::product(&engine, 5000, 5).await;
        let created = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::actor(100))
            .await
            .unwrap();
        let sale_id = created.sale.id;
        let card = created.transaction.unwrap();
        let ledger = engine.payments();

        // The full-amount card attempt claims all headroom until withdrawn.
        let blocked = ledger.open(payment(sale_id, 2000)).await.unwrap_err();
        assert!(matches!(
            blocked,
            EngineError::Core(CoreError::AmountExceedsBalance { headroom, .. })
                if headroom == Money::zero()
        ));

        let withdrawn = ledger
            .cancel(&card.id.into(), &AuditContext::actor(100))
            .await
            .unwrap();
        assert!(matches!(withdrawn, CancelOutcome::Cancelled { .. }));
        assert_eq!(
            engine.reconciliation().balance(sale_id).await.unwrap().pending_total,
            Money::zero()
        );

        let twenty = ledger.open(payment(sale_id, 2000)).await.unwrap();
        assert_eq!(twenty.state, PaymentState::Pending);

        let forty = ledger.open(payment(sale_id, 4000)).await.unwrap_err();
        assert_eq!(forty.category(), ErrorCategory::Validation);
        assert!(matches!(
            forty,
            EngineError::Core(CoreError::AmountExceedsBalance { headroom, .. })
                if headroom == Money::from_cents(3000)
        ));

        let thirty = ledger.open(payment(sale_id, 3000)).await.unwrap();

        let first = ledger
            .settle(&twenty.id.into(), None, &AuditContext::system())
            .await
            .unwrap();
        assert!(matches!(
            first,
            SettleOutcome::Settled { sale_completed: false, .. }
        ));

        let balance = engine.reconciliation().balance(sale_id).await.unwrap();
        assert_eq!(balance.paid_total, Money::from_cents(2000));
        assert_eq!(balance.pending_total, Money::from_cents(3000));
        assert_eq!(balance.remaining, Money::from_cents(3000));

        let second = ledger
            .settle(&thirty.id.into(), None, &AuditContext::system())
            .await
            .unwrap();
        assert!(matches!(
            second,
            SettleOutcome::Settled { sale_completed: true, .. }
        ));

        let sale = engine.sales().get(sale_id).await.unwrap().sale;
        assert_eq!(sale.status, SaleStatus::Completed);
        assert!(sale.completed_at.is_some());

        let completions = sink
            .actions()
            .into_iter()
            .filter(|a| *a == AuditAction::SaleCompleted)
            .count();
        assert_eq!(completions, 1);
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_one_way() {
        let (engine, sink) = testing::engine().await;
        let product = testing::product(&engine, 1000, 5).await;
        let created = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap();
        let card = created.transaction.unwrap();
        let ledger = engine.payments();

        let first = ledger
            .cancel(&card.id.into(), &AuditContext::system())
            .await
            .unwrap();
        assert!(matches!(first, CancelOutcome::Cancelled { .. }));
        let again = ledger
            .cancel(&card.id.into(), &AuditContext::system())
            .await
            .unwrap();
        assert!(matches!(again, CancelOutcome::AlreadyCancelled { .. }));

        let cancelled = sink
            .actions()
            .into_iter()
            .filter(|a| *a == AuditAction::PaymentCancelled)
            .count();
        assert_eq!(cancelled, 1);

        // Withdrawing a payment leaves the sale open.
        let sale = engine.sales().get(created.sale.id).await.unwrap().sale;
        assert_eq!(sale.status, SaleStatus::Pending);

        let cash = ledger.open(payment(sale.id, 1000)).await.unwrap();
        ledger
            .settle(&cash.id.into(), Some(3), &AuditContext::system())
            .await
            .unwrap();
        let err = ledger
            .cancel(&cash.id.into(), &AuditContext::system())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert_eq!(
            ledger.get(cash.id).await.unwrap().state,
            PaymentState::Completed
        );
    }

    #[tokio::test]
    async fn test_open_rejects_bad_requests() {
        let (engine, _) = testing::engine().await;
        let sale_id = open_sale(&engine, 5000).await;
        let ledger = engine.payments();

        let zero = ledger.open(payment(sale_id, 0)).await.unwrap_err();
        assert_eq!(zero.category(), ErrorCategory::Validation);

        let unknown = ledger.open(payment(999, 100)).await.unwrap_err();
        assert_eq!(unknown.category(), ErrorCategory::NotFound);

        let product = testing::product(&engine, 1000, 5).await;
        let settled = engine
            .sales()
            .create_in_person(testing::in_person(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .sale;
        let closed = ledger.open(payment(settled.id, 100)).await.unwrap_err();
        assert!(matches!(
            closed,
            EngineError::Core(CoreError::InvalidSaleState {
                current: SaleStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_external_ref_is_conflict() {
        let (engine, _) = testing::engine().await;
        let sale_id = open_sale(&engine, 5000).await;
        let ledger = engine.payments();

        let mut first = payment(sale_id, 1000);
        first.external_ref = Some("qr_ref_1".into());
        ledger.open(first.clone()).await.unwrap();

        let err = ledger.open(first).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::DuplicateExternalRef(ref r)) if r == "qr_ref_1"
        ));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[tokio::test]
    async fn test_settle_is_idempotent() {
        let (engine, sink) = testing::engine().await;
        let sale_id = open_sale(&engine, 1500).await;
        let ledger = engine.payments();
        let txn = ledger.open(payment(sale_id, 1500)).await.unwrap();

        let first = ledger
            .settle(&txn.id.into(), Some(4), &AuditContext::actor(4))
            .await
            .unwrap();
        assert_eq!(first.transaction().processor_id, Some(4));

        for _ in 0..3 {
            let again = ledger
                .settle(&txn.id.into(), None, &AuditContext::system())
                .await
                .unwrap();
            assert!(matches!(again, SettleOutcome::AlreadySettled { .. }));
        }

        let balance = engine.reconciliation().balance(sale_id).await.unwrap();
        assert_eq!(balance.paid_total, Money::from_cents(1500));

        let settled_events = sink
            .actions()
            .into_iter()
            .filter(|a| *a == AuditAction::PaymentSettled)
            .count();
        assert_eq!(settled_events, 1);
    }

    #[tokio::test]
    async fn test_settle_after_failure_is_conflict() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 800, 5).await;
        let txn = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();
        let ledger = engine.payments();

        ledger
            .fail(&txn.id.into(), None, &AuditContext::system())
            .await
            .unwrap();
        let err = ledger
            .settle(&txn.id.into(), None, &AuditContext::system())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Core(CoreError::InvalidTransactionState {
                current: PaymentState::Failed,
                ..
            })
        ));
        assert_eq!(err.category(), ErrorCategory::Conflict);
    }

    #[tokio::test]
    async fn test_unknown_reference_not_found() {
        let (engine, _) = testing::engine().await;
        let err = engine
            .payments()
            .settle(
                &TransactionRef::External("pi_missing".into()),
                None,
                &AuditContext::system(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_fail_truncates_code_and_ignores_terminal() {
        let (engine, _) = testing::engine().await;
        let sale_id = open_sale(&engine, 1000).await;
        let ledger = engine.payments();
        let txn = ledger.open(payment(sale_id, 1000)).await.unwrap();

        let long_code = "x".repeat(80);
        let failed = ledger
            .fail(&txn.id.into(), Some(&long_code), &AuditContext::system())
            .await
            .unwrap();
        match failed {
            FailOutcome::Failed { transaction } => {
                assert_eq!(transaction.state, PaymentState::Failed);
                assert_eq!(
                    transaction.error_code.map(|c| c.len()),
                    Some(ERROR_CODE_MAX_LEN)
                );
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let again = ledger
            .fail(&txn.id.into(), Some("other"), &AuditContext::system())
            .await
            .unwrap();
        assert!(matches!(again, FailOutcome::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn test_request_intent_attaches_reference() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 1000, 5).await;
        let txn = engine
            .sales()
            .create_online(testing::online(product, 2), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();
        let gateway = StaticGateway::default();

        let intent = engine.payments().request_intent(&gateway, txn.id).await.unwrap();
        let retried = engine.payments().request_intent(&gateway, txn.id).await.unwrap();
        assert_eq!(intent.id, retried.id);

        let stored = engine.payments().get(txn.id).await.unwrap();
        assert_eq!(stored.external_ref.as_deref(), Some(intent.id.as_str()));

        let requests = gateway.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].idempotency_key, requests[1].idempotency_key);
        assert_eq!(requests[0].amount, Money::from_cents(2000));
    }

    #[tokio::test]
    async fn test_gateway_outage_is_transient() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 1000, 5).await;
        let txn = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap()
            .transaction
            .unwrap();

        let err = engine
            .payments()
            .request_intent(&FailingGateway, txn.id)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let stored = engine.payments().get(txn.id).await.unwrap();
        assert_eq!(stored.state, PaymentState::Pending);
        assert!(stored.external_ref.is_none());
    }

    #[tokio::test]
    async fn test_expire_stale_cancels_only_pending() {
        let (engine, sink) = testing::engine().await;
        let sale_id = open_sale(&engine, 3000).await;
        let ledger = engine.payments();
        let pending = ledger.open(payment(sale_id, 1000)).await.unwrap();
        let settled = ledger.open(payment(sale_id, 1000)).await.unwrap();
        ledger
            .settle(&settled.id.into(), None, &AuditContext::system())
            .await
            .unwrap();

        assert!(ledger
            .expire_stale(std::time::Duration::from_secs(3600))
            .await
            .unwrap()
            .is_empty());

        std::thread::sleep(std::time::Duration::from_millis(5));
        let expired = ledger
            .expire_stale(std::time::Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(expired, vec![pending.id]);
        assert_eq!(
            ledger.get(pending.id).await.unwrap().state,
            PaymentState::Cancelled
        );
        assert_eq!(
            ledger.get(settled.id).await.unwrap().state,
            PaymentState::Completed
        );
        assert_eq!(sink.actions().last(), Some(&AuditAction::PaymentCancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_never_overshoot() {
        let (engine, _dir) = testing::file_engine().await;
        let sale_id = open_sale(&engine, 5000).await;

        let mut handles = Vec::new();
        for _ in 0..12 {
            let ledger = engine.payments();
            handles.push(tokio::spawn(async move {
                ledger.open(payment(sale_id, 1000)).await
            }));
        }

        let mut opened = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => opened += 1,
                Err(e) => assert!(matches!(
                    e,
                    EngineError::Core(CoreError::AmountExceedsBalance { .. })
                )),
            }
        }
        assert_eq!(opened, 5);

        let balance = engine.reconciliation().balance(sale_id).await.unwrap();
        assert_eq!(balance.pending_total, Money::from_cents(5000));
        assert_eq!(balance.open_headroom(), Money::zero());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settles_apply_once() {
        let (engine, _dir) = testing::file_engine().await;
        let product = testing::product(&engine, 2500, 5).await;
        let created = engine
            .sales()
            .create_online(testing::online(product, 1), &AuditContext::system())
            .await
            .unwrap();
        let txn_id = created.transaction.unwrap().id;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = engine.payments();
            handles.push(tokio::spawn(async move {
                ledger
                    .settle(&TransactionRef::Id(txn_id), None, &AuditContext::system())
                    .await
            }));
        }

        let mut settled = 0;
        let mut completed_sale = 0;
        for handle in handles {
            if let SettleOutcome::Settled { sale_completed, .. } = handle.await.unwrap().unwrap() {
                settled += 1;
                if sale_completed {
                    completed_sale += 1;
                }
            }
        }
        assert_eq!(settled, 1);
        assert_eq!(completed_sale, 1);

        let balance = engine.reconciliation().balance(created.sale.id).await.unwrap();
        assert_eq!(balance.paid_total, Money::from_cents(2500));
        assert!(balance.is_settled());
    }
}
