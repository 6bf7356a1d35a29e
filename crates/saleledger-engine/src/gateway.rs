//! # Payment Gateway Port
//!
//! The card provider as seen by the ledger: it creates payment intents and
//! later reports their outcome through webhooks.
//!
//! ```text
//!  PaymentLedger::request_intent
//!     │  (no database transaction open)
//!     ▼
//!  PaymentGateway::create_intent(IntentRequest { idempotency_key, .. })
//!     │
//!     ▼
//!  attach intent id as external_ref (only if still unset)
//! ```
//!
//! Implementations must treat `idempotency_key` as the provider's
//! idempotency key, so a retried request returns the same intent.

use std::future::Future;
use thiserror::Error;

use saleledger_core::Money;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub transaction_id: i64,
    pub sale_id: i64,
    pub amount: Money,
    pub description: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    /// Provider intent id; becomes the transaction's external reference.
    pub id: String,
    /// Handed to the client to complete the payment, if the provider uses one.
    pub client_secret: Option<String>,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Payment gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Payment gateway rejected the request: {0}")]
    Rejected(String),
}

pub trait PaymentGateway: Send + Sync {
    fn create_intent(
        &self,
        request: IntentRequest,
    ) -> impl Future<Output = Result<PaymentIntent, GatewayError>> + Send;
}

/// Provider idempotency key for a transaction. Stable across retries.
pub fn idempotency_key(transaction_id: i64) -> String {
    format!("saleledger-txn-{}", transaction_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_is_stable() {
        assert_eq!(idempotency_key(42), idempotency_key(42));
        assert_ne!(idempotency_key(42), idempotency_key(43));
    }
}
