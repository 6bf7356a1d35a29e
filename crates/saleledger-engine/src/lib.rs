//! # saleledger-engine: Reconciliation Orchestration
//!
//! Turns checkout requests, payment attempts and gateway notifications into
//! atomic, idempotent changes to sales, stock and payment transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ledger-api (axum routes)                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              ★ saleledger-engine (THIS CRATE) ★                 │   │
//! │  │                                                                 │   │
//! │  │   Engine ──► SaleService ─────┬──► StockLedger                  │   │
//! │  │          ──► PaymentLedger ◄──┤    LotAllocator                 │   │
//! │  │          ──► WebhookProcessor │                                 │   │
//! │  │          ──► ConfirmationService                                │   │
//! │  │          ──► Reconciliation                                     │   │
//! │  │                                                                 │   │
//! │  │   Collaborators: AuditSink, PaymentGateway                      │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  saleledger-db (repositories, transactions)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`sales`] - Checkout, cancel, void, settlement confirmation
//! - [`payments`] - Payment transaction state machine
//! - [`webhook`] - Gateway notification handling
//! - [`confirmation`] - Manual confirmation tokens
//! - [`reconciliation`] - Balance query
//! - [`stock`] / [`lots`] - Inventory movements
//! - [`audit`] - Audit events and the sink trait
//! - [`config`] - TOML + environment configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = EngineConfig::load(None)?;
//! let engine = Engine::open(config, Arc::new(TracingAuditSink)).await?;
//!
//! let outcome = engine.webhooks().handle(&body, &signature).await?;
//! let balance = engine.reconciliation().balance(sale_id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod config;
pub mod confirmation;
pub mod error;
pub mod gateway;
pub mod lots;
pub mod payments;
pub mod reconciliation;
pub mod sales;
pub mod stock;
pub mod webhook;

#[cfg(test)]
pub(crate) mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::{AuditContext, AuditEvent, AuditSink, Auditor, TracingAuditSink};
pub use config::{ConfigError, EngineConfig};
pub use confirmation::{ConfirmationService, IssuedToken};
pub use error::{EngineError, EngineResult, ErrorCategory};
pub use gateway::{GatewayError, PaymentGateway, PaymentIntent};
pub use payments::{CancelOutcome, FailOutcome, OpenPayment, PaymentLedger, SettleOutcome};
pub use reconciliation::Reconciliation;
pub use sales::{
    CheckoutResult, InPersonCheckout, OnlineCheckout, SaleDetail, SaleService, SettlementCheck,
};
pub use webhook::{WebhookError, WebhookOutcome, WebhookProcessor};

use std::sync::Arc;

use saleledger_core::token::ConfirmationTokenService;
use saleledger_core::webhook::WebhookVerifier;
use saleledger_db::Database;

use crate::lots::LotAllocator;
use crate::stock::StockLedger;

// =============================================================================
// Engine
// =============================================================================

/// Entry point holding the database, configuration and collaborators.
///
/// Cheap to clone. Services are built per call and share the same pool.
#[derive(Debug, Clone)]
pub struct Engine {
    db: Database,
    config: Arc<EngineConfig>,
    auditor: Auditor,
    tokens: ConfirmationTokenService,
    verifier: WebhookVerifier,
}

impl Engine {
    /// Validates `config`, opens the database and runs migrations.
    pub async fn open(config: EngineConfig, sink: Arc<dyn AuditSink>) -> EngineResult<Self> {
        config.validate()?;
        let db = Database::new(config.db_config()).await?;
        Ok(Engine::new(db, config, sink))
    }

    /// Builds an engine over an existing database.
    pub fn new(db: Database, config: EngineConfig, sink: Arc<dyn AuditSink>) -> Self {
        let tokens = ConfirmationTokenService::new(config.confirmation_secret());
        let verifier = WebhookVerifier::new(
            config.webhook.signing_secret.as_bytes(),
            config.webhook.tolerance_secs,
        );

        Engine {
            db,
            config: Arc::new(config),
            auditor: Auditor::new(sink),
            tokens,
            verifier,
        }
    }

    pub fn stock(&self) -> StockLedger {
        StockLedger::new(self.db.clone())
    }

    pub fn lots(&self) -> LotAllocator {
        LotAllocator::new(self.db.clone())
    }

    pub fn sales(&self) -> SaleService {
        SaleService::new(
            self.db.clone(),
            self.auditor.clone(),
            self.config.inventory.consume_lots,
        )
    }

    pub fn payments(&self) -> PaymentLedger {
        PaymentLedger::new(self.db.clone(), self.auditor.clone())
    }

    pub fn reconciliation(&self) -> Reconciliation {
        Reconciliation::new(self.db.clone())
    }

    pub fn webhooks(&self) -> WebhookProcessor {
        WebhookProcessor::new(self.verifier.clone(), self.payments())
    }

    pub fn confirmations(&self) -> ConfirmationService {
        ConfirmationService::new(self.tokens.clone(), self.config.token_ttl(), self.payments())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
