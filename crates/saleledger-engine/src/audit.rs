//! # Audit Trail
//!
//! One event per committed state transition, handed to an injected sink.
//!
//! ## Delivery Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  BEGIN ... COMMIT  ──►  Auditor::emit(event)  ──►  AuditSink::record    │
//! │                                 │                                       │
//! │                                 └── Err? warn! and carry on             │
//! │                                                                         │
//! │  Events are emitted only after COMMIT succeeds. A failing sink never   │
//! │  turns a committed sale or payment into an error.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

// =============================================================================
// Event
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SaleCreated,
    SaleCompleted,
    SaleCancelled,
    SaleVoided,
    PaymentSettled,
    PaymentFailed,
    PaymentCancelled,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SaleCreated => "sale_created",
            AuditAction::SaleCompleted => "sale_completed",
            AuditAction::SaleCancelled => "sale_cancelled",
            AuditAction::SaleVoided => "sale_voided",
            AuditAction::PaymentSettled => "payment_settled",
            AuditAction::PaymentFailed => "payment_failed",
            AuditAction::PaymentCancelled => "payment_cancelled",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntity {
    Sale,
    PaymentTransaction,
}

/// Who caused a transition and from where.
///
/// Both fields are empty for webhook and sweep originated changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditContext {
    pub actor_id: Option<i64>,
    pub client_ip: Option<String>,
}

impl AuditContext {
    pub fn system() -> Self {
        AuditContext::default()
    }

    pub fn actor(actor_id: i64) -> Self {
        AuditContext {
            actor_id: Some(actor_id),
            client_ip: None,
        }
    }

    pub fn with_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: i64,
    pub actor_id: Option<i64>,
    pub client_ip: Option<String>,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: AuditAction,
        entity: AuditEntity,
        entity_id: i64,
        ctx: &AuditContext,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Self {
        AuditEvent {
            id: Uuid::new_v4(),
            action,
            entity,
            entity_id,
            actor_id: ctx.actor_id,
            client_ip: ctx.client_ip.clone(),
            before,
            after,
            at: Utc::now(),
        }
    }
}

// =============================================================================
// Sink
// =============================================================================

#[derive(Debug, Error)]
#[error("Audit sink failed: {0}")]
pub struct AuditError(pub String);

/// Destination for audit events. Called synchronously after commit.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Writes events to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let payload = serde_json::to_string(event).map_err(|e| AuditError(e.to_string()))?;
        info!(
            target: "audit",
            action = %event.action,
            entity_id = event.entity_id,
            actor_id = ?event.actor_id,
            event = %payload,
            "Audit event"
        );
        Ok(())
    }
}

/// Shared handle the services emit through. Swallows sink failures.
#[derive(Clone)]
pub struct Auditor {
    sink: Arc<dyn AuditSink>,
}

impl fmt::Debug for Auditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Auditor").finish_non_exhaustive()
    }
}

impl Auditor {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Auditor { sink }
    }

    pub fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.sink.record(&event) {
            warn!(
                error = %e,
                action = %event.action,
                entity_id = event.entity_id,
                "Audit event dropped"
            );
        }
    }
}

impl Default for Auditor {
    fn default() -> Self {
        Auditor::new(Arc::new(TracingAuditSink))
    }
}
