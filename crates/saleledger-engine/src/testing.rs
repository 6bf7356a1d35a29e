//! Shared fixtures for the engine's unit tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use saleledger_core::webhook::WebhookVerifier;
use saleledger_core::{LineRequest, PaymentMethod};
use saleledger_db::{Database, DbConfig, NewProduct};

use crate::audit::{AuditAction, AuditError, AuditEvent, AuditSink, TracingAuditSink};
use crate::config::EngineConfig;
use crate::gateway::{GatewayError, IntentRequest, PaymentGateway, PaymentIntent};
use crate::sales::{InPersonCheckout, OnlineCheckout};
use crate::Engine;

// =============================================================================
// Sinks
// =============================================================================

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn actions(&self) -> Vec<AuditAction> {
        self.events().iter().map(|e| e.action).collect()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub(crate) struct FailingSink;

impl AuditSink for FailingSink {
    fn record(&self, _event: &AuditEvent) -> Result<(), AuditError> {
        Err(AuditError("sink offline".into()))
    }
}

// =============================================================================
// Gateways
// =============================================================================

/// Answers every request with `pi_<transaction id>` and remembers it.
#[derive(Default)]
pub(crate) struct StaticGateway {
    requests: Mutex<Vec<IntentRequest>>,
}

impl StaticGateway {
    pub(crate) fn requests(&self) -> Vec<IntentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl PaymentGateway for StaticGateway {
    async fn create_intent(&self, request: IntentRequest) -> Result<PaymentIntent, GatewayError> {
        let intent = PaymentIntent {
            id: format!("pi_{}", request.transaction_id),
            client_secret: Some(format!("pi_{}_secret", request.transaction_id)),
        };
        self.requests.lock().unwrap().push(request);
        Ok(intent)
    }
}

pub(crate) struct FailingGateway;

impl PaymentGateway for FailingGateway {
    async fn create_intent(&self, _request: IntentRequest) -> Result<PaymentIntent, GatewayError> {
        Err(GatewayError::Unavailable("connection reset".into()))
    }
}

// =============================================================================
// Engines & Data
// =============================================================================

pub(crate) async fn engine() -> (Engine, Arc<RecordingSink>) {
    engine_with(EngineConfig::for_tests()).await
}

pub(crate) async fn engine_with(config: EngineConfig) -> (Engine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    (Engine::new(db, config, sink.clone()), sink)
}

/// Engine over a temporary database file, for tests that need several
/// connections writing at once.
pub(crate) async fn file_engine() -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::new(dir.path().join("ledger.db"))
        .max_connections(8)
        .busy_timeout(Duration::from_secs(10));
    let db = Database::new(config).await.unwrap();
    let engine = Engine::new(db, EngineConfig::for_tests(), Arc::new(TracingAuditSink));
    (engine, dir)
}

static NEXT_SKU: AtomicU64 = AtomicU64::new(1);

/// Inserts an active product with `stock` units and returns its id.
pub(crate) async fn product(engine: &Engine, price_cents: i64, stock: i64) -> i64 {
    let sku = NEXT_SKU.fetch_add(1, Ordering::Relaxed);
    let product = engine
        .database()
        .products()
        .insert(&NewProduct {
            sku: format!("SKU-{:05}", sku),
            name: format!("Test product {}", sku),
            price_cents,
        })
        .await
        .unwrap();
    engine
        .database()
        .stock()
        .set(product.id, stock)
        .await
        .unwrap();
    product.id
}

pub(crate) fn in_person(product_id: i64, quantity: i64) -> InPersonCheckout {
    InPersonCheckout {
        buyer_id: None,
        seller_id: 1,
        method: PaymentMethod::Cash,
        promotion_id: None,
        items: vec![LineRequest::new(product_id, quantity)],
    }
}

pub(crate) fn online(product_id: i64, quantity: i64) -> OnlineCheckout {
    OnlineCheckout {
        buyer_id: 100,
        address: "14 Harbour Road, Clifton, Karachi".into(),
        promotion_id: None,
        items: vec![LineRequest::new(product_id, quantity)],
    }
}

/// Signature header the configured gateway secret would produce now.
pub(crate) fn signed(engine: &Engine, body: &[u8]) -> String {
    let webhook = &engine.config().webhook;
    WebhookVerifier::new(webhook.signing_secret.as_bytes(), webhook.tolerance_secs)
        .sign(body, chrono::Utc::now().timestamp())
}
