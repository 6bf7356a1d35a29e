//! Request handlers. Each one resolves the caller, delegates to one engine
//! service and maps the outcome.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use saleledger_core::{Balance, Sale};
use saleledger_engine::{AuditContext, SettleOutcome, WebhookOutcome};

use crate::error::{ApiError, ApiResult, ErrorCode};
use crate::{AppState, ClientIp};

/// Header carrying the gateway signature.
pub const SIGNATURE_HEADER: &str = "gateway-signature";

fn audit_context(actor_id: Option<i64>, ClientIp(ip): ClientIp) -> AuditContext {
    AuditContext {
        actor_id,
        client_ip: ip,
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.database().health_check().await {
        (StatusCode::OK, Json(json!({ "status": "ok" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "database unavailable" })),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            ApiError::bad_request(ErrorCode::SignatureInvalid, "Missing gateway signature")
        })?;

    let outcome = state.engine.webhooks().handle(&body, signature).await?;
    debug!(?outcome, "Gateway webhook handled");

    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub token: String,
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    client: ClientIp,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<Json<SettleOutcome>> {
    let ctx = audit_context(None, client);
    let outcome = state
        .engine
        .confirmations()
        .confirm(request.token.trim(), &ctx)
        .await?;
    Ok(Json(outcome))
}

pub async fn sale_balance(
    State(state): State<AppState>,
    Path(sale_id): Path<i64>,
) -> ApiResult<Json<Balance>> {
    Ok(Json(state.engine.reconciliation().balance(sale_id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub actor_id: Option<i64>,
}

pub async fn cancel_sale(
    State(state): State<AppState>,
    Path(sale_id): Path<i64>,
    client: ClientIp,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<Sale>> {
    let ctx = audit_context(request.actor_id, client);
    Ok(Json(state.engine.sales().cancel(sale_id, &ctx).await?))
}

// =============================================================================
// Route Tests
// =============================================================================
