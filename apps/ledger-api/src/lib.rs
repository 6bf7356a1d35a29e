//! # ledger-api
//!
//! HTTP surface of the sale ledger.
//!
//! ## Routes
//! ```text
//! ┌────────┬──────────────────────────┬────────────────────────────────────┐
//! │ GET    │ /health                  │ database reachable                 │
//! │ POST   │ /webhooks/gateway        │ signed gateway notification        │
//! │ POST   │ /payments/confirm        │ manual confirmation token          │
//! │ GET    │ /sales/{id}/balance      │ declared / paid / pending          │
//! │ POST   │ /sales/{id}/cancel       │ cancel and return stock            │
//! └────────┴──────────────────────────┴────────────────────────────────────┘
//! ```

pub mod client_ip;
pub mod error;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::Router;
use std::convert::Infallible;

use saleledger_engine::Engine;

pub use error::{ApiError, ApiResult, ErrorCode};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Engine,
    trusted_headers: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        let trusted_headers = engine
            .config()
            .server
            .trusted_proxy_headers
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        AppState {
            engine,
            trusted_headers: Arc::new(trusted_headers),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/webhooks/gateway", post(routes::gateway_webhook))
        .route("/payments/confirm", post(routes::confirm_payment))
        .route("/sales/{id}/balance", get(routes::sale_balance))
        .route("/sales/{id}/cancel", post(routes::cancel_sale))
        .with_state(state)
}

/// Caller address as recorded in audit events.
#[derive(Debug, Clone, Default)]
pub struct ClientIp(pub Option<String>);

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Ok(ClientIp(client_ip::resolve(
            &parts.headers,
            &state.trusted_headers,
            peer,
        )))
    }
}
