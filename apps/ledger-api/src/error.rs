//! # API Error Mapping
//!
//! ```text
//! EngineError::category()      HTTP
//! ─────────────────────────    ─────────────────────────
//! Validation                   400 validation_error
//! NotFound                     404 not_found
//! Conflict                     409 conflict
//! Transient                    503 unavailable
//! Integrity / Internal         500 (message withheld)
//!
//! Token rejection              400 token_invalid | token_expired
//! Webhook signature            400 signature_invalid
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use saleledger_core::token::TokenRejection;
use saleledger_engine::{EngineError, ErrorCategory, WebhookError};

/// Machine-readable error code in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ValidationError,
    TokenInvalid,
    TokenExpired,
    SignatureInvalid,
    NotFound,
    Conflict,
    Unavailable,
    IntegrityViolation,
    InternalError,
}

#[derive(Debug, Error)]
#[error("{status} {code:?}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: ErrorCode,
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        if let EngineError::Token(token) = &err {
            if err.category() == ErrorCategory::Validation {
                let code = match token.rejection() {
                    TokenRejection::Expired => ErrorCode::TokenExpired,
                    TokenRejection::Invalid => ErrorCode::TokenInvalid,
                };
                // Forged and expired tokens are logged apart by the engine;
                // the body only says which of the two applies.
                return ApiError::bad_request(code, "Confirmation token rejected");
            }
        }

        let (status, code) = match err.category() {
            ErrorCategory::Validation => (StatusCode::BAD_REQUEST, ErrorCode::ValidationError),
            ErrorCategory::NotFound => (StatusCode::NOT_FOUND, ErrorCode::NotFound),
            ErrorCategory::Conflict => (StatusCode::CONFLICT, ErrorCode::Conflict),
            ErrorCategory::Transient => (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::Unavailable),
            ErrorCategory::Integrity => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorCode::IntegrityViolation,
            ),
            ErrorCategory::Internal => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::InternalError),
        };

        let message = if status.is_server_error() {
            error!(error = %err, ?code, "Request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Temporarily unavailable, retry later".to_string(),
                _ => "Internal error".to_string(),
            }
        } else {
            err.to_string()
        };

        ApiError::new(status, code, message)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::SignatureInvalid(e) => {
                ApiError::bad_request(ErrorCode::SignatureInvalid, e.to_string())
            }
            WebhookError::Processing(e) => ApiError::from(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
