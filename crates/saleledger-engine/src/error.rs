//! # Engine Error Types
//!
//! One error type for every orchestrated operation, with a category that
//! callers branch on instead of matching variants.
//!
//! ## Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Validation  bad input; fix the request                                 │
//! │  Conflict    state moved underneath the caller; re-read and decide      │
//! │  NotFound    unknown sale or transaction                                │
//! │  Transient   retry later with the same input                            │
//! │  Integrity   a storage constraint caught a write the engine let past    │
//! │  Internal    anything else                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Idempotent repeats are never errors: see `SettleOutcome` and
//! `FailOutcome`.

use serde::Serialize;
use thiserror::Error;

use saleledger_core::token::TokenError;
use saleledger_core::CoreError;
use saleledger_db::DbError;

use crate::config::ConfigError;
use crate::gateway::GatewayError;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Business rule violation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage failure not attributable to a business rule.
    #[error("Storage error: {0}")]
    Db(DbError),

    /// Confirmation token rejected or unsignable.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Payment gateway call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Coarse error class exposed to adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Conflict,
    NotFound,
    Transient,
    Integrity,
    Internal,
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Core(e) if e.is_validation() => ErrorCategory::Validation,
            EngineError::Core(e) if e.is_conflict() => ErrorCategory::Conflict,
            EngineError::Core(e) if e.is_not_found() => ErrorCategory::NotFound,
            EngineError::Core(_) => ErrorCategory::Internal,

            EngineError::Db(DbError::NotFound { .. }) => ErrorCategory::NotFound,
            EngineError::Db(DbError::UniqueViolation { .. }) => ErrorCategory::Conflict,
            EngineError::Db(e) if e.is_transient() => ErrorCategory::Transient,
            EngineError::Db(e) if e.is_integrity() => ErrorCategory::Integrity,
            EngineError::Db(_) => ErrorCategory::Internal,

            EngineError::Token(TokenError::Signing(_)) => ErrorCategory::Internal,
            EngineError::Token(_) => ErrorCategory::Validation,

            EngineError::Gateway(_) => ErrorCategory::Transient,

            EngineError::Config(_) => ErrorCategory::Internal,
        }
    }

    /// Returns true if the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// A unique violation on `external_ref` is a business conflict; everything
/// else stays a storage error.
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UniqueViolation { ref field, value } if field.ends_with("external_ref") => {
                EngineError::Core(CoreError::DuplicateExternalRef(value))
            }
            other => EngineError::Db(other),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::from(DbError::from(err))
    }
}

impl From<saleledger_core::ValidationError> for EngineError {
    fn from(err: saleledger_core::ValidationError) -> Self {
        EngineError::Core(CoreError::Validation(err))
    }
}
