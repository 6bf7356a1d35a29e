//! # Error Types
//!
//! Domain errors for saleledger-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  saleledger-core (this file)                                           │
//! │  ├── CoreError        - business rule violations                       │
//! │  └── ValidationError  - malformed input                                │
//! │                                                                         │
//! │  saleledger-core (token.rs, webhook.rs)                                │
//! │  ├── TokenError       - confirmation token rejected                    │
//! │  └── SignatureError   - webhook signature rejected                     │
//! │                                                                         │
//! │  saleledger-db        DbError      - storage failures                  │
//! │  saleledger-engine    EngineError  - categorised for callers           │
//! │  ledger-api           ApiError     - HTTP status + code                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::money::Money;
use crate::types::{PaymentState, SaleStatus};

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Product unknown to the catalog.
    #[error("Product not found: {0}")]
    ProductNotFound(i64),

    /// Product exists but is withdrawn from sale.
    #[error("Product {0} is not available for sale")]
    ProductInactive(i64),

    /// Not enough stock to cover the requested quantity.
    ///
    /// ## When This Occurs
    /// - Validation pass sees `available < requested`
    /// - The conditional decrement loses a race to a concurrent sale
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: i64,
        available: i64,
        requested: i64,
    },

    /// Lots of the product cannot cover the requested quantity.
    #[error("Insufficient lot quantity for product {product_id}: available {available}, requested {requested}")]
    InsufficientLotQuantity {
        product_id: i64,
        available: i64,
        requested: i64,
    },

    #[error("Sale not found: {0}")]
    SaleNotFound(i64),

    /// Transition not allowed from the current sale state.
    ///
    /// ## When This Occurs
    /// - Cancelling an already cancelled or voided sale
    /// - Opening a payment on a sale that is not pending
    #[error("Cannot {action} sale {sale_id} in state {current}")]
    InvalidSaleState {
        sale_id: i64,
        current: SaleStatus,
        action: &'static str,
    },

    #[error("Payment transaction not found: {0}")]
    TransactionNotFound(String),

    /// Transition not allowed from the current transaction state.
    ///
    /// ## When This Occurs
    /// - Settling a FAILED or CANCELLED transaction
    #[error("Cannot {action} payment transaction {transaction_id} in state {current}")]
    InvalidTransactionState {
        transaction_id: i64,
        current: PaymentState,
        action: &'static str,
    },

    /// The new payment would push the sale past its declared total.
    /// `headroom` is what is still unclaimed after completed and pending
    /// payments.
    #[error("Amount {requested} exceeds open headroom {headroom}")]
    AmountExceedsBalance { requested: Money, headroom: Money },

    /// Another transaction already claims this external reference.
    #[error("External reference already in use: {0}")]
    DuplicateExternalRef(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Caller must re-query state before retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            CoreError::InsufficientStock { .. }
                | CoreError::InsufficientLotQuantity { .. }
                | CoreError::InvalidSaleState { .. }
                | CoreError::InvalidTransactionState { .. }
                | CoreError::DuplicateExternalRef(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CoreError::SaleNotFound(_) | CoreError::TransactionNotFound(_)
        )
    }

    /// Bad input; safe to retry with corrected input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::ProductNotFound(_)
                | CoreError::ProductInactive(_)
                | CoreError::AmountExceedsBalance { .. }
        )
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("A sale needs at least one line item")]
    EmptySale,

    #[error("Too many line items: {actual} (max {max})")]
    TooManyLineItems { max: usize, actual: usize },

    #[error("Invalid quantity {quantity}: must be between 1 and {max}")]
    InvalidQuantity { quantity: i64, max: i64 },

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Money),

    #[error("{field} is required")]
    Required { field: &'static str },

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("Invalid {field}: {reason}")]
    InvalidFormat {
        field: &'static str,
        reason: &'static str,
    },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
