//! # saleledger-core: Pure Reconciliation Logic
//!
//! Everything in this crate is deterministic and free of I/O. The database
//! crate persists these types, the engine crate orchestrates them.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       saleledger Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                ledger-api (axum HTTP adapter)                   │   │
//! │  │     webhook ──► confirm ──► balance ──► cancel                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             saleledger-engine (orchestration)                   │   │
//! │  │   SaleService, PaymentLedger, WebhookProcessor, ...             │   │
//! │  └───────────────┬─────────────────────────────┬───────────────────┘   │
//! │                  │                             │                        │
//! │  ┌───────────────▼──────────────┐  ┌───────────▼───────────────────┐   │
//! │  │  ★ saleledger-core ★         │  │  saleledger-db                │   │
//! │  │  money, types, validation    │◄─│  SQLite repositories          │   │
//! │  │  lots, token, webhook        │  │  migrations                   │   │
//! │  └──────────────────────────────┘  └───────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Sales, line items, payment transactions, stock, lots
//! - [`money`] - Integer minor-unit money
//! - [`error`] - Domain error types
//! - [`validation`] - Input rules
//! - [`lots`] - FEFO lot allocation
//! - [`token`] - Signed confirmation tokens
//! - [`webhook`] - Gateway signature verification and event parsing
//!
//! ## Example
//!
//! ```rust
//! use saleledger_core::money::Money;
//!
//! let unit = Money::from_cents(1000);
//! let total = unit.multiply_quantity(3).unwrap();
//! assert_eq!(total.to_string(), "30.00");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod lots;
pub mod money;
pub mod token;
pub mod types;
pub mod validation;
pub mod webhook;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct line items in one sale.
pub const MAX_LINE_ITEMS: usize = 100;

/// Maximum quantity of a single line item.
///
/// ## Business Reason
/// Catches fat-finger orders (1000 instead of 10) before stock is touched.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Width of the stored provider error code column.
pub const ERROR_CODE_MAX_LEN: usize = 50;

/// Width of the external reference column.
pub const EXTERNAL_REF_MAX_LEN: usize = 255;

/// Width of the payment description column.
pub const DESCRIPTION_MAX_LEN: usize = 255;

/// Width of the shipping address column.
pub const ADDRESS_MAX_LEN: usize = 500;
