//! # saleledger-db: Persistence Layer
//!
//! SQLite storage for sales, payment transactions, stock levels and lots.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  saleledger-engine (SaleService, PaymentLedger, WebhookProcessor)       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  saleledger-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ Stock / Lot   │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Sale / Ship   │    │ 001_init.sql │  │   │
//! │  │   │ begin()       │    │ Payment       │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Two Kinds of Repository Calls
//!
//! - `db.sales().get_by_id(id)`: methods on a repository run on the pool.
//!   Used for reads and single-statement writes.
//! - `SaleRepository::set_status_from(&mut tx, ..)`: associated functions
//!   take a connection and run inside the caller's transaction. Every
//!   multi-row invariant is enforced through these.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use saleledger_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("ledger.db")).await?;
//! let level = db.stock().get(product_id).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::lot::LotRepository;
pub use repository::payment::{NewTransaction, PaymentRepository};
pub use repository::product::{NewProduct, ProductRepository};
pub use repository::sale::{NewLineItem, NewSale, SaleRepository};
pub use repository::shipment::ShipmentRepository;
pub use repository::stock::{StockDecrement, StockRepository};
