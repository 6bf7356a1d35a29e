//! # Repository Module
//!
//! Table-level access for the ledger.
//!
//! ## Conditional Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Invariants are enforced by the WHERE clause of the write itself,       │
//! │  never by a read followed by a write:                                   │
//! │                                                                         │
//! │    UPDATE stock_levels SET quantity = quantity - 3                      │
//! │     WHERE product_id = 7 AND quantity >= 3                              │
//! │                                                                         │
//! │    rows_affected == 1  → applied                                        │
//! │    rows_affected == 0  → invariant would break; caller decides why      │
//! │                                                                         │
//! │  The same shape guards state machines:                                  │
//! │    UPDATE payment_transactions SET state = 'completed'                  │
//! │     WHERE id = ? AND state = 'pending'                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog view (price, active flag)
//! - [`stock::StockRepository`] - Authoritative available quantities
//! - [`lot::LotRepository`] - Lots with expiry dates
//! - [`sale::SaleRepository`] - Sales and line items
//! - [`shipment::ShipmentRepository`] - Online sale shipments
//! - [`payment::PaymentRepository`] - Payment transactions

pub mod lot;
pub mod payment;
pub mod product;
pub mod sale;
pub mod shipment;
pub mod stock;
