//! # Domain Types
//!
//! The persisted entities of the reconciliation core and the small value
//! types that travel between layers.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌─────────────────┐ 1   * ┌──────────────────┐                        │
//! │  │      Sale       │───────│  SaleLineItem    │── product_id ──┐       │
//! │  │  ─────────────  │       │  unit price      │                │       │
//! │  │  id (i64)       │       │  (snapshot)      │                ▼       │
//! │  │  channel        │       └──────────────────┘     ┌──────────────┐  │
//! │  │  status         │                                │  StockLevel  │  │
//! │  │  total_cents    │ 1   * ┌──────────────────┐     │  Lot (FEFO)  │  │
//! │  │  (fixed)        │───────│PaymentTransaction│     └──────────────┘  │
//! │  └─────────────────┘       │  state           │                       │
//! │                            │  external_ref    │◄── gateway intent id  │
//! │                            │  (unique)        │                       │
//! │                            └──────────────────┘                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every entity is keyed by an immutable integer id assigned by the store.
//! Amounts are stored as `*_cents` columns and exposed as [`Money`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Sale Channel
// =============================================================================

/// Where the sale was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleChannel {
    /// At the register. Settled on the spot.
    InPerson,
    /// Checkout with shipment; paid asynchronously.
    Online,
}

// =============================================================================
// Sale Status
// =============================================================================

/// Lifecycle state of a sale.
///
/// ## State Machine
/// ```text
///   create_online ──► PENDING ──(fully paid)──► COMPLETED ◄── create_in_person
///                        │                          │
///                        ├──── cancel ──► CANCELLED ◄┤
///                        └──── void ────► VOIDED ◄───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Pending,
    Completed,
    Cancelled,
    Voided,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
            SaleStatus::Voided => "voided",
        }
    }

    /// Cancelled and voided sales accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SaleStatus::Cancelled | SaleStatus::Voided)
    }

    /// Whether stock can still be reversed (cancel or void).
    pub fn can_reverse(&self) -> bool {
        matches!(self, SaleStatus::Pending | SaleStatus::Completed)
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash at the register.
    Cash,
    /// Card through the gateway (intent + webhook).
    Card,
    /// QR transfer, confirmed manually with a signed token.
    Qr,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Qr => "qr",
        }
    }
}

// =============================================================================
// Payment State
// =============================================================================

/// State of a single payment attempt.
///
/// `PENDING` moves exactly once to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Completed => "completed",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentState::Pending)
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Catalog View
// =============================================================================

/// The catalog's view of a product: existence, activity and current price.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    #[inline]
    pub fn price(&self) -> Money {
        Money::from_cents(self.price_cents)
    }
}

// =============================================================================
// Stock & Lots
// =============================================================================

/// Authoritative available quantity for one product.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct StockLevel {
    pub product_id: i64,
    pub quantity: i64,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// A batch of one product with an optional expiry date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Lot {
    pub id: i64,
    pub product_id: i64,
    /// Supplier batch code, printed on the packaging.
    pub code: Option<String>,
    /// On-hand quantity.
    pub quantity: i64,
    #[ts(as = "Option<String>")]
    pub expiry_date: Option<NaiveDate>,
}

/// Quantity taken from one lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LotAllocation {
    pub lot_id: i64,
    pub quantity: i64,
}

// =============================================================================
// Sale
// =============================================================================

/// One commercial transaction.
///
/// `total_cents` is fixed at creation and never recomputed from line items.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: i64,
    pub channel: SaleChannel,
    pub status: SaleStatus,
    pub total_cents: i64,
    pub buyer_id: Option<i64>,
    pub seller_id: Option<i64>,
    pub promotion_id: Option<i64>,
    pub shipment_id: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line of a sale. Unit price is a snapshot taken at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleLineItem {
    pub id: i64,
    pub sale_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl SaleLineItem {
    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    #[inline]
    pub fn subtotal(&self) -> Money {
        Money::from_cents(self.subtotal_cents)
    }
}

/// Companion shipment record of an online sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Shipment {
    pub id: i64,
    pub sale_id: i64,
    pub address: String,
    pub status: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// A requested line at checkout, before prices are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineRequest {
    pub product_id: i64,
    pub quantity: i64,
}

impl LineRequest {
    pub fn new(product_id: i64, quantity: i64) -> Self {
        LineRequest {
            product_id,
            quantity,
        }
    }
}

// =============================================================================
// Payment Transaction
// =============================================================================

/// One payment attempt against a sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PaymentTransaction {
    pub id: i64,
    pub sale_id: i64,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub state: PaymentState,
    /// Gateway intent id or manual confirmation reference. Unique when set.
    pub external_ref: Option<String>,
    pub description: String,
    /// Provider error code, truncated to the column width.
    pub error_code: Option<String>,
    /// Staff member or processor that handled the payment.
    pub processor_id: Option<i64>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

/// Addresses a transaction either by id or by external reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionRef {
    Id(i64),
    External(String),
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionRef::Id(id) => write!(f, "#{}", id),
            TransactionRef::External(reference) => f.write_str(reference),
        }
    }
}

impl From<i64> for TransactionRef {
    fn from(id: i64) -> Self {
        TransactionRef::Id(id)
    }
}

// =============================================================================
// Balance
// =============================================================================

/// Reconciliation view of one sale.
///
/// ```text
///  declared_total ├──────── paid ────────┼──── pending ────┼── headroom ──┤
///                                         └──────────── remaining ─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Balance {
    pub sale_id: i64,
    pub declared_total: Money,
    /// Sum of COMPLETED transactions only.
    pub paid_total: Money,
    /// Sum of PENDING transactions.
    pub pending_total: Money,
    /// `max(declared_total - paid_total, 0)`.
    pub remaining: Money,
}

impl Balance {
    pub fn compute(sale_id: i64, declared_total: Money, paid_total: Money, pending_total: Money) -> Self {
        Balance {
            sale_id,
            declared_total,
            paid_total,
            pending_total,
            remaining: declared_total.remaining_after(paid_total),
        }
    }

    /// What a new PENDING transaction may still claim.
    pub fn open_headroom(&self) -> Money {
        self.remaining.remaining_after(self.pending_total)
    }

    pub fn is_settled(&self) -> bool {
        self.paid_total >= self.declared_total
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
