//! # Sale Repository
//!
//! Sales and their line items.
//!
//! ## Sale Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. CREATE (one transaction with the stock decrements)                  │
//! │     └── insert()            → Sale { status: Pending | Completed }      │
//! │     └── insert_line_item()  → SaleLineItem (price snapshot)             │
//! │                                                                         │
//! │  2. SETTLE (online only, from the payment ledger)                       │
//! │     └── set_status_from(Pending → Completed)                            │
//! │                                                                         │
//! │  3. REVERSE                                                             │
//! │     └── touch()             → write lock                                │
//! │     └── set_status_from(current → Cancelled | Voided)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `total_cents` is written once at insert and never updated.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use saleledger_core::{Sale, SaleChannel, SaleLineItem, SaleStatus};

const SALE_COLUMNS: &str = "id, channel, status, total_cents, buyer_id, seller_id, promotion_id,
     shipment_id, created_at, updated_at, completed_at, cancelled_at";

const LINE_ITEM_COLUMNS: &str =
    "id, sale_id, product_id, quantity, unit_price_cents, subtotal_cents, created_at";

/// Header of a sale about to be created.
#[derive(Debug, Clone)]
pub struct NewSale {
    pub channel: SaleChannel,
    pub status: SaleStatus,
    pub total_cents: i64,
    pub buyer_id: Option<i64>,
    pub seller_id: Option<i64>,
    pub promotion_id: Option<i64>,
}

/// A priced line about to be attached to a sale.
#[derive(Debug, Clone, Copy)]
pub struct NewLineItem {
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
}

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    /// Line items of a sale in insertion order.
    pub async fn line_items(&self, sale_id: i64) -> DbResult<Vec<SaleLineItem>> {
        let sql = format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM sale_line_items WHERE sale_id = ?1 ORDER BY id"
        );
        let items = sqlx::query_as::<_, SaleLineItem>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    // =========================================================================
    // Transaction-scoped
    // =========================================================================

    /// Inserts the sale header. `completed_at` is stamped for sales created
    /// already completed.
    pub async fn insert(conn: &mut SqliteConnection, new: &NewSale) -> DbResult<Sale> {
        debug!(channel = ?new.channel, total_cents = new.total_cents, "Inserting sale");

        let now = Utc::now();
        let completed_at = (new.status == SaleStatus::Completed).then_some(now);
        let sql = format!(
            "INSERT INTO sales (channel, status, total_cents, buyer_id, seller_id, promotion_id,
                                created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)
             RETURNING {SALE_COLUMNS}"
        );

        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(new.channel)
            .bind(new.status)
            .bind(new.total_cents)
            .bind(new.buyer_id)
            .bind(new.seller_id)
            .bind(new.promotion_id)
            .bind(now)
            .bind(completed_at)
            .fetch_one(&mut *conn)
            .await?;

        Ok(sale)
    }

    pub async fn insert_line_item(
        conn: &mut SqliteConnection,
        sale_id: i64,
        item: &NewLineItem,
    ) -> DbResult<SaleLineItem> {
        let sql = format!(
            "INSERT INTO sale_line_items
                (sale_id, product_id, quantity, unit_price_cents, subtotal_cents, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING {LINE_ITEM_COLUMNS}"
        );

        let line = sqlx::query_as::<_, SaleLineItem>(&sql)
            .bind(sale_id)
            .bind(item.product_id)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.subtotal_cents)
            .bind(Utc::now())
            .fetch_one(&mut *conn)
            .await?;

        Ok(line)
    }

    pub async fn get_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {SALE_COLUMNS} FROM sales WHERE id = ?1");
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(sale)
    }

    pub async fn line_items_in(
        conn: &mut SqliteConnection,
        sale_id: i64,
    ) -> DbResult<Vec<SaleLineItem>> {
        let sql = format!(
            "SELECT {LINE_ITEM_COLUMNS} FROM sale_line_items WHERE sale_id = ?1 ORDER BY id"
        );
        let items = sqlx::query_as::<_, SaleLineItem>(&sql)
            .bind(sale_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(items)
    }

    /// Bumps `updated_at` to take the write lock before reading the sale.
    /// False if the sale doesn't exist.
    pub async fn touch(conn: &mut SqliteConnection, id: i64) -> DbResult<bool> {
        let result = sqlx::query("UPDATE sales SET updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Moves the sale `from → to` iff it is still in `from`.
    ///
    /// Stamps `completed_at` on completion and `cancelled_at` on cancel or
    /// void.
    pub async fn set_status_from(
        conn: &mut SqliteConnection,
        id: i64,
        from: SaleStatus,
        to: SaleStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE sales
                SET status = ?3,
                    updated_at = ?4,
                    completed_at = CASE WHEN ?3 = 'completed' THEN ?4 ELSE completed_at END,
                    cancelled_at = CASE WHEN ?3 IN ('cancelled', 'voided') THEN ?4 ELSE cancelled_at END
              WHERE id = ?1 AND status = ?2",
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_shipment(
        conn: &mut SqliteConnection,
        sale_id: i64,
        shipment_id: i64,
    ) -> DbResult<()> {
        sqlx::query("UPDATE sales SET shipment_id = ?2 WHERE id = ?1")
            .bind(sale_id)
            .bind(shipment_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
