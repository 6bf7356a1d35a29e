//! # Lot Repository
//!
//! Batches of a product with optional expiry dates. Lots are ordered here
//! the same way the allocator orders them (FEFO), so listings read
//! naturally; the allocator does not rely on it.

use chrono::{NaiveDate, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use saleledger_core::Lot;

const LOT_SELECT: &str = "SELECT id, product_id, code, quantity, expiry_date
       FROM lots
      WHERE product_id = ?1
      ORDER BY expiry_date IS NULL, expiry_date, id";

#[derive(Debug, Clone)]
pub struct LotRepository {
    pool: SqlitePool,
}

impl LotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        LotRepository { pool }
    }

    /// All lots of a product, including empty ones.
    pub async fn list_for_product(&self, product_id: i64) -> DbResult<Vec<Lot>> {
        let lots = sqlx::query_as::<_, Lot>(LOT_SELECT)
            .bind(product_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(lots)
    }

    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Lot>> {
        let lot = sqlx::query_as::<_, Lot>(
            "SELECT id, product_id, code, quantity, expiry_date FROM lots WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lot)
    }

    /// Receives a lot.
    pub async fn insert(
        &self,
        product_id: i64,
        code: Option<&str>,
        quantity: i64,
        expiry_date: Option<NaiveDate>,
    ) -> DbResult<Lot> {
        debug!(product_id, quantity, ?expiry_date, "Inserting lot");

        let lot = sqlx::query_as::<_, Lot>(
            "INSERT INTO lots (product_id, code, quantity, expiry_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING id, product_id, code, quantity, expiry_date",
        )
        .bind(product_id)
        .bind(code)
        .bind(quantity)
        .bind(expiry_date)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(lot)
    }

    // =========================================================================
    // Transaction-scoped
    // =========================================================================

    /// No-op write over a product's lots to take the write lock before
    /// reading them.
    pub async fn touch_product(conn: &mut SqliteConnection, product_id: i64) -> DbResult<()> {
        sqlx::query("UPDATE lots SET quantity = quantity WHERE product_id = ?1")
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn list_for_product_in(
        conn: &mut SqliteConnection,
        product_id: i64,
    ) -> DbResult<Vec<Lot>> {
        let lots = sqlx::query_as::<_, Lot>(LOT_SELECT)
            .bind(product_id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(lots)
    }

    /// Removes `quantity` from one lot iff it still holds that many.
    pub async fn try_take(conn: &mut SqliteConnection, lot_id: i64, quantity: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE lots SET quantity = quantity - ?2 WHERE id = ?1 AND quantity >= ?2",
        )
        .bind(lot_id)
        .bind(quantity)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
