//! # Stock Repository
//!
//! Authoritative available quantity per product.
//!
//! `stock_levels.quantity` never goes below zero: the decrement is a
//! conditional UPDATE and the column carries a CHECK constraint as a
//! backstop.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use saleledger_core::StockLevel;

/// Outcome of a conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    Applied,
    /// Fewer units than requested; nothing changed.
    Insufficient { available: i64 },
    /// The product has no stock row.
    Missing,
}

/// Repository for stock levels.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    pub async fn get(&self, product_id: i64) -> DbResult<Option<StockLevel>> {
        let level = sqlx::query_as::<_, StockLevel>(
            "SELECT product_id, quantity, updated_at FROM stock_levels WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(level)
    }

    /// Sets the level outright (receiving, stocktake, seeding).
    pub async fn set(&self, product_id: i64, quantity: i64) -> DbResult<()> {
        debug!(product_id, quantity, "Setting stock level");

        sqlx::query(
            "INSERT INTO stock_levels (product_id, quantity, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (product_id) DO UPDATE
                SET quantity = excluded.quantity, updated_at = excluded.updated_at",
        )
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Transaction-scoped
    // =========================================================================

    /// Removes `quantity` units iff at least that many are available.
    ///
    /// Takes the write lock even when nothing matches, so the follow-up read
    /// of the current level is consistent.
    pub async fn try_decrement(
        conn: &mut SqliteConnection,
        product_id: i64,
        quantity: i64,
    ) -> DbResult<StockDecrement> {
        let result = sqlx::query(
            "UPDATE stock_levels
                SET quantity = quantity - ?2, updated_at = ?3
              WHERE product_id = ?1 AND quantity >= ?2",
        )
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(StockDecrement::Applied);
        }

        let available: Option<i64> =
            sqlx::query_scalar("SELECT quantity FROM stock_levels WHERE product_id = ?1")
                .bind(product_id)
                .fetch_optional(&mut *conn)
                .await?;

        Ok(match available {
            Some(available) => StockDecrement::Insufficient { available },
            None => StockDecrement::Missing,
        })
    }

    /// Returns `quantity` units. False if the product has no stock row.
    pub async fn increment(
        conn: &mut SqliteConnection,
        product_id: i64,
        quantity: i64,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE stock_levels
                SET quantity = quantity + ?2, updated_at = ?3
              WHERE product_id = ?1",
        )
        .bind(product_id)
        .bind(quantity)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::product::NewProduct;
    use crate::{Database, DbConfig};

    async fn setup(quantity: i64) -> (Database, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db
            .products()
            .insert(&NewProduct {
                sku: "SKU-1".into(),
                name: "Thing".into(),
                price_cents: 500,
            })
            .await
            .unwrap();
        db.stock().set(product.id, quantity).await.unwrap();
        (db, product.id)
    }

    #[tokio::test]
    async fn test_decrement_applies_when_enough() {
        let (db, product_id) = setup(5).await;

        let mut tx = db.begin().await.unwrap();
        let outcome = StockRepository::try_decrement(&mut tx, product_id, 5).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome, StockDecrement::Applied);
        assert_eq!(db.stock().get(product_id).await.unwrap().unwrap().quantity, 0);
    }

    #[tokio::test]
    async fn test_decrement_refuses_to_go_negative() {
        let (db, product_id) = setup(2).await;

        let mut tx = db.begin().await.unwrap();
        let outcome = StockRepository::try_decrement(&mut tx, product_id, 3).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(outcome, StockDecrement::Insufficient { available: 2 });
        assert_eq!(db.stock().get(product_id).await.unwrap().unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_missing_row() {
        let (db, _) = setup(1).await;

        let mut tx = db.begin().await.unwrap();
        let outcome = StockRepository::try_decrement(&mut tx, 999, 1).await.unwrap();
        let restored = StockRepository::increment(&mut tx, 999, 1).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(outcome, StockDecrement::Missing);
        assert!(!restored);
    }

    #[tokio::test]
    async fn test_check_constraint_backstop() {
        let (db, product_id) = setup(1).await;

        let err = db.stock().set(product_id, -1).await.unwrap_err();
        assert!(err.is_integrity());
    }
}
