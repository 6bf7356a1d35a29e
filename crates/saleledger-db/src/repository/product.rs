//! # Product Repository
//!
//! The ledger's view of the catalog. Sales read a product's existence,
//! active flag and current price; catalog management itself lives
//! elsewhere, so writes here exist for seeding and tests.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use saleledger_core::Product;

const PRODUCT_COLUMNS: &str =
    "id, sku, name, price_cents, is_active, created_at, updated_at";

/// Fields supplied when registering a product.
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
}

/// Repository for product reads.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by ID, active or not.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?1");
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Inserts an active product and returns it with its assigned id.
    pub async fn insert(&self, new: &NewProduct) -> DbResult<Product> {
        debug!(sku = %new.sku, "Inserting product");

        let now = Utc::now();
        let sql = format!(
            "INSERT INTO products (sku, name, price_cents, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             RETURNING {PRODUCT_COLUMNS}"
        );

        sqlx::query_as::<_, Product>(&sql)
            .bind(&new.sku)
            .bind(&new.name)
            .bind(new.price_cents)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
                    field,
                    value: new.sku.clone(),
                },
                other => other,
            })
    }

    /// Activates or deactivates a product. Returns false if it doesn't exist.
    pub async fn set_active(&self, id: i64, active: bool) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE products SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(active)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Total number of products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    fn widget() -> NewProduct {
        NewProduct {
            sku: "WID-001".into(),
            name: "Widget".into(),
            price_cents: 1000,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db.products().insert(&widget()).await.unwrap();

        let loaded = db.products().get_by_id(product.id).await.unwrap().unwrap();
        assert_eq!(loaded.sku, "WID-001");
        assert_eq!(loaded.price_cents, 1000);
        assert!(loaded.is_active);
        assert_eq!(db.products().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sku() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.products().insert(&widget()).await.unwrap();

        let err = db.products().insert(&widget()).await.unwrap_err();
        assert!(err.is_unique_violation_on("sku"));
    }

    #[tokio::test]
    async fn test_deactivate() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let product = db.products().insert(&widget()).await.unwrap();

        assert!(db.products().set_active(product.id, false).await.unwrap());
        assert!(!db.products().set_active(999, false).await.unwrap());

        let loaded = db.products().get_by_id(product.id).await.unwrap().unwrap();
        assert!(!loaded.is_active);
    }
}
