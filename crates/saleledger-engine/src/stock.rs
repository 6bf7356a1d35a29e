//! # Stock Ledger
//!
//! Reserve and release units of a product.
//!
//! The sufficiency check is the WHERE clause of the decrement, so two
//! sales racing for the last unit serialize on the database write lock and
//! exactly one of them sees `rows_affected == 1`.

use sqlx::SqliteConnection;
use tracing::debug;

use saleledger_core::validation::validate_quantity;
use saleledger_core::CoreError;
use saleledger_db::{Database, StockDecrement, StockRepository};

use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct StockLedger {
    db: Database,
}

impl StockLedger {
    pub fn new(db: Database) -> Self {
        StockLedger { db }
    }

    /// Removes `quantity` units, or fails without touching stock.
    pub async fn reserve(&self, product_id: i64, quantity: i64) -> EngineResult<()> {
        validate_quantity(quantity)?;

        let mut tx = self.db.begin().await?;
        Self::reserve_in(&mut tx, product_id, quantity).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Returns `quantity` units.
    pub async fn release(&self, product_id: i64, quantity: i64) -> EngineResult<()> {
        validate_quantity(quantity)?;

        let mut tx = self.db.begin().await?;
        Self::release_in(&mut tx, product_id, quantity).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Units currently available.
    pub async fn available(&self, product_id: i64) -> EngineResult<i64> {
        match self.db.stock().get(product_id).await? {
            Some(level) => Ok(level.quantity),
            None => Err(CoreError::ProductNotFound(product_id).into()),
        }
    }

    /// Reserve inside the caller's transaction.
    pub async fn reserve_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        quantity: i64,
    ) -> EngineResult<()> {
        match StockRepository::try_decrement(conn, product_id, quantity).await? {
            StockDecrement::Applied => {
                debug!(product_id, quantity, "Stock reserved");
                Ok(())
            }
            StockDecrement::Insufficient { available } => Err(CoreError::InsufficientStock {
                product_id,
                available,
                requested: quantity,
            }
            .into()),
            StockDecrement::Missing => Err(CoreError::ProductNotFound(product_id).into()),
        }
    }

    /// Release inside the caller's transaction.
    pub async fn release_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        quantity: i64,
    ) -> EngineResult<()> {
        if StockRepository::increment(conn, product_id, quantity).await? {
            debug!(product_id, quantity, "Stock released");
            Ok(())
        } else {
            Err(CoreError::ProductNotFound(product_id).into())
        }
    }
}
