//! # Lot Allocator
//!
//! FEFO planning over persisted lots, and atomic consumption of a plan.
//!
//! Lots are traceability data. The stock ledger stays the authority on
//! what can be sold; lot quantities only move when `inventory.consume_lots`
//! is enabled or [`LotAllocator::consume`] is called directly.

use sqlx::SqliteConnection;
use tracing::debug;

use saleledger_core::lots;
use saleledger_core::validation::validate_quantity;
use saleledger_core::{CoreError, LotAllocation};
use saleledger_db::{Database, LotRepository};

use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct LotAllocator {
    db: Database,
}

impl LotAllocator {
    pub fn new(db: Database) -> Self {
        LotAllocator { db }
    }

    /// Plans which lots would cover `quantity`. Never mutates.
    pub async fn allocate(&self, product_id: i64, quantity: i64) -> EngineResult<Vec<LotAllocation>> {
        let on_hand = self.db.lots().list_for_product(product_id).await?;
        Ok(lots::allocate(product_id, &on_hand, quantity)?)
    }

    /// Plans and applies an allocation. All lots change or none do.
    pub async fn consume(&self, product_id: i64, quantity: i64) -> EngineResult<Vec<LotAllocation>> {
        validate_quantity(quantity)?;

        let mut tx = self.db.begin().await?;
        let plan = Self::consume_in(&mut tx, product_id, quantity).await?;
        tx.commit().await?;
        Ok(plan)
    }

    /// Consume inside the caller's transaction. On error the caller must
    /// roll back.
    pub async fn consume_in(
        conn: &mut SqliteConnection,
        product_id: i64,
        quantity: i64,
    ) -> EngineResult<Vec<LotAllocation>> {
        LotRepository::touch_product(conn, product_id).await?;
        let current = LotRepository::list_for_product_in(conn, product_id).await?;
        let plan = lots::allocate(product_id, &current, quantity)?;

        for allocation in &plan {
            if !LotRepository::try_take(conn, allocation.lot_id, allocation.quantity).await? {
                let available = current.iter().map(|l| l.quantity.max(0)).sum();
                return Err(CoreError::InsufficientLotQuantity {
                    product_id,
                    available,
                    requested: quantity,
                }
                .into());
            }
        }

        debug!(product_id, quantity, lots = plan.len(), "Lots consumed");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testing;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_consume_follows_fefo() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 250, 20).await;
        let db = engine.database();

        let late = db
            .lots()
            .insert(product, Some("LATE"), 10, NaiveDate::from_ymd_opt(2027, 1, 1))
            .await
            .unwrap();
        let early = db
            .lots()
            .insert(product, Some("EARLY"), 4, NaiveDate::from_ymd_opt(2026, 1, 1))
            .await
            .unwrap();

        let plan = engine.lots().consume(product, 6).await.unwrap();
        assert_eq!(
            plan,
            vec![
                LotAllocation { lot_id: early.id, quantity: 4 },
                LotAllocation { lot_id: late.id, quantity: 2 },
            ]
        );

        let remaining: Vec<i64> = db
            .lots()
            .list_for_product(product)
            .await
            .unwrap()
            .iter()
            .map(|l| l.quantity)
            .collect();
        assert_eq!(remaining, vec![0, 8]);
    }

    #[tokio::test]
    async fn test_insufficient_lots_change_nothing() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 250, 20).await;
        let db = engine.database();
        db.lots().insert(product, None, 2, None).await.unwrap();
        db.lots().insert(product, None, 1, None).await.unwrap();

        let err = engine.lots().consume(product, 4).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Core(CoreError::InsufficientLotQuantity { available: 3, .. })
        ));

        let total: i64 = db
            .lots()
            .list_for_product(product)
            .await
            .unwrap()
            .iter()
            .map(|l| l.quantity)
            .sum();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_allocate_is_advisory() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 250, 20).await;
        engine.database().lots().insert(product, None, 5, None).await.unwrap();

        engine.lots().allocate(product, 5).await.unwrap();
        engine.lots().allocate(product, 5).await.unwrap();

        let lots = engine.database().lots().list_for_product(product).await.unwrap();
        assert_eq!(lots[0].quantity, 5);
    }
}
