//! # Reconciliation Query
//!
//! Declared total versus what has actually been paid, computed on demand.

use saleledger_core::{Balance, CoreError, Money};
use saleledger_db::{Database, PaymentRepository, SaleRepository};

use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct Reconciliation {
    db: Database,
}

impl Reconciliation {
    pub fn new(db: Database) -> Self {
        Reconciliation { db }
    }

    /// Balance of one sale. Only COMPLETED transactions count as paid.
    ///
    /// Sale and totals are read in one transaction so they come from the
    /// same snapshot.
    pub async fn balance(&self, sale_id: i64) -> EngineResult<Balance> {
        let mut tx = self.db.begin().await?;
        let sale = SaleRepository::get_in(&mut tx, sale_id)
            .await?
            .ok_or(CoreError::SaleNotFound(sale_id))?;
        let (paid, pending) = PaymentRepository::totals_in(&mut tx, sale_id).await?;
        tx.commit().await?;

        Ok(Balance::compute(
            sale_id,
            sale.total(),
            Money::from_cents(paid),
            Money::from_cents(pending),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditContext;
    use crate::error::ErrorCategory;
    use crate::testing;

    #[tokio::test]
    async fn test_pending_does_not_count_as_paid() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 1250, 10).await;
        let sale = engine
            .sales()
            .create_online(testing::online(product, 2), &AuditContext::system())
            .await
            .unwrap()
            .sale;

        let balance = engine.reconciliation().balance(sale.id).await.unwrap();
        assert_eq!(balance.declared_total, Money::from_cents(2500));
        assert_eq!(balance.paid_total, Money::zero());
        assert_eq!(balance.pending_total, Money::from_cents(2500));
        assert_eq!(balance.remaining, Money::from_cents(2500));
        assert!(!balance.is_settled());
    }

    #[tokio::test]
    async fn test_in_person_sale_is_settled() {
        let (engine, _) = testing::engine().await;
        let product = testing::product(&engine, 999, 10).await;
        let sale = engine
            .sales()
            .create_in_person(testing::in_person(product, 3), &AuditContext::system())
            .await
            .unwrap()
            .sale;

        let balance = engine.reconciliation().balance(sale.id).await.unwrap();
        assert_eq!(balance.paid_total, Money::from_cents(2997));
        assert_eq!(balance.remaining, Money::zero());
        assert!(balance.is_settled());
    }

    #[tokio::test]
    async fn test_unknown_sale() {
        let (engine, _) = testing::engine().await;
        let err = engine.reconciliation().balance(12).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }
}
