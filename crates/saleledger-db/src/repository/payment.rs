//! # Payment Repository
//!
//! Append-only record of payment attempts.
//!
//! ## State Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Every transition is a compare-and-set on `state = 'pending'`:          │
//! │                                                                         │
//! │    complete_if_pending   PENDING → COMPLETED   (stamps settled_at)      │
//! │    fail_if_pending       PENDING → FAILED      (stores error_code)      │
//! │    cancel_if_pending     PENDING → CANCELLED                            │
//! │                                                                         │
//! │  `false` means someone else already moved the row. Rows are never       │
//! │  deleted and amounts are never updated.                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use saleledger_core::{PaymentMethod, PaymentState, PaymentTransaction, TransactionRef};

const TX_COLUMNS: &str = "id, sale_id, method, amount_cents, state, external_ref, description,
     error_code, processor_id, created_at, updated_at, settled_at";

const TOTALS_SQL: &str = "SELECT
        COALESCE(SUM(CASE WHEN state = 'completed' THEN amount_cents END), 0),
        COALESCE(SUM(CASE WHEN state = 'pending' THEN amount_cents END), 0)
       FROM payment_transactions
      WHERE sale_id = ?1";

/// A payment attempt about to be recorded.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub sale_id: i64,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub state: PaymentState,
    pub external_ref: Option<String>,
    pub description: String,
    pub processor_id: Option<i64>,
}

/// Repository for payment transactions.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    pub async fn find(&self, id: i64) -> DbResult<Option<PaymentTransaction>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM payment_transactions WHERE id = ?1");
        let tx = sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tx)
    }

    pub async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> DbResult<Option<PaymentTransaction>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM payment_transactions WHERE external_ref = ?1");
        let tx = sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(external_ref)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tx)
    }

    pub async fn resolve(&self, reference: &TransactionRef) -> DbResult<Option<PaymentTransaction>> {
        match reference {
            TransactionRef::Id(id) => self.find(*id).await,
            TransactionRef::External(external_ref) => self.find_by_external_ref(external_ref).await,
        }
    }

    /// All transactions of a sale, oldest first.
    pub async fn list_for_sale(&self, sale_id: i64) -> DbResult<Vec<PaymentTransaction>> {
        let sql = format!(
            "SELECT {TX_COLUMNS} FROM payment_transactions WHERE sale_id = ?1 ORDER BY id"
        );
        let txs = sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(txs)
    }

    /// `(completed_cents, pending_cents)` for a sale.
    pub async fn totals(&self, sale_id: i64) -> DbResult<(i64, i64)> {
        let totals = sqlx::query_as::<_, (i64, i64)>(TOTALS_SQL)
            .bind(sale_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(totals)
    }

    /// PENDING transactions created before `cutoff`, oldest first.
    ///
    /// Stored timestamps vary in fractional precision, so both sides are
    /// compared as `julianday` values rather than as text.
    pub async fn stale_pending(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<PaymentTransaction>> {
        let sql = format!(
            "SELECT {TX_COLUMNS} FROM payment_transactions
              WHERE state = 'pending'
                AND julianday(created_at) < julianday(?1)
              ORDER BY julianday(created_at), id"
        );
        let stale = sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(stale)
    }

    /// Sets the external reference of a PENDING transaction that has none.
    ///
    /// Returns false when the row already has a reference or left PENDING.
    /// A reference already used by another transaction fails with
    /// `DbError::UniqueViolation`.
    pub async fn attach_external_ref(&self, id: i64, external_ref: &str) -> DbResult<bool> {
        debug!(transaction_id = id, external_ref, "Attaching external reference");

        let result = sqlx::query(
            "UPDATE payment_transactions
                SET external_ref = ?2, updated_at = ?3
              WHERE id = ?1 AND external_ref IS NULL AND state = 'pending'",
        )
        .bind(id)
        .bind(external_ref)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| with_ref_value(e, external_ref))?;

        Ok(result.rows_affected() == 1)
    }

    // =========================================================================
    // Transaction-scoped
    // =========================================================================

    pub async fn insert(
        conn: &mut SqliteConnection,
        new: &NewTransaction,
    ) -> DbResult<PaymentTransaction> {
        debug!(
            sale_id = new.sale_id,
            amount_cents = new.amount_cents,
            state = %new.state,
            "Recording payment transaction"
        );

        let now = Utc::now();
        let settled_at = (new.state == PaymentState::Completed).then_some(now);
        let sql = format!(
            "INSERT INTO payment_transactions
                (sale_id, method, amount_cents, state, external_ref, description,
                 processor_id, created_at, updated_at, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)
             RETURNING {TX_COLUMNS}"
        );

        sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(new.sale_id)
            .bind(new.method)
            .bind(new.amount_cents)
            .bind(new.state)
            .bind(new.external_ref.as_deref())
            .bind(&new.description)
            .bind(new.processor_id)
            .bind(now)
            .bind(settled_at)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| with_ref_value(e, new.external_ref.as_deref().unwrap_or_default()))
    }

    pub async fn find_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> DbResult<Option<PaymentTransaction>> {
        let sql = format!("SELECT {TX_COLUMNS} FROM payment_transactions WHERE id = ?1");
        let tx = sqlx::query_as::<_, PaymentTransaction>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(tx)
    }

    pub async fn totals_in(conn: &mut SqliteConnection, sale_id: i64) -> DbResult<(i64, i64)> {
        let totals = sqlx::query_as::<_, (i64, i64)>(TOTALS_SQL)
            .bind(sale_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(totals)
    }

    /// PENDING → COMPLETED. Records the processor when one is given.
    pub async fn complete_if_pending(
        conn: &mut SqliteConnection,
        id: i64,
        processor_id: Option<i64>,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE payment_transactions
                SET state = 'completed',
                    processor_id = COALESCE(?2, processor_id),
                    updated_at = ?3,
                    settled_at = ?3
              WHERE id = ?1 AND state = 'pending'",
        )
        .bind(id)
        .bind(processor_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// PENDING → FAILED with the (already truncated) provider code.
    pub async fn fail_if_pending(
        conn: &mut SqliteConnection,
        id: i64,
        error_code: Option<&str>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_transactions
                SET state = 'failed', error_code = ?2, updated_at = ?3
              WHERE id = ?1 AND state = 'pending'",
        )
        .bind(id)
        .bind(error_code)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// PENDING → CANCELLED for one transaction.
    pub async fn cancel_if_pending(conn: &mut SqliteConnection, id: i64) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE payment_transactions
                SET state = 'cancelled', updated_at = ?2
              WHERE id = ?1 AND state = 'pending'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// PENDING → CANCELLED for every open transaction of a sale.
    /// Returns the ids that moved.
    pub async fn cancel_pending_for_sale(
        conn: &mut SqliteConnection,
        sale_id: i64,
    ) -> DbResult<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "UPDATE payment_transactions
                SET state = 'cancelled', updated_at = ?2
              WHERE sale_id = ?1 AND state = 'pending'
             RETURNING id",
        )
        .bind(sale_id)
        .bind(Utc::now())
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids)
    }
}

/// Fills in the offending value on an `external_ref` unique violation.
fn with_ref_value(err: sqlx::Error, external_ref: &str) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } if field.ends_with("external_ref") => {
            DbError::UniqueViolation {
                field,
                value: external_ref.to_string(),
            }
        }
        other => other,
    }
}
