//! # Shipment Repository
//!
//! Companion record of an online sale. Delivery tracking belongs to the
//! logistics side; the ledger only creates the row and links it.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::DbResult;
use saleledger_core::Shipment;

#[derive(Debug, Clone)]
pub struct ShipmentRepository {
    pool: SqlitePool,
}

impl ShipmentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        ShipmentRepository { pool }
    }

    pub async fn get_for_sale(&self, sale_id: i64) -> DbResult<Option<Shipment>> {
        let shipment = sqlx::query_as::<_, Shipment>(
            "SELECT id, sale_id, address, status, created_at FROM shipments WHERE sale_id = ?1",
        )
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(shipment)
    }

    /// Creates the shipment in the caller's transaction.
    pub async fn insert(
        conn: &mut SqliteConnection,
        sale_id: i64,
        address: &str,
    ) -> DbResult<Shipment> {
        let shipment = sqlx::query_as::<_, Shipment>(
            "INSERT INTO shipments (sale_id, address, status, created_at)
             VALUES (?1, ?2, 'pending', ?3)
             RETURNING id, sale_id, address, status, created_at",
        )
        .bind(sale_id)
        .bind(address)
        .bind(Utc::now())
        .fetch_one(&mut *conn)
        .await?;
        Ok(shipment)
    }
}
