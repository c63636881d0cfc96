//! Repository for processed-batch records.

use crate::domain::{BatchRecord, PoolId};
use crate::orchestration::{BatchSink, CoordinatorError};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::warn;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Insert a batch record idempotently, keyed by round and pool.
    ///
    /// Returns false when a record for the same round and pool already exists.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn insert_batch_record(&self, record: &BatchRecord) -> Result<bool, sqlx::Error> {
        let payload =
            serde_json::to_string(record).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO batch_records (
                record_key, round, pool, epoch, deposit_total, withdraw_total,
                borrow_total, repay_total, exchange_rate, net_share_delta,
                net_borrow_delta, skipped_count, liquidation_count, payload, processed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(record_key) DO NOTHING
            "#,
        )
        .bind(record.record_key())
        .bind(record.round.as_u64() as i64)
        .bind(record.pool.as_str())
        .bind(record.epoch.as_u64() as i64)
        .bind(record.deposit_total.to_canonical_string())
        .bind(record.withdraw_total.to_canonical_string())
        .bind(record.borrow_total.to_canonical_string())
        .bind(record.repay_total.to_canonical_string())
        .bind(record.exchange_rate.to_canonical_string())
        .bind(record.net_share_delta.to_canonical_string())
        .bind(record.net_borrow_delta.to_canonical_string())
        .bind(record.skipped.len() as i64)
        .bind(record.liquidations.len() as i64)
        .bind(payload)
        .bind(record.processed_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Batch records, newest round first, optionally for one pool.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_batch_records(
        &self,
        pool: Option<&PoolId>,
        limit: u32,
    ) -> Result<Vec<BatchRecord>, sqlx::Error> {
        let rows = match pool {
            Some(pool) => {
                sqlx::query(
                    r#"
                    SELECT payload FROM batch_records
                    WHERE pool = ?
                    ORDER BY round DESC
                    LIMIT ?
                    "#,
                )
                .bind(pool.as_str())
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT payload FROM batch_records
                    ORDER BY round DESC, pool ASC
                    LIMIT ?
                    "#,
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            match serde_json::from_str::<BatchRecord>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping unreadable batch record"),
            }
        }
        Ok(records)
    }

    /// Number of stored batch records.
    pub async fn count_batch_records(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM batch_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}

#[async_trait]
impl BatchSink for Repository {
    async fn record(&self, record: &BatchRecord) -> Result<(), CoordinatorError> {
        self.insert_batch_record(record)
            .await
            .map(|_| ())
            .map_err(|e| CoordinatorError::Sink(e.to_string()))
    }
}
