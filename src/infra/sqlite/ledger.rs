//! SQLite-backed append-only ledger
//!
//! Idempotency is enforced by uniqueness constraints rather than by
//! read-then-write checks:
//! - `ledger_images.content_hash` is UNIQUE, so concurrent writers of the
//!   same photo race on the constraint and exactly one row survives.
//! - `ledger_certificates.batch_id` is UNIQUE, which makes a second
//!   certificate for a batch impossible even across process restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{
    BatchId, Certificate, ContentHash, LedgerReceipt, LedgerRecord, StageNumber,
};
use crate::infra::{LedgerRecorder, ProvenanceError, Result};

/// SQLite ledger
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct ImageRow {
    content_hash: String,
    batch_id: String,
    stage_number: i64,
    transaction_id: String,
    recorded_at: String,
}

impl TryFrom<ImageRow> for LedgerRecord {
    type Error = ProvenanceError;

    fn try_from(row: ImageRow) -> Result<Self> {
        Ok(LedgerRecord {
            batch_id: BatchId::new(row.batch_id),
            stage: StageNumber::from_i64(row.stage_number)?,
            content_hash: row
                .content_hash
                .parse()
                .map_err(|e| ProvenanceError::Internal(format!("corrupt ledger row: {e}")))?,
            transaction_id: row.transaction_id,
            recorded_at: parse_timestamp(&row.recorded_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct CertificateRow {
    certificate_json: String,
    transaction_id: String,
    recorded_at: String,
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ProvenanceError::Internal(format!("invalid ledger timestamp {raw:?}: {e}")))
}

fn new_transaction_id() -> String {
    format!("tx-{}", Uuid::new_v4().simple())
}

impl SqliteLedger {
    /// Create a ledger with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a database URL (e.g. `sqlite://ledger.db`), creating the file if needed
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database; a single connection keeps every query on the same database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Apply the ledger schema
    pub async fn initialize(&self) -> Result<()> {
        crate::migrations::run_sqlite(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Total image records
    pub async fn image_record_count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_images")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    /// Total certificate records
    pub async fn certificate_count(&self) -> Result<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_certificates")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }

    async fn existing_image_receipt(&self, content_hash: &ContentHash) -> Result<LedgerReceipt> {
        let row: (String, String) = sqlx::query_as(
            "SELECT transaction_id, recorded_at FROM ledger_images WHERE content_hash = ?",
        )
        .bind(content_hash.to_hex())
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerReceipt {
            transaction_id: row.0,
            recorded_at: parse_timestamp(&row.1)?,
            newly_recorded: false,
        })
    }
}

#[async_trait]
impl LedgerRecorder for SqliteLedger {
    async fn record_verified_image(
        &self,
        content_hash: &ContentHash,
        batch_id: &BatchId,
        stage: StageNumber,
    ) -> Result<LedgerReceipt> {
        let transaction_id = new_transaction_id();
        let recorded_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_images (
                content_hash, batch_id, stage_number, transaction_id, recorded_at
            ) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(content_hash.to_hex())
        .bind(batch_id.as_str())
        .bind(stage.get() as i64)
        .bind(&transaction_id)
        .bind(recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.existing_image_receipt(content_hash).await;
        }

        Ok(LedgerReceipt {
            transaction_id,
            recorded_at,
            newly_recorded: true,
        })
    }

    async fn record_certificate(&self, certificate: &Certificate) -> Result<LedgerReceipt> {
        let transaction_id = new_transaction_id();
        let recorded_at = Utc::now();
        let certificate_json = serde_json::to_string(certificate)?;

        let result = sqlx::query(
            r#"
            INSERT INTO ledger_certificates (
                certificate_id, batch_id, certificate_hash,
                certificate_json, transaction_id, recorded_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&certificate.certificate_id)
        .bind(certificate.batch_id.as_str())
        .bind(certificate.certificate_hash_hex())
        .bind(&certificate_json)
        .bind(&transaction_id)
        .bind(recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(LedgerReceipt {
                transaction_id,
                recorded_at,
                newly_recorded: true,
            });
        }

        let row: (String, String) = sqlx::query_as(
            r#"
            SELECT transaction_id, recorded_at
            FROM ledger_certificates
            WHERE certificate_id = ? OR batch_id = ?
            LIMIT 1
            "#,
        )
        .bind(&certificate.certificate_id)
        .bind(certificate.batch_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerReceipt {
            transaction_id: row.0,
            recorded_at: parse_timestamp(&row.1)?,
            newly_recorded: false,
        })
    }

    async fn records_for_batch(&self, batch_id: &BatchId) -> Result<Vec<LedgerRecord>> {
        let rows = sqlx::query_as::<_, ImageRow>(
            r#"
            SELECT content_hash, batch_id, stage_number, transaction_id, recorded_at
            FROM ledger_images
            WHERE batch_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(batch_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerRecord::try_from).collect()
    }

    async fn certificate_for_batch(&self, batch_id: &BatchId) -> Result<Option<Certificate>> {
        let row = sqlx::query_as::<_, CertificateRow>(
            r#"
            SELECT certificate_json, transaction_id, recorded_at
            FROM ledger_certificates
            WHERE batch_id = ?
            "#,
        )
        .bind(batch_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                tracing::trace!(
                    batch_id = %batch_id,
                    transaction_id = %row.transaction_id,
                    recorded_at = %row.recorded_at,
                    "Loaded certificate from ledger"
                );
                Ok(Some(serde_json::from_str(&row.certificate_json)?))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StageCounts;

    async fn ledger() -> SqliteLedger {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.initialize().await.unwrap();
        ledger
    }

    fn stage(n: u8) -> StageNumber {
        StageNumber::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_image_returns_original_receipt() {
        let ledger = ledger().await;
        let batch = BatchId::from("B1");
        let hash = ContentHash([9; 32]);

        let first = ledger.record_verified_image(&hash, &batch, stage(1)).await.unwrap();
        let second = ledger.record_verified_image(&hash, &batch, stage(1)).await.unwrap();

        assert!(first.newly_recorded);
        assert!(!second.newly_recorded);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(ledger.image_record_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_records_round_trip_in_order() {
        let ledger = ledger().await;
        let batch = BatchId::from("B1");

        for (i, n) in [3u8, 1, 7].into_iter().enumerate() {
            ledger
                .record_verified_image(&ContentHash([i as u8; 32]), &batch, stage(n))
                .await
                .unwrap();
        }
        ledger
            .record_verified_image(&ContentHash([99; 32]), &BatchId::from("other"), stage(2))
            .await
            .unwrap();

        let records = ledger.records_for_batch(&batch).await.unwrap();
        let stages: Vec<u8> = records.iter().map(|r| r.stage.get()).collect();
        assert_eq!(stages, vec![3, 1, 7]);
    }

    #[tokio::test]
    async fn test_second_certificate_for_batch_is_refused() {
        let ledger = ledger().await;
        let batch = BatchId::from("B1");
        let first = Certificate::mint(batch.clone(), 14, StageCounts::new(), vec!["tx-a".into()]);
        let second = Certificate::mint(batch.clone(), 20, StageCounts::new(), vec!["tx-b".into()]);

        let r1 = ledger.record_certificate(&first).await.unwrap();
        let r2 = ledger.record_certificate(&second).await.unwrap();

        assert!(r1.newly_recorded);
        assert!(!r2.newly_recorded);
        assert_eq!(r1.transaction_id, r2.transaction_id);
        assert_eq!(ledger.certificate_count().await.unwrap(), 1);

        let stored = ledger.certificate_for_batch(&batch).await.unwrap().unwrap();
        assert_eq!(stored, first);
    }
}
