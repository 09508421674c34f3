//! Persistence boundary for normalized records.
//!
//! The store is the only component that touches durable state. Its single
//! correctness guarantee is the `(program_id, signature)` uniqueness: writes
//! that collide with an existing record are absorbed without error, which is
//! what lets the backfill and realtime modes overlap freely.

pub mod memory;

use crate::types::records::NormalizedRecord;
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashSet;
use std::time::Duration;

pub use memory::MemoryStore;

/// Abstract interface for record persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates the schema if it doesn't exist.
    async fn initialize(&self) -> Result<()>;

    /// Highest persisted slot for `program_id`, `None` when nothing is stored.
    async fn last_indexed_slot(&self, program_id: &str) -> Result<Option<u64>>;

    /// Returns the subset of `signatures` not yet stored for `program_id`, in input order.
    async fn filter_unseen_signatures(
        &self,
        program_id: &str,
        signatures: &[String],
    ) -> Result<Vec<String>>;

    /// Inserts records, silently skipping any whose key already exists.
    ///
    /// Returns the number of newly inserted records.
    async fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<u64>;

    /// Releases connections. Further calls may fail.
    async fn close(&self);
}

/// `PostgreSQL`-backed record store.
///
/// # Example
///
/// ```no_run
/// use solana_ingestor::storage::{PgStore, RecordStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PgStore::connect("postgresql://localhost/ingest").await?;
/// store.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Opens a connection pool.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::DatabaseError` if the connection fails.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS program_transactions (
                id BIGSERIAL PRIMARY KEY,
                program_id TEXT NOT NULL,
                signature TEXT NOT NULL,
                slot BIGINT NOT NULL,
                block_time BIGINT,
                instructions JSONB NOT NULL,
                logs TEXT[],
                source TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (program_id, signature)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_program_transactions_slot
            ON program_transactions (program_id, slot DESC)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_indexed_slot(&self, program_id: &str) -> Result<Option<u64>> {
        let slot: Option<i64> =
            sqlx::query_scalar("SELECT MAX(slot) FROM program_transactions WHERE program_id = $1")
                .bind(program_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(slot.and_then(|s| u64::try_from(s).ok()))
    }

    async fn filter_unseen_signatures(
        &self,
        program_id: &str,
        signatures: &[String],
    ) -> Result<Vec<String>> {
        if signatures.is_empty() {
            return Ok(Vec::new());
        }

        let existing: Vec<String> = sqlx::query_scalar(
            "SELECT signature FROM program_transactions WHERE program_id = $1 AND signature = ANY($2)",
        )
        .bind(program_id)
        .bind(signatures)
        .fetch_all(&self.pool)
        .await?;

        let existing: HashSet<String> = existing.into_iter().collect();
        Ok(signatures
            .iter()
            .filter(|s| !existing.contains(*s))
            .cloned()
            .collect())
    }

    async fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO program_transactions \
             (program_id, signature, slot, block_time, instructions, logs, source) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.program_id.clone())
                .push_bind(record.signature.clone())
                .push_bind(i64::try_from(record.slot).unwrap_or(i64::MAX))
                .push_bind(record.block_time)
                .push_bind(sqlx::types::Json(record.instructions.clone()))
                .push_bind(record.logs.clone())
                .push_bind(record.source.as_str());
        });
        builder.push(" ON CONFLICT (program_id, signature) DO NOTHING");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::records::{NormalizedInstruction, SourceMode};

    async fn setup() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let store = PgStore::connect(&url).await.ok()?;
        store.initialize().await.ok()?;
        Some(store)
    }

    fn record(program_id: &str, signature: &str, slot: u64) -> NormalizedRecord {
        NormalizedRecord {
            signature: signature.to_string(),
            slot,
            block_time: None,
            instructions: vec![NormalizedInstruction {
                program_id: program_id.to_string(),
                data: Some("3Bxs4h24hBtQy9rw".into()),
                parsed: None,
                inner: false,
            }],
            logs: None,
            program_id: program_id.to_string(),
            source: SourceMode::Backfill,
        }
    }

    #[tokio::test]
    #[ignore = "Requires database connection"]
    async fn test_upsert_is_idempotent() {
        let Some(store) = setup().await else { return };
        let program = format!("pg-test-{}", std::process::id());

        let batch = vec![record(&program, "a", 10), record(&program, "b", 12)];
        assert_eq!(store.upsert_batch(&batch).await.unwrap(), 2);
        assert_eq!(store.upsert_batch(&batch).await.unwrap(), 0);

        assert_eq!(store.last_indexed_slot(&program).await.unwrap(), Some(12));

        let unseen = store
            .filter_unseen_signatures(&program, &["c".into(), "a".into(), "d".into()])
            .await
            .unwrap();
        assert_eq!(unseen, vec!["c".to_string(), "d".to_string()]);

        sqlx::query("DELETE FROM program_transactions WHERE program_id = $1")
            .bind(&program)
            .execute(store.pool())
            .await
            .unwrap();
    }
}
