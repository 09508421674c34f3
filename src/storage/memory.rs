//! In-process record store.
//!
//! Same semantics as the Postgres store, kept in a map. Used for dry runs
//! (`DATABASE_URL=memory://`) and throughout the test suite.

use super::RecordStore;
use crate::types::records::NormalizedRecord;
use crate::utils::error::{IngestError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

type Table = HashMap<String, HashMap<String, NormalizedRecord>>;

/// Map-backed [`RecordStore`], keyed by program id then signature.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Table>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<MutexGuard<'_, Table>> {
        self.records
            .lock()
            .map_err(|_| IngestError::InternalError("memory store lock poisoned".into()))
    }

    /// All records for `program_id`, newest slot first.
    pub fn records(&self, program_id: &str) -> Result<Vec<NormalizedRecord>> {
        let table = self.table()?;
        let mut records: Vec<NormalizedRecord> = table
            .get(program_id)
            .map(|by_sig| by_sig.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by(|a, b| b.slot.cmp(&a.slot).then_with(|| a.signature.cmp(&b.signature)));
        Ok(records)
    }

    /// Total number of stored records across programs.
    pub fn len(&self) -> Result<usize> {
        Ok(self.table()?.values().map(HashMap::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn last_indexed_slot(&self, program_id: &str) -> Result<Option<u64>> {
        let table = self.table()?;
        Ok(table
            .get(program_id)
            .and_then(|by_sig| by_sig.values().map(|r| r.slot).max()))
    }

    async fn filter_unseen_signatures(
        &self,
        program_id: &str,
        signatures: &[String],
    ) -> Result<Vec<String>> {
        let table = self.table()?;
        let known = table.get(program_id);
        Ok(signatures
            .iter()
            .filter(|s| known.map_or(true, |by_sig| !by_sig.contains_key(*s)))
            .cloned()
            .collect())
    }

    async fn upsert_batch(&self, records: &[NormalizedRecord]) -> Result<u64> {
        let mut table = self.table()?;
        let mut inserted = 0;
        for record in records {
            let by_sig = table.entry(record.program_id.clone()).or_default();
            if !by_sig.contains_key(&record.signature) {
                by_sig.insert(record.signature.clone(), record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::records::SourceMode;

    fn record(program_id: &str, signature: &str, slot: u64, source: SourceMode) -> NormalizedRecord {
        NormalizedRecord {
            signature: signature.to_string(),
            slot,
            block_time: Some(1_700_000_000),
            instructions: vec![],
            logs: None,
            program_id: program_id.to_string(),
            source,
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_store_once() {
        let store = MemoryStore::new();
        let first = vec![
            record("p", "a", 5, SourceMode::Realtime),
            record("p", "a", 5, SourceMode::Backfill),
        ];
        assert_eq!(store.upsert_batch(&first).await.unwrap(), 1);
        assert_eq!(
            store
                .upsert_batch(&[record("p", "a", 5, SourceMode::Backfill)])
                .await
                .unwrap(),
            0
        );

        let stored = store.records("p").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].source, SourceMode::Realtime);
    }

    #[tokio::test]
    async fn test_same_signature_different_program_is_distinct() {
        let store = MemoryStore::new();
        let batch = vec![
            record("p1", "a", 5, SourceMode::Backfill),
            record("p2", "a", 5, SourceMode::Backfill),
        ];
        assert_eq!(store.upsert_batch(&batch).await.unwrap(), 2);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_last_indexed_slot_and_filter() {
        let store = MemoryStore::new();
        assert_eq!(store.last_indexed_slot("p").await.unwrap(), None);

        store
            .upsert_batch(&[
                record("p", "a", 5, SourceMode::Backfill),
                record("p", "b", 9, SourceMode::Backfill),
            ])
            .await
            .unwrap();
        assert_eq!(store.last_indexed_slot("p").await.unwrap(), Some(9));

        let unseen = store
            .filter_unseen_signatures("p", &["c".into(), "b".into(), "a".into(), "d".into()])
            .await
            .unwrap();
        assert_eq!(unseen, vec!["c".to_string(), "d".to_string()]);

        let unseen = store
            .filter_unseen_signatures("other", &["a".into()])
            .await
            .unwrap();
        assert_eq!(unseen, vec!["a".to_string()]);
    }
}
