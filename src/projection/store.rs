//! Projection Store - in-memory relational projection
//!
//! Each table is an ordered map from primary key to `Arc<Record>`. Tables
//! are copy-on-write: readers take a `TableSnapshot` (a cloned `Arc` of the
//! map) and iterate it without holding any lock, while the single writer
//! swaps in a modified copy when a snapshot is still alive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::codec::FieldValue;

/// One projected row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key field values, declared order
    pub key: Vec<FieldValue>,
    /// All field values including key fields, declared order
    pub fields: Vec<(String, FieldValue)>,
    pub last_mutation_seq: u64,
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

type TableRows = BTreeMap<Vec<FieldValue>, Arc<Record>>;

/// Point-in-time view of one table
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    /// Last applied seq when the snapshot was taken
    pub seq: Option<u64>,
    rows: Arc<TableRows>,
}

impl TableSnapshot {
    /// Live record for `key`
    pub fn get(&self, key: &[FieldValue]) -> Option<&Arc<Record>> {
        self.rows.get(key).filter(|r| !r.deleted)
    }

    /// Live records in key order
    pub fn live(&self) -> impl Iterator<Item = &Arc<Record>> + '_ {
        self.rows.values().filter(|r| !r.deleted)
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Row counts for one table
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    pub table: String,
    pub live: usize,
    pub tombstones: usize,
}

/// Projection store shared by the projector (writer) and query engine
#[derive(Default)]
pub struct ProjectionStore {
    tables: DashMap<String, Arc<TableRows>>,
    applied: AtomicU64,
    /// Set once the first mutation is applied
    has_applied: AtomicBool,
}

impl ProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied_seq(&self) -> Option<u64> {
        self.has_applied
            .load(Ordering::Acquire)
            .then(|| self.applied.load(Ordering::Acquire))
    }

    /// Single writer: the projector
    pub(crate) fn set_applied_seq(&self, seq: u64) {
        self.applied.store(seq, Ordering::Release);
        self.has_applied.store(true, Ordering::Release);
    }

    /// Record for `key` including tombstones
    pub fn get_raw(&self, table: &str, key: &[FieldValue]) -> Option<Arc<Record>> {
        self.tables.get(table).and_then(|rows| rows.get(key).cloned())
    }

    /// Insert or replace a record
    pub(crate) fn upsert(&self, table: &str, record: Record) -> Arc<Record> {
        let record = Arc::new(record);
        let mut rows = self.tables.entry(table.to_string()).or_default();
        Arc::make_mut(rows.value_mut()).insert(record.key.clone(), Arc::clone(&record));
        debug!(table = table, seq = record.last_mutation_seq, "Record upserted");
        record
    }

    /// Mark the live record for `key` deleted, keeping its last field values
    pub(crate) fn tombstone(
        &self,
        table: &str,
        key: &[FieldValue],
        seq: u64,
        at: DateTime<Utc>,
    ) -> Option<Arc<Record>> {
        let mut rows = self.tables.get_mut(table)?;
        let current = rows.get(key).filter(|r| !r.deleted)?;
        let tombstone = Arc::new(Record {
            deleted: true,
            last_mutation_seq: seq,
            updated_at: at,
            ..Record::clone(current)
        });
        Arc::make_mut(rows.value_mut()).insert(key.to_vec(), Arc::clone(&tombstone));
        debug!(table = table, seq = seq, "Record tombstoned");
        Some(tombstone)
    }

    pub fn snapshot(&self, table: &str) -> TableSnapshot {
        let seq = self.applied_seq();
        let rows = self
            .tables
            .get(table)
            .map(|rows| Arc::clone(rows.value()))
            .unwrap_or_default();
        TableSnapshot { seq, rows }
    }

    pub fn stats(&self) -> Vec<TableStats> {
        let mut stats: Vec<_> = self
            .tables
            .iter()
            .map(|entry| {
                let tombstones = entry.value().values().filter(|r| r.deleted).count();
                TableStats {
                    table: entry.key().clone(),
                    live: entry.value().len() - tombstones,
                    tombstones,
                }
            })
            .collect();
        stats.sort_by(|a, b| a.table.cmp(&b.table));
        stats
    }

    pub fn clear(&self) {
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, value: u32, seq: u64) -> Record {
        Record {
            key: vec![FieldValue::U32(id)],
            fields: vec![
                ("id".into(), FieldValue::U32(id)),
                ("value".into(), FieldValue::U32(value)),
            ],
            last_mutation_seq: seq,
            deleted: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_snapshot_isolated_from_later_writes() {
        let store = ProjectionStore::new();
        store.upsert("t", record(1, 10, 1));
        store.set_applied_seq(1);
        let snap = store.snapshot("t");

        store.upsert("t", record(2, 20, 2));
        store.upsert("t", record(1, 11, 3));
        store.set_applied_seq(3);

        assert_eq!(snap.seq, Some(1));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.get(&[FieldValue::U32(1)]).unwrap().get("value"), Some(&FieldValue::U32(10)));
        assert_eq!(store.snapshot("t").len(), 2);
    }

    #[test]
    fn test_tombstone_hidden_but_retained() {
        let store = ProjectionStore::new();
        store.upsert("t", record(1, 10, 1));
        let key = [FieldValue::U32(1)];
        assert!(store.tombstone("t", &key, 2, Utc::now()).is_some());
        assert!(store.snapshot("t").get(&key).is_none());
        let raw = store.get_raw("t", &key).unwrap();
        assert!(raw.deleted);
        assert_eq!(raw.last_mutation_seq, 2);
        assert_eq!(raw.get("value"), Some(&FieldValue::U32(10)));
        // already deleted
        assert!(store.tombstone("t", &key, 3, Utc::now()).is_none());
    }

    #[test]
    fn test_applied_seq_starts_empty() {
        let store = ProjectionStore::new();
        assert_eq!(store.applied_seq(), None);
        store.set_applied_seq(0);
        assert_eq!(store.applied_seq(), Some(0));
        store.set_applied_seq(u64::MAX);
        assert_eq!(store.applied_seq(), Some(u64::MAX));
    }

    #[test]
    fn test_stats() {
        let store = ProjectionStore::new();
        store.upsert("t", record(1, 1, 1));
        store.upsert("t", record(2, 2, 2));
        store.tombstone("t", &[FieldValue::U32(2)], 3, Utc::now());
        let stats = store.stats();
        assert_eq!(stats[0].live, 1);
        assert_eq!(stats[0].tombstones, 1);
    }
}
