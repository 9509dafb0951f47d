//! Record store implementations
//!
//! The in-memory store backs tests and dry runs. The JSON-lines store is the
//! standalone persistence used by the CLI: one appended line per commit,
//! last line per pack wins on load, so the file doubles as an audit trail.

use async_trait::async_trait;
use chrono::Utc;
use labfeed_common::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use crate::dispatch::RecordStore;
use crate::models::{LabReport, StoredReport};

fn upserted(
    existing: Option<&StoredReport>,
    report: LabReport,
    site_key: i64,
) -> StoredReport {
    let now = Utc::now();
    match existing {
        Some(existing) => StoredReport {
            id: existing.id,
            site_key,
            report,
            created_at: existing.created_at,
            updated_at: now,
        },
        None => StoredReport {
            id: Uuid::new_v4(),
            site_key,
            report,
            created_at: now,
            updated_at: now,
        },
    }
}

/// In-memory record store keyed by pack reference.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, StoredReport>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredReport>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Preload a stored report carrying a known site key.
    pub async fn seed(&self, pack_reference: &str, site_key: i64) {
        let mut report = LabReport::new(pack_reference);
        report.set_analyte("ph_result", "7.0".to_string());
        let stored = upserted(None, report, site_key);
        self.lock().insert(pack_reference.to_string(), stored);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_by_natural_key(&self, pack_reference: &str) -> Result<Option<StoredReport>> {
        Ok(self.lock().get(pack_reference).cloned())
    }

    async fn create_or_update(&self, report: LabReport, site_key: i64) -> Result<StoredReport> {
        let mut records = self.lock();
        let stored = upserted(records.get(&report.pack_reference), report, site_key);
        records.insert(stored.report.pack_reference.clone(), stored.clone());
        Ok(stored)
    }
}

/// Record store persisted as JSON lines on disk.
pub struct JsonlRecordStore {
    path: PathBuf,
    records: Mutex<HashMap<String, StoredReport>>,
}

impl JsonlRecordStore {
    /// Open a store file, creating its directory when missing. Earlier
    /// lines for a pack are superseded by later ones.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut records = HashMap::new();
        if path.exists() {
            for item in serde_jsonlines::json_lines::<StoredReport, _>(&path)? {
                let stored = item?;
                records.insert(stored.report.pack_reference.clone(), stored);
            }
        }

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredReport>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

#[async_trait]
impl RecordStore for JsonlRecordStore {
    async fn find_by_natural_key(&self, pack_reference: &str) -> Result<Option<StoredReport>> {
        Ok(self.lock().get(pack_reference).cloned())
    }

    async fn create_or_update(&self, report: LabReport, site_key: i64) -> Result<StoredReport> {
        let stored = {
            let mut records = self.lock();
            let stored = upserted(records.get(&report.pack_reference), report, site_key);
            records.insert(stored.report.pack_reference.clone(), stored.clone());
            stored
        };

        serde_jsonlines::append_json_lines(&self.path, [&stored])?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(pack: &str, ph: &str) -> LabReport {
        let mut report = LabReport::new(pack);
        report.set_analyte("ph_result", ph.to_string());
        report
    }

    #[tokio::test]
    async fn test_memory_store_upsert_keeps_identity() {
        let store = MemoryRecordStore::new();

        let first = store.create_or_update(report("PK1", "7.2"), 0).await.unwrap();
        let second = store.create_or_update(report("PK1", "7.4"), 0).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.report.ph_result.as_deref(), Some("7.4"));
    }

    #[tokio::test]
    async fn test_memory_store_find_misses_unknown_pack() {
        let store = MemoryRecordStore::new();
        assert!(store.find_by_natural_key("PK9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_jsonl_store_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("reports.jsonl");

        {
            let store = JsonlRecordStore::open(&path).unwrap();
            store.create_or_update(report("PK1", "7.2"), 5).await.unwrap();
            store.create_or_update(report("PK2", "6.9"), 0).await.unwrap();
            store.create_or_update(report("PK1", "7.4"), 5).await.unwrap();
        }

        let reopened = JsonlRecordStore::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);

        let pk1 = reopened.find_by_natural_key("PK1").await.unwrap().unwrap();
        assert_eq!(pk1.report.ph_result.as_deref(), Some("7.4"));
        assert_eq!(pk1.site_key, 5);
    }

    #[tokio::test]
    async fn test_jsonl_store_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("reports.jsonl");

        let store = JsonlRecordStore::open(&path).unwrap();
        store.create_or_update(report("PK1", "7.2"), 0).await.unwrap();
        assert!(path.exists());
    }
}
