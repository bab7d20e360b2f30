use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tourney_core::TournamentRecord;
use uuid::Uuid;

use crate::{apply_delete, apply_insert, apply_update, RecordStore, StoreError};

/// Insertion-ordered in-process store. Faults can be injected per record so
/// callers can exercise their partial-failure paths.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: Mutex<Vec<TournamentRecord>>,
    faults: Mutex<Faults>,
}

#[derive(Debug, Default)]
struct Faults {
    deletes: HashSet<Uuid>,
    updates: HashSet<Uuid>,
    unavailable: bool,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<TournamentRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            faults: Mutex::default(),
        }
    }

    pub async fn snapshot(&self) -> Vec<TournamentRecord> {
        self.records.lock().await.clone()
    }

    pub async fn fail_delete_of(&self, id: Uuid) {
        self.faults.lock().await.deletes.insert(id);
    }

    pub async fn fail_update_of(&self, id: Uuid) {
        self.faults.lock().await.updates.insert(id);
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.faults.lock().await.unavailable = unavailable;
    }

    async fn ensure_available(&self) -> Result<(), StoreError> {
        if self.faults.lock().await.unavailable {
            return Err(StoreError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn list_records(&self) -> Result<Vec<TournamentRecord>, StoreError> {
        self.ensure_available().await?;
        Ok(self.records.lock().await.clone())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<TournamentRecord>, StoreError> {
        self.ensure_available().await?;
        Ok(self.records.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_record(&self, record: &TournamentRecord) -> Result<(), StoreError> {
        self.ensure_available().await?;
        apply_insert(&mut *self.records.lock().await, record)
    }

    async fn update_record(&self, record: &TournamentRecord) -> Result<(), StoreError> {
        self.ensure_available().await?;
        if self.faults.lock().await.updates.contains(&record.id) {
            return Err(StoreError::Unavailable(format!("injected update failure for {}", record.id)));
        }
        apply_update(&mut self.records.lock().await, record)
    }

    async fn delete_record(&self, id: Uuid) -> Result<(), StoreError> {
        self.ensure_available().await?;
        if self.faults.lock().await.deletes.contains(&id) {
            return Err(StoreError::Unavailable(format!("injected delete failure for {id}")));
        }
        apply_delete(&mut *self.records.lock().await, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn injected_faults_only_hit_their_target() {
        let a = TournamentRecord::new("Summer Cup", Utc::now());
        let b = TournamentRecord::new("Summer Cup", Utc::now());
        let store = InMemoryRecordStore::with_records(vec![a.clone(), b.clone()]);
        store.fail_delete_of(a.id).await;

        assert!(matches!(store.delete_record(a.id).await, Err(StoreError::Unavailable(_))));
        store.delete_record(b.id).await.expect("delete b");
        assert_eq!(store.snapshot().await, vec![a]);
    }

    #[tokio::test]
    async fn unavailable_store_rejects_reads() {
        let store = InMemoryRecordStore::new();
        store.set_unavailable(true).await;
        assert!(matches!(store.list_records().await, Err(StoreError::Unavailable(_))));
    }
}
