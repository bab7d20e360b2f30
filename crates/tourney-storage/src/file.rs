use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tourney_core::TournamentRecord;
use uuid::Uuid;

use crate::{apply_delete, apply_insert, apply_update, RecordStore, StoreError};

/// JSON snapshot store. Every mutation rewrites the snapshot through a temp
/// file and an atomic rename, so readers never observe a torn file.
#[derive(Debug)]
pub struct FileRecordStore {
    path: PathBuf,
    records: Mutex<Vec<TournamentRecord>>,
}

impl FileRecordStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records: Vec<TournamentRecord> = if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking record snapshot {}", path.display()))?
        {
            let bytes = fs::read(&path)
                .await
                .with_context(|| format!("reading record snapshot {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing record snapshot {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies `op` to a copy of the record set and only keeps it once it is on disk.
    async fn mutate<F>(&self, op: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<TournamentRecord>) -> Result<(), StoreError>,
    {
        let mut guard = self.records.lock().await;
        let mut next = guard.clone();
        op(&mut next)?;
        persist_atomically(&self.path, &next).await?;
        *guard = next;
        Ok(())
    }
}

async fn persist_atomically(path: &Path, records: &[TournamentRecord]) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(records).context("serializing record snapshot")?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating store directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp snapshot {}", temp_path.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing temp snapshot {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp snapshot {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming snapshot {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[async_trait]
impl RecordStore for FileRecordStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn list_records(&self) -> Result<Vec<TournamentRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<TournamentRecord>, StoreError> {
        Ok(self.records.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn insert_record(&self, record: &TournamentRecord) -> Result<(), StoreError> {
        self.mutate(|records| apply_insert(records, record)).await
    }

    async fn update_record(&self, record: &TournamentRecord) -> Result<(), StoreError> {
        self.mutate(|records| apply_update(records, record)).await
    }

    async fn delete_record(&self, id: Uuid) -> Result<(), StoreError> {
        self.mutate(|records| apply_delete(records, id)).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let records = self.records.lock().await;
        persist_atomically(&self.path, &records).await?;
        Ok(())
    }
}
