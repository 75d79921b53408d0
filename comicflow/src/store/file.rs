//! File-backed job store: one JSON document per job.

use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{newest_first, JobStore, RecordMutation};
use crate::core::JobRecord;
use crate::errors::{ComicflowError, Result, StoreError};
use crate::fingerprint::is_valid_job_id;

/// Job store persisting each record as `<dir>/<job_id>.json`.
///
/// Writes go to a temporary file that is synced to disk and then renamed
/// over the target, so a reader never observes a partially written record
/// and a completed write survives a crash. Writers of the same record are
/// serialized by a per-record async lock, held only while in use.
#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileJobStore {
    /// Opens a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(StoreError::from)?;
        Ok(Self {
            dir,
            locks: DashMap::new(),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    fn lock_for(&self, job_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(job_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read(&self, job_id: &str) -> Result<Option<JobRecord>> {
        read_record(&self.path_for(job_id), job_id).await
    }

    async fn write(&self, record: &JobRecord) -> Result<()> {
        let path = self.path_for(&record.fingerprint);
        let tmp = self.dir.join(format!("{}.json.tmp", record.fingerprint));
        let bytes = serde_json::to_vec_pretty(record)?;

        // write, fsync, rename: the target is either the old or the new record
        let mut file = tokio::fs::File::create(&tmp).await.map_err(StoreError::from)?;
        file.write_all(&bytes).await.map_err(StoreError::from)?;
        file.sync_all().await.map_err(StoreError::from)?;
        drop(file);
        tokio::fs::rename(&tmp, &path).await.map_err(StoreError::from)?;
        debug!(job_id = %record.fingerprint, path = %path.display(), "Record written");
        Ok(())
    }

    /// Runs `op` while holding the lock of `job_id`, then drops the lock
    /// entry if no other caller is waiting on it.
    async fn locked<T, F>(&self, job_id: &str, op: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lock = self.lock_for(job_id);
        let result = {
            let _guard = lock.lock().await;
            op.await
        };
        drop(lock);
        self.locks.remove_if(job_id, |_, held| Arc::strong_count(held) == 1);
        result
    }
}

async fn read_record(path: &Path, key: &str) -> Result<Option<JobRecord>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::from(e).into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| {
            StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            }
            .into()
        })
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn insert(&self, record: JobRecord) -> Result<bool> {
        if !is_valid_job_id(&record.fingerprint) {
            return Err(ComicflowError::invalid_input(format!(
                "'{}' is not a valid job id",
                record.fingerprint
            )));
        }
        let job_id = record.fingerprint.clone();
        self.locked(&job_id, async move {
            if self.read(&record.fingerprint).await?.is_some() {
                return Ok(false);
            }
            self.write(&record).await?;
            Ok(true)
        })
        .await
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        if !is_valid_job_id(job_id) {
            return Ok(None);
        }
        self.read(job_id).await
    }

    async fn update(&self, job_id: &str, mutation: RecordMutation<'_>) -> Result<JobRecord> {
        if !is_valid_job_id(job_id) {
            return Err(ComicflowError::NotFound(job_id.to_string()));
        }
        self.locked(job_id, async move {
            let mut record = self
                .read(job_id)
                .await?
                .ok_or_else(|| ComicflowError::NotFound(job_id.to_string()))?;
            mutation(&mut record)?;
            self.write(&record).await?;
            Ok(record)
        })
        .await
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        if !is_valid_job_id(job_id) {
            return Ok(false);
        }
        self.locked(job_id, async move {
            match tokio::fs::remove_file(self.path_for(job_id)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(StoreError::from(e).into()),
            }
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(StoreError::from)?;

        while let Some(entry) = entries.next_entry().await.map_err(StoreError::from)? {
            let path = entry.path();
            let Some(job_id) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
                .map(str::to_string)
            else {
                continue;
            };
            if !is_valid_job_id(&job_id) {
                continue;
            }
            match read_record(&path, &job_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(job_id = %job_id, error = %e, "Skipping unreadable record"),
            }
        }

        Ok(newest_first(records, limit))
    }
}
