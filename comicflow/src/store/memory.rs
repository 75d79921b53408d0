//! In-memory job store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{newest_first, JobStore, RecordMutation};
use crate::core::JobRecord;
use crate::errors::{ComicflowError, Result};

/// Job store backed by a concurrent hash map.
///
/// Updates hold the entry's shard lock for the duration of the mutation,
/// which serializes writers of the same record.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: DashMap<String, JobRecord>,
}

impl InMemoryJobStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<bool> {
        match self.records.entry(record.fingerprint.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
        }
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.get(job_id).map(|r| r.value().clone()))
    }

    async fn update(&self, job_id: &str, mutation: RecordMutation<'_>) -> Result<JobRecord> {
        let mut entry = self
            .records
            .get_mut(job_id)
            .ok_or_else(|| ComicflowError::NotFound(job_id.to_string()))?;

        let mut draft = entry.value().clone();
        mutation(&mut draft)?;
        *entry.value_mut() = draft.clone();
        Ok(draft)
    }

    async fn delete(&self, job_id: &str) -> Result<bool> {
        Ok(self.records.remove(job_id).is_some())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let records = self.records.iter().map(|r| r.value().clone()).collect();
        Ok(newest_first(records, limit))
    }
}
