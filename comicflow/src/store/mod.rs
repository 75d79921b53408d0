//! Durable keyed storage for job records.
//!
//! A store holds one [`JobRecord`] per fingerprint and supports insert,
//! point lookup, and partial update. Updates are expressed as mutations
//! applied under the store's per-record serialization, so two writers of
//! the same record never interleave a read-modify-write.

mod file;
mod memory;

pub use file::FileJobStore;
pub use memory::InMemoryJobStore;

use async_trait::async_trait;

use crate::core::JobRecord;
use crate::errors::Result;

/// A partial update applied to a stored record.
///
/// Returning an error aborts the update; nothing is written.
pub type RecordMutation<'a> = Box<dyn FnOnce(&mut JobRecord) -> Result<()> + Send + 'a>;

/// Protocol for job record storage backends.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a record unless one already exists for its fingerprint.
    ///
    /// Returns `true` if the record was inserted.
    async fn insert(&self, record: JobRecord) -> Result<bool>;

    /// Gets a record by job id.
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Applies a mutation to a record and persists the result.
    ///
    /// Fails with `NotFound` if the record does not exist. Returns the
    /// record as written.
    async fn update(&self, job_id: &str, mutation: RecordMutation<'_>) -> Result<JobRecord>;

    /// Deletes a record. Returns `true` if a record was removed.
    async fn delete(&self, job_id: &str) -> Result<bool>;

    /// Lists records, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<JobRecord>>;
}

fn newest_first(mut records: Vec<JobRecord>, limit: usize) -> Vec<JobRecord> {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    records.truncate(limit);
    records
}
