//! Job state storage.
//!
//! Both backends enforce the same rules: progress never goes backwards, a
//! job reaches a terminal state at most once, and writes after that are
//! ignored.

mod memory;
mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PgJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{AnalysisResult, Job, JobRecord, Stage};
use crate::pipeline::ProgressSink;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt job row {job_id}: {reason}")]
    Corrupt { job_id: String, reason: String },
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a fresh record for `job`. Re-submitting an existing id resets it.
    async fn create(&self, job: &Job) -> Result<JobRecord, StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Ignored when `progress` is below the stored value or the job is finished.
    async fn update_progress(&self, job_id: &str, progress: u8, stage: Stage)
    -> Result<(), StoreError>;

    async fn complete(&self, job_id: &str, result: &AnalysisResult) -> Result<(), StoreError>;

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), StoreError>;

    /// Delete finished jobs last updated before `older_than`. Returns the count.
    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;

    fn backend(&self) -> &'static str;
}

/// Forwards pipeline progress for one job into a store
pub struct StoreProgress<'a> {
    store: &'a dyn JobStore,
    job_id: &'a str,
}

impl<'a> StoreProgress<'a> {
    pub fn new(store: &'a dyn JobStore, job_id: &'a str) -> Self {
        Self { store, job_id }
    }
}

#[async_trait]
impl ProgressSink for StoreProgress<'_> {
    async fn report(&self, percent: u8, stage: Stage) {
        tracing::debug!(job_id = self.job_id, percent, %stage, "Progress");
        if let Err(e) = self.store.update_progress(self.job_id, percent, stage).await {
            tracing::warn!(job_id = self.job_id, error = %e, "Failed to record progress");
        }
    }
}
