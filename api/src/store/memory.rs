use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{JobStore, StoreError};
use crate::models::{AnalysisResult, Job, JobRecord, JobStatus, Stage};

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to a job still in progress. Unknown or finished jobs are
    /// left untouched.
    async fn with_active<F>(&self, job_id: &str, f: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(job_id) {
            Some(record) if !record.status.is_terminal() => {
                f(record);
                record.updated_at = Utc::now();
            }
            Some(_) => tracing::debug!(job_id, "Ignoring write to finished job"),
            None => tracing::warn!(job_id, "Write to unknown job"),
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<JobRecord, StoreError> {
        let record = JobRecord::new(job);
        self.jobs
            .write()
            .await
            .insert(job.job_id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        stage: Stage,
    ) -> Result<(), StoreError> {
        let progress = progress.min(100);
        self.with_active(job_id, |record| {
            if progress >= record.progress {
                record.progress = progress;
                record.stage = stage;
            }
        })
        .await;
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: &AnalysisResult) -> Result<(), StoreError> {
        self.with_active(job_id, |record| {
            record.status = JobStatus::Completed;
            record.progress = 100;
            record.stage = Stage::Complete;
            record.result = Some(result.clone());
        })
        .await;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), StoreError> {
        self.with_active(job_id, |record| {
            record.status = JobStatus::Failed;
            record.error = Some(error.to_string());
        })
        .await;
        Ok(())
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| !record.status.is_terminal() || record.updated_at >= older_than);
        Ok((before - jobs.len()) as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::models::ProcessingTimeline;

    fn job(id: &str) -> Job {
        Job::from_url(id.to_string(), "https://example.com/v.mp4".to_string())
    }

    fn result() -> AnalysisResult {
        aggregate(&[], ProcessingTimeline::start())
    }

    #[tokio::test]
    async fn test_new_job_starts_queued() {
        let store = InMemoryJobStore::new();
        store.create(&job("a")).await.unwrap();

        let record = store.get("a").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.progress, 0);
        assert_eq!(record.stage, Stage::Queued);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_never_decreases() {
        let store = InMemoryJobStore::new();
        store.create(&job("a")).await.unwrap();

        store.update_progress("a", 30, Stage::ExtractingFrames).await.unwrap();
        store.update_progress("a", 10, Stage::Downloading).await.unwrap();

        let record = store.get("a").await.unwrap().unwrap();
        assert_eq!(record.progress, 30);
        assert_eq!(record.stage, Stage::ExtractingFrames);
    }

    #[tokio::test]
    async fn test_terminal_state_is_written_once() {
        let store = InMemoryJobStore::new();
        store.create(&job("a")).await.unwrap();

        store.fail("a", "Video too long: 400s (max: 300s)").await.unwrap();
        store.complete("a", &result()).await.unwrap();
        store.update_progress("a", 90, Stage::Aggregating).await.unwrap();

        let record = store.get("a").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("Video too long: 400s (max: 300s)"));
        assert!(record.result.is_none());
        assert!(record.progress < 90);
    }

    #[tokio::test]
    async fn test_complete_sets_result_and_full_progress() {
        let store = InMemoryJobStore::new();
        store.create(&job("a")).await.unwrap();
        store.complete("a", &result()).await.unwrap();

        let record = store.get("a").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.stage, Stage::Complete);
        assert!(record.result.is_some());
    }

    #[tokio::test]
    async fn test_resubmission_resets_record() {
        let store = InMemoryJobStore::new();
        store.create(&job("a")).await.unwrap();
        store.fail("a", "boom").await.unwrap();

        store.create(&job("a")).await.unwrap();
        let record = store.get("a").await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_prune_only_removes_old_finished_jobs() {
        let store = InMemoryJobStore::new();
        for id in ["done", "failed", "running"] {
            store.create(&job(id)).await.unwrap();
        }
        store.complete("done", &result()).await.unwrap();
        store.fail("failed", "boom").await.unwrap();

        // Nothing is older than an hour ago
        let removed = store
            .prune(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        let removed = store
            .prune(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(store.get("running").await.unwrap().is_some());
        assert!(store.get("done").await.unwrap().is_none());
    }
}
