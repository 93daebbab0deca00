use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{JobStore, StoreError};
use crate::domain::jobs::{self, JobRow};
use crate::models::{AnalysisResult, Job, JobRecord, JobStatus, Stage};

/// Durable store backed by the `analysis_jobs` table
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    /// Wrap `pool`, creating the table if needed.
    pub async fn new(pool: PgPool) -> Result<Self, StoreError> {
        jobs::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }
}

impl TryFrom<JobRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            job_id: row.job_id.clone(),
            reason,
        };

        let status: JobStatus = row.status.parse().map_err(corrupt)?;
        let stage: Stage = row.stage.parse().map_err(corrupt)?;
        let progress = u8::try_from(row.progress.clamp(0, 100))
            .map_err(|e| corrupt(e.to_string()))?;
        let result = row
            .result
            .map(serde_json::from_value::<AnalysisResult>)
            .transpose()?;

        Ok(JobRecord {
            job_id: row.job_id,
            status,
            progress,
            stage,
            result,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &Job) -> Result<JobRecord, StoreError> {
        let row = jobs::upsert_job(&self.pool, &job.job_id, &job.source, job.created_at).await?;
        row.try_into()
    }

    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        jobs::get_job(&self.pool, job_id)
            .await?
            .map(JobRecord::try_from)
            .transpose()
    }

    async fn update_progress(
        &self,
        job_id: &str,
        progress: u8,
        stage: Stage,
    ) -> Result<(), StoreError> {
        jobs::update_progress(&self.pool, job_id, progress.min(100) as i16, stage.as_str()).await?;
        Ok(())
    }

    async fn complete(&self, job_id: &str, result: &AnalysisResult) -> Result<(), StoreError> {
        if jobs::complete_job(&self.pool, job_id, result).await? == 0 {
            tracing::debug!(job_id, "Completion ignored, job already finished or unknown");
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), StoreError> {
        if jobs::fail_job(&self.pool, job_id, error).await? == 0 {
            tracing::debug!(job_id, "Failure ignored, job already finished or unknown");
        }
        Ok(())
    }

    async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(jobs::delete_finished_before(&self.pool, older_than).await?)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
