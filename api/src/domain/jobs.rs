//! Analysis job domain - DB queries for job state
//!
//! All functions use the generic Executor pattern, allowing them to work with
//! both `&PgPool` (for standalone queries) and `&mut PgConnection` (for transactions).
//!
//! Every write except `upsert_job` is guarded by `status = 'processing'`, so
//! a finished job cannot be overwritten.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Executor, Postgres};

use crate::models::{AnalysisResult, JobSource};

#[derive(Debug, sqlx::FromRow)]
pub struct JobRow {
    pub job_id: String,
    pub status: String,
    pub progress: i16,
    pub stage: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create the jobs table if it does not exist
pub async fn ensure_schema<'e, E>(executor: E) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            job_id      TEXT PRIMARY KEY,
            source      JSONB NOT NULL,
            status      TEXT NOT NULL,
            progress    SMALLINT NOT NULL DEFAULT 0,
            stage       TEXT NOT NULL,
            result      JSONB,
            error       TEXT,
            created_at  TIMESTAMPTZ NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(executor)
    .await?;
    Ok(())
}

/// Insert a queued job, resetting any previous row with the same id
pub async fn upsert_job<'e, E>(
    executor: E,
    job_id: &str,
    source: &JobSource,
    created_at: DateTime<Utc>,
) -> Result<JobRow, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        INSERT INTO analysis_jobs (job_id, source, status, progress, stage, created_at, updated_at)
        VALUES ($1, $2, 'processing', 0, 'queued', $3, NOW())
        ON CONFLICT (job_id) DO UPDATE SET
            source = EXCLUDED.source,
            status = 'processing',
            progress = 0,
            stage = 'queued',
            result = NULL,
            error = NULL,
            created_at = EXCLUDED.created_at,
            updated_at = NOW()
        RETURNING job_id, status, progress, stage, result, error, created_at, updated_at
        "#,
    )
    .bind(job_id)
    .bind(Json(source))
    .bind(created_at)
    .fetch_one(executor)
    .await
}

pub async fn get_job<'e, E>(executor: E, job_id: &str) -> Result<Option<JobRow>, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    sqlx::query_as(
        r#"
        SELECT job_id, status, progress, stage, result, error, created_at, updated_at
        FROM analysis_jobs
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(executor)
    .await
}

/// Raise progress; the stage only moves along with it
pub async fn update_progress<'e, E>(
    executor: E,
    job_id: &str,
    progress: i16,
    stage: &str,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET stage = CASE WHEN $2 >= progress THEN $3 ELSE stage END,
            progress = GREATEST(progress, $2),
            updated_at = NOW()
        WHERE job_id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(progress)
    .bind(stage)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn complete_job<'e, E>(
    executor: E,
    job_id: &str,
    result: &AnalysisResult,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let done = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'completed', progress = 100, stage = 'complete', result = $2, updated_at = NOW()
        WHERE job_id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(Json(result))
    .execute(executor)
    .await?;
    Ok(done.rows_affected())
}

pub async fn fail_job<'e, E>(executor: E, job_id: &str, error: &str) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'failed', error = $2, updated_at = NOW()
        WHERE job_id = $1 AND status = 'processing'
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

/// Delete finished jobs not touched since `older_than`
pub async fn delete_finished_before<'e, E>(
    executor: E,
    older_than: DateTime<Utc>,
) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        DELETE FROM analysis_jobs
        WHERE status <> 'processing' AND updated_at < $1
        "#,
    )
    .bind(older_than)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}
