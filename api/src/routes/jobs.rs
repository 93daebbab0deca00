//! Job polling endpoints (/api/v1/jobs/*, /api/v1/results/*)

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::AppState;
use crate::models::{AnalysisResult, JobRecord, JobStatus, Stage};
use crate::services::error::{ApiError, LogErr};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/jobs/{job_id}", get(get_job))
        .route("/api/v1/results/{job_id}", get(get_result))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResponse {
    job_id: String,
    status: JobStatus,
    progress: u8,
    stage: Stage,
    result: Option<AnalysisResult>,
    error: Option<String>,
}

async fn find_job(state: &AppState, job_id: &str) -> Result<JobRecord, ApiError> {
    state
        .store
        .get(job_id)
        .await
        .log_500("Get job error")?
        .ok_or_else(|| {
            ApiError::not_found("JOB_NOT_FOUND", format!("No job found with ID: {}", job_id))
        })
}

/// GET /api/v1/jobs/:job_id - poll job status
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let record = find_job(&state, &job_id).await?;

    Ok(Json(JobStatusResponse {
        job_id: record.job_id,
        status: record.status,
        progress: record.progress,
        stage: record.stage,
        result: record.result,
        error: record.error,
    }))
}

/// GET /api/v1/results/:job_id - the analysis result once the job completes
async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let record = find_job(&state, &job_id).await?;

    match (record.status, record.result) {
        (JobStatus::Completed, Some(result)) => {
            let mut body = serde_json::to_value(&result).log_500("Serialize result error")?;
            if let Some(obj) = body.as_object_mut() {
                obj.insert("jobId".to_string(), json!(record.job_id));
            }
            Ok(Json(body).into_response())
        }
        (JobStatus::Failed, _) | (JobStatus::Completed, None) => Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "ANALYSIS_FAILED",
            record
                .error
                .unwrap_or_else(|| "Analysis failed.".to_string()),
        )),
        (JobStatus::Processing, _) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "jobId": record.job_id,
                "status": record.status,
                "stage": record.stage,
                "message": "Analysis is still in progress. Please check back shortly.",
                "progress": record.progress,
            })),
        )
            .into_response()),
    }
}
