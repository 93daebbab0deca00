//! Job submission endpoints (/api/v1/analyze/*)

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::Field, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::AppState;
use crate::models::Job;
use crate::services::error::{ApiError, LogErr};

const JOB_ID_LEN: usize = 12;
const QUEUE_FAILURE: &str = "Failed to queue job for processing.";

/// Accepted upload types and the extension each is stored under
const ALLOWED_MIME_TYPES: &[(&str, &str)] = &[
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("video/quicktime", "mov"),
    ("video/x-msvideo", "avi"),
];

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/analyze/upload", post(analyze_upload))
        .route("/api/v1/analyze/url", post(analyze_url))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    job_id: String,
    status: &'static str,
    message: &'static str,
    status_url: String,
    result_url: String,
}

#[derive(Deserialize)]
struct AnalyzeUrlRequest {
    url: String,
}

/// 12 lowercase alphanumeric characters
pub fn new_job_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(JOB_ID_LEN);
    id
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    ALLOWED_MIME_TYPES
        .iter()
        .find(|(allowed, _)| *allowed == mime)
        .map(|(_, ext)| *ext)
}

/// Record the job and hand it to the queue
async fn submit(
    state: &AppState,
    job: Job,
    message: &'static str,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let job_id = job.job_id.clone();
    state.store.create(&job).await.log_500("Create job error")?;

    if let Err(e) = state.queue.submit(job).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to queue job");
        if let Err(e) = state.store.fail(&job_id, QUEUE_FAILURE).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
        return Err(ApiError::internal());
    }

    tracing::info!(job_id = %job_id, queue = state.queue.backend(), "Job submitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            status_url: format!("/api/v1/jobs/{}", job_id),
            result_url: format!("/api/v1/results/{}", job_id),
            job_id,
            status: "processing",
            message,
        }),
    ))
}

/// POST /api/v1/analyze/upload - multipart video upload
async fn analyze_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let invalid_upload =
        || ApiError::bad_request("INVALID_UPLOAD", "The upload could not be read. Please try again.");

    while let Some(field) = multipart
        .next_field()
        .await
        .log_with("Multipart field error", invalid_upload())?
    {
        if field.file_name().is_none() && field.name() != Some("file") {
            continue;
        }

        let mime = field.content_type().unwrap_or("").to_string();
        let Some(ext) = extension_for_mime(&mime) else {
            return Err(ApiError::bad_request(
                "INVALID_FORMAT",
                format!("Unsupported format: {}. Allowed: mp4, webm, mov, avi.", mime),
            ));
        };
        let original_name = field.file_name().map(str::to_string);

        let job_id = new_job_id();
        let uploads_dir = state.config.uploads_dir();
        tokio::fs::create_dir_all(&uploads_dir)
            .await
            .log_500("Create uploads dir error")?;
        let path = uploads_dir.join(format!("{}.{}", job_id, ext));

        let size = match save_upload(field, &path, state.config.max_file_size).await {
            Ok(size) => size,
            Err(e) => {
                remove_upload(&path).await;
                return Err(e);
            }
        };
        tracing::info!(
            job_id = %job_id,
            path = %path.display(),
            bytes = size,
            "Saved upload"
        );

        let job = Job::from_upload(job_id, path.clone(), original_name);
        return match submit(&state, job, "Video uploaded successfully. Processing has started.").await {
            Ok(response) => Ok(response),
            Err(e) => {
                remove_upload(&path).await;
                Err(e)
            }
        };
    }

    Err(ApiError::bad_request(
        "NO_FILE",
        "No file uploaded. Please attach a video file.",
    ))
}

/// Stream a multipart field to `path`, enforcing `max_size`
async fn save_upload(mut field: Field<'_>, path: &Path, max_size: u64) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .log_500("Create upload file error")?;
    let mut size: u64 = 0;

    while let Some(chunk) = field.chunk().await.log_with(
        "Upload stream error",
        ApiError::bad_request("INVALID_UPLOAD", "The upload could not be read. Please try again."),
    )? {
        size += chunk.len() as u64;
        if size > max_size {
            return Err(ApiError::bad_request(
                "FILE_TOO_LARGE",
                format!(
                    "File exceeds limit of {}MB.",
                    (max_size / (1024 * 1024)).max(1)
                ),
            ));
        }
        file.write_all(&chunk).await.log_500("Write upload error")?;
    }
    file.flush().await.log_500("Flush upload error")?;
    Ok(size)
}

async fn remove_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove upload");
        }
    }
}

fn validate_url(raw: &str) -> Result<String, ApiError> {
    let invalid = || ApiError::bad_request("VALIDATION_ERROR", "A valid http(s) video URL is required.");
    let parsed = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(invalid());
    }
    Ok(parsed.to_string())
}

/// POST /api/v1/analyze/url - analyze a video by URL
async fn analyze_url(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AnalyzeUrlRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request("VALIDATION_ERROR", e.body_text()))?;
    let url = validate_url(&req.url)?;

    let job = Job::from_url(new_job_id(), url);
    submit(&state, job, "URL received. Video download and analysis has started.").await
}
