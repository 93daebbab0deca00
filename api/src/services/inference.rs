//! Client for the remote frame classification service.
//!
//! Frames go out in batches of `BATCH_SIZE`; requests within a batch run
//! concurrently and a batch fully resolves before the next one starts. A
//! frame whose request fails is logged and dropped.

use async_trait::async_trait;
use base64::Engine;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::FramePrediction;
use crate::pipeline::FrameClassifier;

pub const BATCH_SIZE: usize = 4;
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct PredictRequest<'a> {
    image: String,
    filename: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    Healthy,
    Unhealthy,
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct InferenceClient {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
            timeout,
        }
    }

    /// Classify every frame, dropping the ones that fail.
    /// Output keeps input order minus dropped frames; each prediction carries
    /// the 1-based position of its frame in `frame_paths`.
    pub async fn classify(&self, frame_paths: &[PathBuf]) -> Vec<FramePrediction> {
        let mut predictions = Vec::with_capacity(frame_paths.len());

        for (batch_no, batch) in frame_paths.chunks(BATCH_SIZE).enumerate() {
            let first_index = batch_no * BATCH_SIZE + 1;
            let results = join_all(
                batch
                    .iter()
                    .enumerate()
                    .map(|(i, path)| self.predict_frame(path, first_index + i)),
            )
            .await;
            predictions.extend(results.into_iter().flatten());
        }

        tracing::info!(
            received = predictions.len(),
            requested = frame_paths.len(),
            "Got frame predictions"
        );
        predictions
    }

    async fn predict_frame(&self, frame_path: &Path, frame_index: usize) -> Option<FramePrediction> {
        match self.try_predict_frame(frame_path).await {
            Ok(prediction) => Some(FramePrediction {
                frame_index,
                ..prediction
            }),
            Err(e) => {
                tracing::warn!(frame = %frame_path.display(), error = %e, "Failed to analyze frame");
                None
            }
        }
    }

    async fn try_predict_frame(
        &self,
        frame_path: &Path,
    ) -> Result<FramePrediction, Box<dyn std::error::Error + Send + Sync>> {
        let image_bytes = tokio::fs::read(frame_path).await?;
        let filename = frame_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let response = self
            .http
            .post(format!("{}/predict", self.base_url))
            .timeout(self.timeout)
            .json(&PredictRequest {
                image: base64::engine::general_purpose::STANDARD.encode(&image_bytes),
                filename: &filename,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("AI service error {}: {}", status, crate::error::tail(&body)).into());
        }

        Ok(response.json::<FramePrediction>().await?)
    }

    /// Probe `GET /health` on the inference service.
    pub async fn health(&self) -> ServiceHealth {
        match self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => ServiceHealth::Healthy,
            Ok(_) => ServiceHealth::Unhealthy,
            Err(_) => ServiceHealth::Unreachable,
        }
    }
}

#[async_trait]
impl FrameClassifier for InferenceClient {
    async fn classify(&self, frame_paths: &[PathBuf]) -> Vec<FramePrediction> {
        InferenceClient::classify(self, frame_paths).await
    }
}
