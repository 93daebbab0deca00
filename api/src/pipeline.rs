//! Job orchestration: acquisition, validation, frame extraction, inference
//! and aggregation for a single job.
//!
//! Each collaborator sits behind a trait so tests can swap in fakes. The
//! pipeline never touches the job store directly; progress goes through a
//! `ProgressSink` and the terminal write is the caller's job.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::acquisition::Acquirer;
use crate::aggregate::aggregate;
use crate::config::Config;
use crate::error::AnalysisError;
use crate::frames::{Ffmpeg, cleanup_frames};
use crate::models::{AnalysisResult, FramePrediction, Job, JobSource, ProcessingTimeline, Stage};
use crate::services::inference::InferenceClient;

/// Resolves a remote URL to a local video file
#[async_trait]
pub trait VideoAcquirer: Send + Sync {
    async fn acquire(&self, url: &str, job_id: &str) -> Result<PathBuf, AnalysisError>;
}

#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe_duration(&self, video_path: &Path) -> Result<f64, AnalysisError>;

    async fn extract_frames(
        &self,
        video_path: &Path,
        output_dir: &Path,
        max_frames: u32,
    ) -> Result<Vec<PathBuf>, AnalysisError>;
}

/// Scores frames. Failed frames are dropped, so the output may be shorter
/// than the input (or empty).
#[async_trait]
pub trait FrameClassifier: Send + Sync {
    async fn classify(&self, frame_paths: &[PathBuf]) -> Vec<FramePrediction>;
}

/// Receives stage transitions for one job
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, percent: u8, stage: Stage);
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    acquirer: Arc<dyn VideoAcquirer>,
    media: Arc<dyn MediaTool>,
    classifier: Arc<dyn FrameClassifier>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        acquirer: Arc<dyn VideoAcquirer>,
        media: Arc<dyn MediaTool>,
        classifier: Arc<dyn FrameClassifier>,
    ) -> Self {
        Self {
            config,
            acquirer,
            media,
            classifier,
        }
    }

    /// Wire up the production collaborators from configuration.
    pub fn from_config(config: Arc<Config>) -> Result<Self, reqwest::Error> {
        let acquirer = Acquirer::from_config(&config)?;
        let media = Ffmpeg::from_config(&config);
        let classifier = InferenceClient::new(config.ai_service_url.clone(), config.ai_service_timeout);
        Ok(Self::new(
            config,
            Arc::new(acquirer),
            Arc::new(media),
            Arc::new(classifier),
        ))
    }

    /// Run one job end to end. Working files are removed on every exit path.
    pub async fn run(
        &self,
        job: &Job,
        progress: &dyn ProgressSink,
    ) -> Result<AnalysisResult, AnalysisError> {
        let frames_dir = self.config.frames_dir(&job.job_id);
        let mut video_path = match &job.source {
            JobSource::Upload { file_path, .. } => Some(file_path.clone()),
            JobSource::Url { .. } => None,
        };

        tracing::info!(
            job_id = %job.job_id,
            source = job.source.kind(),
            reference = %job.source.reference(),
            "Starting analysis"
        );
        let outcome = self
            .run_stages(job, progress, &frames_dir, &mut video_path)
            .await;

        cleanup_frames(&frames_dir).await;
        if let Some(path) = &video_path {
            remove_video(path).await;
        }

        match &outcome {
            Ok(result) => tracing::info!(
                job_id = %job.job_id,
                verdict = %result.verdict,
                confidence = result.confidence,
                "Analysis complete"
            ),
            Err(e) => tracing::error!(job_id = %job.job_id, error = %e, "Analysis failed"),
        }
        outcome
    }

    async fn run_stages(
        &self,
        job: &Job,
        progress: &dyn ProgressSink,
        frames_dir: &Path,
        video_path: &mut Option<PathBuf>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let mut timeline = ProcessingTimeline::start();
        report(progress, Stage::Starting).await;

        let video = match &job.source {
            JobSource::Url { url } => {
                report(progress, Stage::Downloading).await;
                let path = self.acquirer.acquire(url, &job.job_id).await?;
                *video_path = Some(path.clone());
                timeline.downloaded_at = Some(Utc::now());
                path
            }
            JobSource::Upload { file_path, .. } => file_path.clone(),
        };

        report(progress, Stage::Validating).await;
        match self.media.probe_duration(&video).await {
            Ok(duration) => {
                timeline.duration_sec = duration;
                let max_secs = self.config.max_duration_secs;
                if duration > max_secs as f64 {
                    return Err(AnalysisError::DurationExceeded {
                        actual_secs: duration.round() as u64,
                        max_secs,
                    });
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "Duration probe failed, continuing");
            }
        }
        timeline.validated_at = Some(Utc::now());

        report(progress, Stage::ExtractingFrames).await;
        let frames = self
            .media
            .extract_frames(&video, frames_dir, self.config.max_frames)
            .await?;
        timeline.frames_extracted = frames.len();
        timeline.frames_extracted_at = Some(Utc::now());

        report(progress, Stage::Analyzing).await;
        let predictions = self.classifier.classify(&frames).await;
        if predictions.is_empty() {
            return Err(AnalysisError::NoUsablePredictions);
        }
        timeline.analyzed_at = Some(Utc::now());

        report(progress, Stage::Aggregating).await;
        timeline.completed_at = Some(Utc::now());
        let result = aggregate(&predictions, timeline);

        report(progress, Stage::Complete).await;
        Ok(result)
    }
}

async fn report(progress: &dyn ProgressSink, stage: Stage) {
    progress.report(stage.percent(), stage).await;
}

async fn remove_video(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(file = %path.display(), "Removed video file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(file = %path.display(), error = %e, "Failed to remove video file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AcquisitionError;
    use crate::models::Verdict;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeAcquirer {
        dir: PathBuf,
        fail: bool,
    }

    #[async_trait]
    impl VideoAcquirer for FakeAcquirer {
        async fn acquire(&self, _url: &str, job_id: &str) -> Result<PathBuf, AnalysisError> {
            if self.fail {
                return Err(AcquisitionError::PrivateOrLoginRequired.into());
            }
            let path = self.dir.join(format!("{}.mp4", job_id));
            tokio::fs::write(&path, b"video").await?;
            Ok(path)
        }
    }

    struct FakeMedia {
        duration: Option<f64>,
        frame_count: usize,
        extracted: AtomicBool,
    }

    #[async_trait]
    impl MediaTool for FakeMedia {
        async fn probe_duration(&self, _video_path: &Path) -> Result<f64, AnalysisError> {
            self.duration.ok_or(AnalysisError::ToolNotFound {
                tool: "ffprobe",
                path: "ffprobe".to_string(),
            })
        }

        async fn extract_frames(
            &self,
            _video_path: &Path,
            output_dir: &Path,
            max_frames: u32,
        ) -> Result<Vec<PathBuf>, AnalysisError> {
            self.extracted.store(true, Ordering::SeqCst);
            tokio::fs::create_dir_all(output_dir).await?;
            let mut frames = Vec::new();
            for i in 1..=self.frame_count.min(max_frames as usize) {
                let path = output_dir.join(format!("frame_{:04}.jpg", i));
                tokio::fs::write(&path, b"jpg").await?;
                frames.push(path);
            }
            if frames.is_empty() {
                return Err(AnalysisError::NoFramesExtracted);
            }
            Ok(frames)
        }
    }

    struct FakeClassifier {
        fake_probability: Option<f64>,
    }

    #[async_trait]
    impl FrameClassifier for FakeClassifier {
        async fn classify(&self, frame_paths: &[PathBuf]) -> Vec<FramePrediction> {
            match self.fake_probability {
                Some(fake) => frame_paths
                    .iter()
                    .enumerate()
                    .map(|(i, _)| FramePrediction {
                        frame_index: i + 1,
                        real_probability: 1.0 - fake,
                        fake_probability: fake,
                        model_version: Some("fake".to_string()),
                    })
                    .collect(),
                None => Vec::new(),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        reports: Mutex<Vec<(u8, Stage)>>,
    }

    impl RecordingSink {
        fn stages(&self) -> Vec<Stage> {
            self.reports.lock().unwrap().iter().map(|(_, s)| *s).collect()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn report(&self, percent: u8, stage: Stage) {
            self.reports.lock().unwrap().push((percent, stage));
        }
    }

    struct Harness {
        root: tempfile::TempDir,
        media: Arc<FakeMedia>,
        pipeline: Pipeline,
    }

    fn harness(
        duration: Option<f64>,
        frame_count: usize,
        fake_probability: Option<f64>,
        acquire_fails: bool,
    ) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let vars: HashMap<&str, String> = HashMap::from([
            ("TEMP_DIR", root.path().to_string_lossy().into_owned()),
            ("MAX_DURATION_SEC", "60".to_string()),
            ("MAX_FRAMES", "5".to_string()),
        ]);
        let config = Arc::new(Config::from_lookup(|key| vars.get(key).cloned()));
        let media = Arc::new(FakeMedia {
            duration,
            frame_count,
            extracted: AtomicBool::new(false),
        });
        let pipeline = Pipeline::new(
            config,
            Arc::new(FakeAcquirer {
                dir: root.path().to_path_buf(),
                fail: acquire_fails,
            }),
            media.clone(),
            Arc::new(FakeClassifier { fake_probability }),
        );
        Harness {
            root,
            media,
            pipeline,
        }
    }

    fn upload_job(h: &Harness, job_id: &str) -> Job {
        let path = h.root.path().join(format!("{}.mp4", job_id));
        std::fs::write(&path, b"video").unwrap();
        Job::from_upload(job_id.to_string(), path, Some("clip.mp4".to_string()))
    }

    #[tokio::test]
    async fn test_url_job_reports_every_stage_in_order() {
        let h = harness(Some(12.0), 3, Some(0.9), false);
        let sink = RecordingSink::default();
        let job = Job::from_url("job1".to_string(), "https://example.com/a.mp4".to_string());

        let result = h.pipeline.run(&job, &sink).await.unwrap();
        assert_eq!(result.verdict, Verdict::AiGenerated);
        assert_eq!(result.frames_analyzed, 3);
        assert_eq!(result.timeline.frames_extracted, 3);
        assert_eq!(result.timeline.duration_sec, 12.0);
        assert!(result.timeline.downloaded_at.is_some());
        assert!(result.timeline.completed_at.is_some());

        assert_eq!(
            sink.stages(),
            vec![
                Stage::Starting,
                Stage::Downloading,
                Stage::Validating,
                Stage::ExtractingFrames,
                Stage::Analyzing,
                Stage::Aggregating,
                Stage::Complete,
            ]
        );
        let percents: Vec<u8> = sink.reports.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100));

        // Downloaded video and frame dir are gone
        assert!(!h.root.path().join("job1.mp4").exists());
        assert!(!h.pipeline.config.frames_dir("job1").exists());
    }

    #[tokio::test]
    async fn test_upload_job_skips_downloading() {
        let h = harness(Some(5.0), 2, Some(0.1), false);
        let sink = RecordingSink::default();
        let job = upload_job(&h, "up1");

        let result = h.pipeline.run(&job, &sink).await.unwrap();
        assert_eq!(result.verdict, Verdict::Real);
        assert!(result.timeline.downloaded_at.is_none());
        assert!(!sink.stages().contains(&Stage::Downloading));
        assert!(!h.root.path().join("up1.mp4").exists());
    }

    #[tokio::test]
    async fn test_probe_failure_still_extracts_frames() {
        let h = harness(None, 2, Some(0.7), false);
        let sink = RecordingSink::default();
        let job = upload_job(&h, "probe1");

        let result = h.pipeline.run(&job, &sink).await.unwrap();
        assert!(h.media.extracted.load(Ordering::SeqCst));
        assert_eq!(result.timeline.duration_sec, 0.0);
        assert!(result.timeline.validated_at.is_some());
    }

    #[tokio::test]
    async fn test_long_video_is_rejected_before_extraction() {
        let h = harness(Some(412.4), 2, Some(0.7), false);
        let sink = RecordingSink::default();
        let job = upload_job(&h, "long1");

        let err = h.pipeline.run(&job, &sink).await.unwrap_err();
        assert_eq!(err.to_string(), "Video too long: 412s (max: 60s)");
        assert!(!h.media.extracted.load(Ordering::SeqCst));
        assert!(!h.root.path().join("long1.mp4").exists());
        assert_eq!(sink.stages().last(), Some(&Stage::Validating));
    }

    #[tokio::test]
    async fn test_no_predictions_fails_job() {
        let h = harness(Some(5.0), 3, None, false);
        let sink = RecordingSink::default();
        let job = upload_job(&h, "noai");

        let err = h.pipeline.run(&job, &sink).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoUsablePredictions));
        assert!(!h.pipeline.config.frames_dir("noai").exists());
    }

    #[tokio::test]
    async fn test_zero_frames_is_distinct_from_empty_aggregation() {
        let h = harness(Some(5.0), 0, Some(0.5), false);
        let sink = RecordingSink::default();
        let job = upload_job(&h, "empty");

        let err = h.pipeline.run(&job, &sink).await.unwrap_err();
        assert!(matches!(err, AnalysisError::NoFramesExtracted));
        assert!(!sink.stages().contains(&Stage::Analyzing));
    }

    #[tokio::test]
    async fn test_acquisition_failure_surfaces_message() {
        let h = harness(Some(5.0), 2, Some(0.5), true);
        let sink = RecordingSink::default();
        let job = Job::from_url("priv".to_string(), "https://youtube.com/watch?v=x".to_string());

        let err = h.pipeline.run(&job, &sink).await.unwrap_err();
        assert!(err.to_string().contains("private or requires login"));
        assert_eq!(sink.stages(), vec![Stage::Starting, Stage::Downloading]);
    }

    #[tokio::test]
    async fn test_frame_cap_comes_from_config() {
        let h = harness(Some(5.0), 50, Some(0.2), false);
        let sink = RecordingSink::default();
        let job = upload_job(&h, "cap");

        let result = h.pipeline.run(&job, &sink).await.unwrap();
        assert_eq!(result.frames_analyzed, 5);
    }
}
