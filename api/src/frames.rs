//! Frame sampling and duration probing through ffmpeg/ffprobe.
//!
//! Frames are sampled at 1fps, capped at `max_frames`, and written as
//! `frame_%04d.jpg` so a lexicographic sort of the file names is temporal
//! order.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::Config;
use crate::error::{AnalysisError, ExtractionError, classify_ffmpeg_failure, tail};
use crate::pipeline::MediaTool;
use crate::process::run_tool;

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(120);
const FFPROBE_TIMEOUT: Duration = Duration::from_secs(30);
const FRAME_JPEG_QUALITY: &str = "2";
const FRAME_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = "jpg";

/// ffmpeg/ffprobe invoker
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.ffprobe_path.clone())
    }
}

#[async_trait]
impl MediaTool for Ffmpeg {
    /// Sample up to `max_frames` frames at 1fps into `output_dir`.
    /// Returns the frame paths in temporal order; never empty on success.
    async fn extract_frames(
        &self,
        video_path: &Path,
        output_dir: &Path,
        max_frames: u32,
    ) -> Result<Vec<PathBuf>, AnalysisError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let pattern = output_dir.join(format!("{}%04d.{}", FRAME_PREFIX, FRAME_EXTENSION));
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-i".into(),
            video_path.into(),
            "-vf".into(),
            "fps=1".into(),
            "-frames:v".into(),
            max_frames.to_string().into(),
            "-q:v".into(),
            FRAME_JPEG_QUALITY.into(),
            "-fps_mode".into(),
            "vfr".into(),
            "-y".into(),
            pattern.into(),
        ];

        let output = run_tool("ffmpeg", &self.ffmpeg_path, args, FFMPEG_TIMEOUT).await?;
        if !output.status.success() {
            let err = classify_ffmpeg_failure(&output.stderr);
            tracing::error!(
                video = %video_path.display(),
                code = ?output.status.code(),
                error = %err,
                "ffmpeg frame extraction failed"
            );
            return Err(err.into());
        }

        let frames = collect_frames(output_dir).await?;
        tracing::info!(count = frames.len(), "Extracted frames from video");
        Ok(frames)
    }

    /// Container duration in seconds. Unparsable output yields 0.0.
    async fn probe_duration(&self, video_path: &Path) -> Result<f64, AnalysisError> {
        let args: Vec<OsString> = vec![
            "-v".into(),
            "error".into(),
            "-show_entries".into(),
            "format=duration".into(),
            "-of".into(),
            "default=noprint_wrappers=1:nokey=1".into(),
            video_path.into(),
        ];

        let output = run_tool("ffprobe", &self.ffprobe_path, args, FFPROBE_TIMEOUT).await?;
        if !output.status.success() {
            return Err(ExtractionError::Failed(format!(
                "ffprobe failed (code {:?}): {}",
                output.status.code(),
                tail(&output.stderr)
            ))
            .into());
        }

        Ok(parse_duration(&output.stdout))
    }
}

fn parse_duration(stdout: &str) -> f64 {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0)
}

fn is_frame_file(path: &Path) -> bool {
    path.extension().map(|e| e == FRAME_EXTENSION).unwrap_or(false)
        && path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(FRAME_PREFIX))
            .unwrap_or(false)
}

/// Frame files in `dir`, sorted. Zero frames is an error.
pub async fn collect_frames(dir: &Path) -> Result<Vec<PathBuf>, AnalysisError> {
    let mut frame_files: Vec<PathBuf> = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_frame_file(&path) {
            frame_files.push(path);
        }
    }
    frame_files.sort();

    if frame_files.is_empty() {
        return Err(AnalysisError::NoFramesExtracted);
    }
    Ok(frame_files)
}

/// Delete every file in the frame directory, then the directory itself.
/// Failures are logged, never returned.
pub async fn cleanup_frames(output_dir: &Path) {
    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(dir = %output_dir.display(), error = %e, "Failed to read frame dir for cleanup");
            return;
        }
    };

    let mut removed = 0usize;
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    file = %entry.path().display(),
                    error = %e,
                    "Failed to remove frame file"
                ),
            },
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(dir = %output_dir.display(), error = %e, "Failed to list frame dir");
                break;
            }
        }
    }

    if let Err(e) = tokio::fs::remove_dir(output_dir).await {
        tracing::warn!(dir = %output_dir.display(), error = %e, "Failed to remove frame dir");
    }
    tracing::debug!(removed, dir = %output_dir.display(), "Cleaned up frame files");
}
