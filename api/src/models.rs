//! Shared data models used across modules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Where a job's video comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sourceType", rename_all = "lowercase")]
pub enum JobSource {
    Upload {
        #[serde(rename = "filePath")]
        file_path: PathBuf,
        #[serde(rename = "originalName", default)]
        original_name: Option<String>,
    },
    Url {
        url: String,
    },
}

impl JobSource {
    pub fn kind(&self) -> &'static str {
        match self {
            JobSource::Upload { .. } => "upload",
            JobSource::Url { .. } => "url",
        }
    }

    /// File path for uploads, URL for remote sources
    pub fn reference(&self) -> String {
        match self {
            JobSource::Upload { file_path, .. } => file_path.to_string_lossy().into_owned(),
            JobSource::Url { url } => url.clone(),
        }
    }
}

/// One submitted analysis request. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(flatten)]
    pub source: JobSource,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn from_upload(job_id: String, file_path: PathBuf, original_name: Option<String>) -> Self {
        Job {
            job_id,
            source: JobSource::Upload {
                file_path,
                original_name,
            },
            created_at: Utc::now(),
        }
    }

    pub fn from_url(job_id: String, url: String) -> Self {
        Job {
            job_id,
            source: JobSource::Url { url },
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {}", other)),
        }
    }
}

/// Named phase of job processing, reported alongside progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Starting,
    Downloading,
    Validating,
    ExtractingFrames,
    Analyzing,
    Aggregating,
    Complete,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::Starting => "starting",
            Stage::Downloading => "downloading",
            Stage::Validating => "validating",
            Stage::ExtractingFrames => "extracting_frames",
            Stage::Analyzing => "analyzing",
            Stage::Aggregating => "aggregating",
            Stage::Complete => "complete",
        }
    }

    /// Progress percent reported when the stage starts
    pub fn percent(&self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::Starting => 5,
            Stage::Downloading => 10,
            Stage::Validating => 20,
            Stage::ExtractingFrames => 30,
            Stage::Analyzing => 50,
            Stage::Aggregating => 85,
            Stage::Complete => 100,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Stage::Queued),
            "starting" => Ok(Stage::Starting),
            "downloading" => Ok(Stage::Downloading),
            "validating" => Ok(Stage::Validating),
            "extracting_frames" => Ok(Stage::ExtractingFrames),
            "analyzing" => Ok(Stage::Analyzing),
            "aggregating" => Ok(Stage::Aggregating),
            "complete" => Ok(Stage::Complete),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// Current state of a job as held by the job store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub stage: Stage,
    pub result: Option<AnalysisResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: &Job) -> Self {
        let now = Utc::now();
        JobRecord {
            job_id: job.job_id.clone(),
            status: JobStatus::Processing,
            progress: 0,
            stage: Stage::Queued,
            result: None,
            error: None,
            created_at: job.created_at,
            updated_at: now,
        }
    }
}

/// Per-frame output of the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePrediction {
    /// 1-based position of the source frame in the extracted sequence.
    /// Assigned by the client, so it survives dropped frames.
    #[serde(default, skip_serializing)]
    pub frame_index: usize,
    pub real_probability: f64,
    pub fake_probability: f64,
    #[serde(default)]
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Real,
    AiGenerated,
    Inconclusive,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Real => f.write_str("REAL"),
            Verdict::AiGenerated => f.write_str("AI_GENERATED"),
            Verdict::Inconclusive => f.write_str("INCONCLUSIVE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameScore {
    pub frame_index: usize,
    pub real_probability: f64,
    pub fake_probability: f64,
}

/// Stage-entry timestamps and derived metrics for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTimeline {
    pub started_at: DateTime<Utc>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub validated_at: Option<DateTime<Utc>>,
    pub frames_extracted_at: Option<DateTime<Utc>>,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_sec: f64,
    pub frames_extracted: usize,
}

impl ProcessingTimeline {
    pub fn start() -> Self {
        ProcessingTimeline {
            started_at: Utc::now(),
            downloaded_at: None,
            validated_at: None,
            frames_extracted_at: None,
            analyzed_at: None,
            completed_at: None,
            duration_sec: 0.0,
            frames_extracted: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub verdict: Verdict,
    pub confidence: f64,
    pub real_probability: f64,
    pub fake_probability: f64,
    pub explanation: String,
    pub frame_scores: Vec<FrameScore>,
    pub timeline: ProcessingTimeline,
    pub frames_analyzed: usize,
    pub model_version: Option<String>,
}
