//! Process configuration, read once from the environment at startup.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_AI_SERVICE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_AI_SERVICE_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100 MB
const DEFAULT_TEMP_DIR: &str = "./tmp";
const DEFAULT_MAX_FRAMES: u32 = 30;
const DEFAULT_MAX_DURATION_SEC: u64 = 300; // 5 min
const DEFAULT_WORKER_CONCURRENCY: usize = 1;
const DEFAULT_JOB_RETENTION_SECS: u64 = 3600;
const DEFAULT_RATE_LIMIT_BURST: u32 = 100;
const DEFAULT_RATE_LIMIT_PER_SECOND: u64 = 1;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
    pub database_url: Option<String>,
    pub ai_service_url: String,
    pub ai_service_timeout: Duration,
    pub max_file_size: u64,
    pub temp_dir: PathBuf,
    pub max_frames: u32,
    pub max_duration_secs: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ytdlp_path: String,
    pub worker_concurrency: usize,
    pub job_retention: Duration,
    pub rate_limit_burst: u32,
    pub rate_limit_per_second: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config::from_lookup(|_| None)
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or invalid values fall back
    /// to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let string = |key: &str, default: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let positive_u64 = |key: &str, default: u64| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let ffmpeg_path = string("FFMPEG_PATH", "ffmpeg");
        let ffprobe_path = lookup("FFPROBE_PATH")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| derive_ffprobe_path(&ffmpeg_path));

        Config {
            host: string("HOST", DEFAULT_HOST),
            port: lookup("PORT")
                .and_then(|s| s.trim().parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_PORT),
            cors_origin: string("CORS_ORIGIN", DEFAULT_CORS_ORIGIN),
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            ai_service_url: string("AI_SERVICE_URL", DEFAULT_AI_SERVICE_URL)
                .trim_end_matches('/')
                .to_string(),
            ai_service_timeout: Duration::from_millis(positive_u64(
                "AI_SERVICE_TIMEOUT_MS",
                DEFAULT_AI_SERVICE_TIMEOUT_MS,
            )),
            max_file_size: positive_u64("MAX_FILE_SIZE", DEFAULT_MAX_FILE_SIZE),
            temp_dir: PathBuf::from(string("TEMP_DIR", DEFAULT_TEMP_DIR)),
            max_frames: lookup("MAX_FRAMES")
                .and_then(|s| s.trim().parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_MAX_FRAMES),
            max_duration_secs: positive_u64("MAX_DURATION_SEC", DEFAULT_MAX_DURATION_SEC),
            ffmpeg_path,
            ffprobe_path,
            ytdlp_path: string("YTDLP_PATH", "yt-dlp"),
            worker_concurrency: lookup("WORKER_CONCURRENCY")
                .and_then(|s| s.trim().parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_WORKER_CONCURRENCY),
            job_retention: Duration::from_secs(positive_u64(
                "JOB_RETENTION_SECS",
                DEFAULT_JOB_RETENTION_SECS,
            )),
            rate_limit_burst: lookup("RATE_LIMIT_BURST")
                .and_then(|s| s.trim().parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
            rate_limit_per_second: positive_u64(
                "RATE_LIMIT_PER_SECOND",
                DEFAULT_RATE_LIMIT_PER_SECOND,
            ),
        }
    }

    pub fn max_file_size_mb(&self) -> u64 {
        (self.max_file_size / (1024 * 1024)).max(1)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.temp_dir.join("uploads")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.temp_dir.join("downloads")
    }

    /// Per-job frame directory, e.g. `./tmp/frames/<job_id>`
    pub fn frames_dir(&self, job_id: &str) -> PathBuf {
        self.temp_dir.join("frames").join(job_id)
    }
}

/// ffprobe ships next to ffmpeg. If ffmpeg is configured as a path, look in
/// the same directory; a bare command name means both are on PATH.
fn derive_ffprobe_path(ffmpeg_path: &str) -> String {
    if !ffmpeg_path.contains('/') && !ffmpeg_path.contains('\\') {
        return "ffprobe".to_string();
    }
    let dir = Path::new(ffmpeg_path)
        .parent()
        .unwrap_or_else(|| Path::new(""));
    let name = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
    dir.join(name).to_string_lossy().into_owned()
}
