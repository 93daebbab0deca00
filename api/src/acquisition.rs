//! Resolves a remote video URL to a local file.
//!
//! Known platform hosts go straight to yt-dlp. Anything else is first tried
//! as a direct download and falls back to yt-dlp when the response does not
//! look like a video file. A direct download that times out is terminal.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::config::Config;
use crate::error::{AcquisitionError, AnalysisError, classify_download_failure};
use crate::pipeline::VideoAcquirer;
use crate::process::run_tool;

const USER_AGENT: &str = "VidAuth/1.0 VideoDownloader";
const DIRECT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const DIRECT_FETCH_TOOL: &str = "direct download";
/// yt-dlp prints this and exits 0 when `--max-filesize` skips the download
const MAX_FILESIZE_SKIP: &str = "larger than max-filesize";
const YTDLP_TIMEOUT: Duration = Duration::from_secs(180);
/// Anything smaller is an error page, not a video
const MIN_VIDEO_BYTES: u64 = 1024;
const MAGIC_PROBE_BYTES: usize = 12;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

const DIRECT_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "avi", "mkv"];
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// Hosts handled by yt-dlp without trying a direct download first.
/// Subdomains match too.
pub const PLATFORM_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "instagram.com",
    "tiktok.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "fb.watch",
    "reddit.com",
    "v.redd.it",
    "vimeo.com",
    "dailymotion.com",
    "twitch.tv",
    "streamable.com",
    "clipchamp.com",
    "loom.com",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    DirectFetch,
    PlatformExtract,
}

/// Outcome of a single strategy that did not fail terminally
#[derive(Debug)]
enum Attempt {
    Done(PathBuf),
    Fallback(String),
}

pub fn is_platform_url(url: &str) -> bool {
    let host = match Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) {
        Some(host) => host,
        None => return false,
    };
    PLATFORM_HOSTS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{}", p)))
}

/// Strategies to try for `url`, in order.
pub fn plan(url: &str) -> Vec<Strategy> {
    if is_platform_url(url) {
        vec![Strategy::PlatformExtract]
    } else {
        vec![Strategy::DirectFetch, Strategy::PlatformExtract]
    }
}

#[derive(Debug, Clone)]
pub struct Acquirer {
    http: Client,
    downloads_dir: PathBuf,
    max_file_size: u64,
    ytdlp_path: String,
    ffmpeg_location: Option<PathBuf>,
    fetch_timeout: Duration,
}

impl Acquirer {
    pub fn new(
        downloads_dir: PathBuf,
        max_file_size: u64,
        ytdlp_path: impl Into<String>,
        ffmpeg_path: &str,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        // A bare command name means yt-dlp finds ffmpeg on PATH itself
        let ffmpeg_location = if ffmpeg_path.contains('/') || ffmpeg_path.contains('\\') {
            Path::new(ffmpeg_path).parent().map(Path::to_path_buf)
        } else {
            None
        };

        Ok(Self {
            http,
            downloads_dir,
            max_file_size,
            ytdlp_path: ytdlp_path.into(),
            ffmpeg_location,
            fetch_timeout: DIRECT_FETCH_TIMEOUT,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        Self::new(
            config.downloads_dir(),
            config.max_file_size,
            config.ytdlp_path.clone(),
            &config.ffmpeg_path,
        )
    }

    #[cfg(test)]
    fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    fn fetch_timed_out(&self) -> AnalysisError {
        AnalysisError::Timeout {
            tool: DIRECT_FETCH_TOOL,
            secs: self.fetch_timeout.as_secs(),
        }
    }

    fn max_file_size_mb(&self) -> u64 {
        (self.max_file_size / (1024 * 1024)).max(1)
    }

    fn too_large(bytes: u64) -> AnalysisError {
        AcquisitionError::TooLarge {
            size_mb: bytes as f64 / BYTES_PER_MB,
        }
        .into()
    }

    /// Download `url` into `downloads/<job_id>.<ext>`.
    pub async fn acquire(&self, url: &str, job_id: &str) -> Result<PathBuf, AnalysisError> {
        tokio::fs::create_dir_all(&self.downloads_dir).await?;

        let mut last_reason = None;
        for strategy in plan(url) {
            tracing::info!(job_id, url, ?strategy, "Trying acquisition strategy");
            let attempt = match strategy {
                Strategy::DirectFetch => self.direct_fetch(url, job_id).await,
                Strategy::PlatformExtract => self.platform_extract(url, job_id).await,
            };

            match attempt {
                Ok(Attempt::Done(path)) => {
                    tracing::info!(job_id, ?strategy, path = %path.display(), "Video acquired");
                    return Ok(path);
                }
                Ok(Attempt::Fallback(reason)) => {
                    tracing::info!(job_id, ?strategy, reason = %reason, "Strategy declined, falling back");
                    last_reason = Some(reason);
                }
                Err(e) => {
                    self.remove_job_files(job_id).await;
                    return Err(e);
                }
            }
        }

        self.remove_job_files(job_id).await;
        Err(AcquisitionError::Failed(
            last_reason.unwrap_or_else(|| "no acquisition strategy succeeded".to_string()),
        )
        .into())
    }

    async fn direct_fetch(&self, url: &str, job_id: &str) -> Result<Attempt, AnalysisError> {
        // The timeout covers the body as well as the headers
        let mut response = match self.http.get(url).timeout(self.fetch_timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(self.fetch_timed_out()),
            Err(e) => return Ok(Attempt::Fallback(format!("request failed: {}", e))),
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(Attempt::Fallback(format!("HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if content_type.contains("text/html") || content_type.contains("application/json") {
            return Ok(Attempt::Fallback(format!(
                "URL returned {} instead of a video file",
                content_type
            )));
        }

        if let Some(declared) = response.content_length() {
            if declared > self.max_file_size {
                return Err(Self::too_large(declared));
            }
        }

        let path = self
            .downloads_dir
            .join(format!("{}.{}", job_id, extension_for(url)));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut head: Vec<u8> = Vec::with_capacity(MAGIC_PROBE_BYTES);
        let mut written: u64 = 0;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) if e.is_timeout() => {
                    drop(file);
                    remove_file_quietly(&path).await;
                    return Err(self.fetch_timed_out());
                }
                Err(e) => {
                    drop(file);
                    remove_file_quietly(&path).await;
                    return Ok(Attempt::Fallback(format!("download interrupted: {}", e)));
                }
            };

            written += chunk.len() as u64;
            if written > self.max_file_size {
                drop(file);
                remove_file_quietly(&path).await;
                return Err(Self::too_large(written));
            }
            if head.len() < MAGIC_PROBE_BYTES {
                let take = (MAGIC_PROBE_BYTES - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if written < MIN_VIDEO_BYTES {
            remove_file_quietly(&path).await;
            return Ok(Attempt::Fallback(format!(
                "response too small to be a video ({} bytes)",
                written
            )));
        }
        if !content_type.starts_with("video/") && !has_container_magic(&head) {
            remove_file_quietly(&path).await;
            return Ok(Attempt::Fallback(format!(
                "response is not a recognised video container (content type {:?})",
                content_type
            )));
        }

        tracing::info!(job_id, bytes = written, "Direct download complete");
        Ok(Attempt::Done(path))
    }

    async fn platform_extract(&self, url: &str, job_id: &str) -> Result<Attempt, AnalysisError> {
        let size_mb = self.max_file_size_mb();
        let template = self.downloads_dir.join(format!("{}.%(ext)s", job_id));

        let mut args: Vec<OsString> = vec![
            url.into(),
            "-o".into(),
            template.into(),
            "-f".into(),
            format!(
                "worst[ext=mp4]/worst[ext=webm]/worst/best[filesize<{}M]/best",
                size_mb
            )
            .into(),
            "--no-playlist".into(),
            "--max-filesize".into(),
            format!("{}M", size_mb).into(),
            "--socket-timeout".into(),
            "30".into(),
            "--retries".into(),
            "3".into(),
            "--no-check-certificates".into(),
            "--no-warnings".into(),
        ];
        if let Some(dir) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".into());
            args.push(dir.into());
        }

        let output = run_tool("yt-dlp", &self.ytdlp_path, args, YTDLP_TIMEOUT).await?;

        // yt-dlp can exit non-zero on post-processing warnings after the
        // download itself succeeded, so the file decides.
        if let Some(path) = self.find_download(job_id).await? {
            let size = tokio::fs::metadata(&path).await?.len();
            if size > self.max_file_size {
                return Err(Self::too_large(size));
            }
            if !output.status.success() {
                tracing::warn!(job_id, code = ?output.status.code(), "yt-dlp exited non-zero but produced a file");
            }
            return Ok(Attempt::Done(path));
        }

        if output.status.success() {
            let skipped = [&output.stdout, &output.stderr]
                .into_iter()
                .any(|text| text.contains(MAX_FILESIZE_SKIP));
            if skipped {
                let reported = skipped_file_size(&output.stdout)
                    .or_else(|| skipped_file_size(&output.stderr))
                    .unwrap_or(self.max_file_size);
                return Err(Self::too_large(reported));
            }
            return Err(AcquisitionError::Failed(
                "yt-dlp finished but no output file was found".to_string(),
            )
            .into());
        }

        let diagnostics = if output.stderr.trim().is_empty() {
            &output.stdout
        } else {
            &output.stderr
        };
        let err = classify_download_failure(diagnostics);
        tracing::error!(job_id, url, code = ?output.status.code(), error = %err, "yt-dlp failed");
        Err(err.into())
    }

    /// First completed file for the job in the downloads directory
    async fn find_download(&self, job_id: &str) -> Result<Option<PathBuf>, AnalysisError> {
        let mut matches = self.job_files(job_id).await?;
        matches.retain(|p| !is_partial(p));
        matches.sort();
        Ok(matches.into_iter().next())
    }

    async fn job_files(&self, job_id: &str) -> Result<Vec<PathBuf>, AnalysisError> {
        let mut files = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.downloads_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(job_id) {
                files.push(entry.path());
            }
        }
        Ok(files)
    }

    async fn remove_job_files(&self, job_id: &str) {
        match self.job_files(job_id).await {
            Ok(files) => {
                for path in files {
                    remove_file_quietly(&path).await;
                }
            }
            Err(e) => tracing::warn!(job_id, error = %e, "Failed to list partial downloads"),
        }
    }
}

#[async_trait]
impl VideoAcquirer for Acquirer {
    async fn acquire(&self, url: &str, job_id: &str) -> Result<PathBuf, AnalysisError> {
        Acquirer::acquire(self, url, job_id).await
    }
}

/// Byte count from yt-dlp's "File is larger than max-filesize (N bytes > M bytes)"
fn skipped_file_size(text: &str) -> Option<u64> {
    let line = text.lines().find(|l| l.contains(MAX_FILESIZE_SKIP))?;
    let after = &line[line.find('(')? + 1..];
    after.split_whitespace().next()?.parse().ok()
}

fn is_partial(path: &Path) -> bool {
    let name = path.to_string_lossy();
    PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// File extension for a direct download, taken from the URL path when it is
/// a known video type.
fn extension_for(url: &str) -> &'static str {
    let ext = Url::parse(url).ok().and_then(|u| {
        Path::new(u.path())
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    });
    ext.and_then(|e| DIRECT_EXTENSIONS.iter().find(|known| **known == e).copied())
        .unwrap_or("mp4")
}

/// MP4/MOV `ftyp` box, Matroska/WebM EBML header, or AVI `RIFF`
fn has_container_magic(head: &[u8]) -> bool {
    let probe = &head[..head.len().min(MAGIC_PROBE_BYTES)];
    probe.windows(4).any(|w| w == b"ftyp")
        || probe.starts_with(&[0x1a, 0x45, 0xdf, 0xa3])
        || probe.starts_with(b"RIFF")
}

async fn remove_file_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(file = %path.display(), error = %e, "Failed to remove download");
        }
    }
}
