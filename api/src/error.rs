//! Error taxonomy for the analysis pipeline.
//!
//! Every variant renders as a plain sentence; that text becomes the job's
//! terminal error message. Subprocess diagnostics are matched against known
//! substrings in [`classify_download_failure`] and [`classify_ffmpeg_failure`]
//! only, so the matching rules live in one place.

use thiserror::Error;

/// Longest diagnostic tail surfaced to users
pub const DIAGNOSTIC_TAIL_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),

    #[error("Video too long: {actual_secs}s (max: {max_secs}s)")]
    DurationExceeded { actual_secs: u64, max_secs: u64 },

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("No frames could be extracted from the video. The file may be corrupted.")]
    NoFramesExtracted,

    #[error("AI service could not analyze any frames. Please ensure the AI service is running.")]
    NoUsablePredictions,

    #[error("{tool} not found at: {path}. Please install it or set its path in the environment.")]
    ToolNotFound { tool: &'static str, path: String },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: &'static str, secs: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum AcquisitionError {
    #[error(
        "This URL is not supported. Please try YouTube, Instagram, TikTok, Twitter/X, or a direct .mp4 link."
    )]
    UnsupportedUrl,

    #[error("This video is private or requires login. Please use a publicly accessible video URL.")]
    PrivateOrLoginRequired,

    #[error("This video is unavailable or has been removed.")]
    Unavailable,

    #[error("Access denied by the platform. This video may be restricted.")]
    Forbidden,

    #[error("Too many requests to this platform. Please try again in a few minutes.")]
    RateLimited,

    #[error("Downloaded video too large: {size_mb:.1}MB")]
    TooLarge { size_mb: f64 },

    #[error("Failed to download video: {0}")]
    Failed(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum ExtractionError {
    #[error(
        "The downloaded file is not a valid video. The URL may point to an HTML page or a redirected download. Please use a direct video link (ending in .mp4, .webm, etc)."
    )]
    CorruptInput,

    #[error("Video file not found. It may have been deleted or the download failed.")]
    MissingInput,

    #[error("FFmpeg processing error: {0}")]
    Failed(String),
}

/// Last `DIAGNOSTIC_TAIL_CHARS` characters of a diagnostic, trimmed.
pub fn tail(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= DIAGNOSTIC_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed
        .chars()
        .skip(count - DIAGNOSTIC_TAIL_CHARS)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Map platform-extraction tool output to a user-facing failure kind.
pub fn classify_download_failure(stderr: &str) -> AcquisitionError {
    let msg = stderr.trim();
    if msg.contains("is not a valid URL") || msg.contains("Unsupported URL") {
        AcquisitionError::UnsupportedUrl
    } else if msg.contains("Private video") || msg.contains("Sign in") || msg.contains("login") {
        AcquisitionError::PrivateOrLoginRequired
    } else if msg.contains("Video unavailable") || msg.contains("removed") {
        AcquisitionError::Unavailable
    } else if msg.contains("403") || msg.contains("Forbidden") {
        AcquisitionError::Forbidden
    } else if msg.contains("429") || msg.contains("rate limit") || msg.contains("Too Many Requests")
    {
        AcquisitionError::RateLimited
    } else if msg.is_empty() {
        AcquisitionError::Failed("Unknown yt-dlp error".to_string())
    } else {
        AcquisitionError::Failed(tail(msg))
    }
}

/// Map media tool stderr to a frame extraction failure kind.
pub fn classify_ffmpeg_failure(stderr: &str) -> ExtractionError {
    if stderr.contains("moov atom not found") || stderr.contains("Invalid data found") {
        ExtractionError::CorruptInput
    } else if stderr.contains("No such file or directory") {
        ExtractionError::MissingInput
    } else {
        ExtractionError::Failed(tail(stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_failure_classification() {
        assert_eq!(
            classify_download_failure("ERROR: Unsupported URL: https://example.com"),
            AcquisitionError::UnsupportedUrl
        );
        assert_eq!(
            classify_download_failure("ERROR: 'foo' is not a valid URL"),
            AcquisitionError::UnsupportedUrl
        );
        assert_eq!(
            classify_download_failure("ERROR: [youtube] abc: Private video"),
            AcquisitionError::PrivateOrLoginRequired
        );
        assert_eq!(
            classify_download_failure("ERROR: Sign in to confirm your age"),
            AcquisitionError::PrivateOrLoginRequired
        );
        assert_eq!(
            classify_download_failure("ERROR: Video unavailable"),
            AcquisitionError::Unavailable
        );
        assert_eq!(
            classify_download_failure("This video has been removed by the uploader"),
            AcquisitionError::Unavailable
        );
        assert_eq!(
            classify_download_failure("HTTP Error 403: Forbidden"),
            AcquisitionError::Forbidden
        );
        assert_eq!(
            classify_download_failure("HTTP Error 429: Too Many Requests"),
            AcquisitionError::RateLimited
        );
    }

    #[test]
    fn test_unknown_download_failure_keeps_tail() {
        let noise = "x".repeat(1000);
        let err = classify_download_failure(&format!("{}END", noise));
        match err {
            AcquisitionError::Failed(msg) => {
                assert_eq!(msg.chars().count(), DIAGNOSTIC_TAIL_CHARS);
                assert!(msg.ends_with("END"));
            }
            other => panic!("unexpected classification: {:?}", other),
        }

        assert_eq!(
            classify_download_failure("   "),
            AcquisitionError::Failed("Unknown yt-dlp error".to_string())
        );
    }

    #[test]
    fn test_ffmpeg_failure_classification() {
        assert_eq!(
            classify_ffmpeg_failure("[mov,mp4] moov atom not found\ninput.mp4: Invalid data"),
            ExtractionError::CorruptInput
        );
        assert_eq!(
            classify_ffmpeg_failure("input.mp4: Invalid data found when processing input"),
            ExtractionError::CorruptInput
        );
        assert_eq!(
            classify_ffmpeg_failure("missing.mp4: No such file or directory"),
            ExtractionError::MissingInput
        );
        assert_eq!(
            classify_ffmpeg_failure("  Conversion failed!  "),
            ExtractionError::Failed("Conversion failed!".to_string())
        );
    }

    #[test]
    fn test_messages_are_plain_sentences() {
        let err = AnalysisError::DurationExceeded {
            actual_secs: 412,
            max_secs: 300,
        };
        assert_eq!(err.to_string(), "Video too long: 412s (max: 300s)");

        let err: AnalysisError = AcquisitionError::TooLarge { size_mb: 150.26 }.into();
        assert_eq!(err.to_string(), "Downloaded video too large: 150.3MB");

        let err = AnalysisError::Timeout {
            tool: "ffmpeg",
            secs: 120,
        };
        assert_eq!(err.to_string(), "ffmpeg timed out after 120s");
    }
}
