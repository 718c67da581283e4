//! Error types shared across ReelFX crates.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for ReelFX operations.
///
/// Layer-specific errors (`GpuError`, `CaptureError`, `TranscodeError`,
/// `ExportError`) convert into this so hosts can handle one type.
#[derive(Debug, thiserror::Error)]
pub enum ReelError {
    /// Invalid dimensions, ratios, or settings. Fatal, never retried.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The render surface produced no capturable video track.
    #[error("Capture unavailable: {message}")]
    CaptureUnavailable { message: String },

    /// Audio was requested but the source has no audio track.
    #[error("Audio unavailable: {message}")]
    AudioUnavailable { message: String },

    #[error("Recorder error: {message}")]
    Recorder { message: String },

    #[error("Encoder initialization timed out after {0:?}")]
    InitTimeout(Duration),

    #[error("Encoding timed out after {0:?}")]
    EncodeTimeout(Duration),

    #[error("Transcode failed: {message}")]
    Transcode { message: String },

    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Export rejected: {message}")]
    Busy { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ReelError.
pub type ReelResult<T> = Result<T, ReelError>;

impl ReelError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn capture_unavailable(msg: impl Into<String>) -> Self {
        Self::CaptureUnavailable {
            message: msg.into(),
        }
    }

    pub fn audio_unavailable(msg: impl Into<String>) -> Self {
        Self::AudioUnavailable {
            message: msg.into(),
        }
    }

    pub fn recorder(msg: impl Into<String>) -> Self {
        Self::Recorder {
            message: msg.into(),
        }
    }

    pub fn transcode(msg: impl Into<String>) -> Self {
        Self::Transcode {
            message: msg.into(),
        }
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    /// Fatal errors are surfaced immediately and never retried or offered a fallback.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::CaptureUnavailable { .. } | Self::Busy { .. }
        )
    }

    /// Timeout-class errors from the transcode stage.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::InitTimeout(_) | Self::EncodeTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ReelError::config("bad ratio").is_fatal());
        assert!(ReelError::capture_unavailable("no track").is_fatal());
        assert!(!ReelError::recorder("flush failed").is_fatal());
        assert!(!ReelError::InitTimeout(Duration::from_secs(30)).is_fatal());
    }

    #[test]
    fn test_timeout_classification() {
        assert!(ReelError::EncodeTimeout(Duration::from_secs(120)).is_timeout());
        assert!(!ReelError::transcode("exit 1").is_timeout());
    }

    #[test]
    fn test_display_messages() {
        let err = ReelError::config("width must be positive");
        assert_eq!(
            err.to_string(),
            "Configuration error: width must be positive"
        );
    }
}
