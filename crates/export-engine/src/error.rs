//! Transcode and export errors.

use std::time::Duration;

use reelfx_capture_engine::CaptureError;
use reelfx_common::error::ReelError;

/// Errors from the transcode stage. All of them are offered a fallback.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("Encoder engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Encoder initialization timed out after {0:?}")]
    InitTimeout(Duration),

    #[error("Encoding timed out after {0:?}")]
    EncodeTimeout(Duration),

    #[error("Encoding failed: {0}")]
    Failed(String),

    #[error("Transcode I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;

impl Clone for TranscodeError {
    fn clone(&self) -> Self {
        match self {
            Self::EngineUnavailable(msg) => Self::EngineUnavailable(msg.clone()),
            Self::InitTimeout(d) => Self::InitTimeout(*d),
            Self::EncodeTimeout(d) => Self::EncodeTimeout(*d),
            Self::Failed(msg) => Self::Failed(msg.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

impl TranscodeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::InitTimeout(_) | Self::EncodeTimeout(_))
    }
}

impl From<TranscodeError> for ReelError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::InitTimeout(d) => ReelError::InitTimeout(d),
            TranscodeError::EncodeTimeout(d) => ReelError::EncodeTimeout(d),
            TranscodeError::Io(e) => ReelError::Io(e),
            other => ReelError::transcode(other.to_string()),
        }
    }
}

/// Why an export failed.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Another export is running against the same surface.
    #[error("An export is already running for this surface")]
    Busy,

    #[error("Invalid export settings: {0}")]
    Config(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    /// Transcoding failed and the fallback decision was to abort.
    #[error("Transcode failed: {0}")]
    TranscodeFailure(#[source] TranscodeError),
}

impl From<ExportError> for ReelError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Busy => ReelError::Busy {
                message: err.to_string(),
            },
            ExportError::Config(msg) => ReelError::config(msg),
            ExportError::Capture(e) => e.into(),
            ExportError::TranscodeFailure(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_keep_their_kind() {
        let err: ReelError = TranscodeError::InitTimeout(Duration::from_secs(30)).into();
        assert!(matches!(err, ReelError::InitTimeout(_)));
        let err: ReelError = TranscodeError::EncodeTimeout(Duration::from_secs(120)).into();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_busy_is_fatal() {
        let err: ReelError = ExportError::Busy.into();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_capture_errors_pass_through() {
        let err: ReelError = ExportError::from(CaptureError::Unavailable("none".into())).into();
        assert!(matches!(err, ReelError::CaptureUnavailable { .. }));
    }
}
