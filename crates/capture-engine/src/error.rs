//! Capture-layer errors.

use reelfx_common::error::ReelError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The surface produced no video track. Fatal.
    #[error("No capturable video stream: {0}")]
    Unavailable(String),

    /// Audio was requested, missing, and the caller chose to abort.
    #[error("Audio track unavailable: {0}")]
    AudioUnavailable(String),

    #[error("Recorder failed: {0}")]
    Recorder(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Invalid capture settings: {0}")]
    Config(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

impl CaptureError {
    pub fn recorder(msg: impl Into<String>) -> Self {
        Self::Recorder(msg.into())
    }

    pub fn playback(msg: impl Into<String>) -> Self {
        Self::Playback(msg.into())
    }
}

impl From<CaptureError> for ReelError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Unavailable(msg) => ReelError::capture_unavailable(msg),
            CaptureError::AudioUnavailable(msg) => ReelError::audio_unavailable(msg),
            CaptureError::Recorder(msg) => ReelError::recorder(msg),
            CaptureError::Playback(msg) => ReelError::recorder(format!("playback: {msg}")),
            CaptureError::Config(msg) => ReelError::config(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds_survive_conversion() {
        let err: ReelError = CaptureError::Unavailable("surface detached".into()).into();
        assert!(err.is_fatal());

        let err: ReelError = CaptureError::recorder("encoder stalled").into();
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Recorder error: encoder stalled");
    }
}
