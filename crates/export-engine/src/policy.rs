//! Injected host decisions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use reelfx_capture_engine::{AudioDecision, AudioFallback};

use crate::error::TranscodeError;

/// What to do when transcoding fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeFallback {
    /// Deliver the intermediate (WebM) artifact instead.
    AcceptIntermediate,
    Abort,
}

/// Decisions the orchestrator delegates to its host, typically by asking
/// the user.
#[async_trait]
pub trait DecisionPolicy: Send + Sync {
    async fn on_audio_unavailable(&self) -> AudioFallback;

    /// Asked exactly once per failed transcode.
    async fn on_transcode_failed(&self, error: &TranscodeError) -> TranscodeFallback;
}

/// Fixed answers.
#[derive(Debug, Clone, Copy)]
pub struct StaticPolicy {
    pub audio: AudioFallback,
    pub transcode: TranscodeFallback,
}

impl Default for StaticPolicy {
    fn default() -> Self {
        Self {
            audio: AudioFallback::ContinueSilent,
            transcode: TranscodeFallback::AcceptIntermediate,
        }
    }
}

#[async_trait]
impl DecisionPolicy for StaticPolicy {
    async fn on_audio_unavailable(&self) -> AudioFallback {
        self.audio
    }

    async fn on_transcode_failed(&self, _error: &TranscodeError) -> TranscodeFallback {
        self.transcode
    }
}

/// Ask `policy` about a failed transcode, accepting the intermediate
/// artifact if no answer arrives within `timeout`.
pub async fn decide_transcode(
    policy: &dyn DecisionPolicy,
    error: &TranscodeError,
    timeout: Duration,
) -> TranscodeFallback {
    match tokio::time::timeout(timeout, policy.on_transcode_failed(error)).await {
        Ok(decision) => decision,
        Err(_) => {
            tracing::warn!(
                timeout_secs = timeout.as_secs_f64(),
                "No transcode decision arrived, delivering the intermediate artifact"
            );
            TranscodeFallback::AcceptIntermediate
        }
    }
}

/// Adapts a [`DecisionPolicy`] to the capture session's audio decision.
pub(crate) struct AudioBridge(pub Arc<dyn DecisionPolicy>);

#[async_trait]
impl AudioDecision for AudioBridge {
    async fn on_audio_unavailable(&self) -> AudioFallback {
        self.0.on_audio_unavailable().await
    }
}
