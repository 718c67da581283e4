//! Injected decision for missing audio.

use std::time::Duration;

use async_trait::async_trait;

/// What to do when audio was requested but the source has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFallback {
    ContinueSilent,
    Abort,
}

/// Asked once per capture when requested audio is unavailable.
#[async_trait]
pub trait AudioDecision: Send + Sync {
    async fn on_audio_unavailable(&self) -> AudioFallback;
}

/// Always answers with the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedAudioDecision(pub AudioFallback);

#[async_trait]
impl AudioDecision for FixedAudioDecision {
    async fn on_audio_unavailable(&self) -> AudioFallback {
        self.0
    }
}

/// Ask `policy`, continuing silently if no answer arrives within `timeout`.
pub async fn decide_audio(policy: &dyn AudioDecision, timeout: Duration) -> AudioFallback {
    match tokio::time::timeout(timeout, policy.on_audio_unavailable()).await {
        Ok(decision) => decision,
        Err(_) => {
            tracing::warn!(
                timeout_secs = timeout.as_secs_f64(),
                "No audio decision arrived, continuing without audio"
            );
            AudioFallback::ContinueSilent
        }
    }
}
