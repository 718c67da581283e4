//! Playback control over the source being exported.

use async_trait::async_trait;

use reelfx_effect_model::AudioTrack;

use crate::error::CaptureResult;

/// The host's media element, driven by the capture session.
///
/// The session seeks to zero, plays once to the end, then pauses and
/// rewinds.
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    fn duration_secs(&self) -> f64;

    fn position_secs(&self) -> f64;

    fn is_ended(&self) -> bool;

    async fn seek(&self, position_secs: f64) -> CaptureResult<()>;

    async fn play(&self) -> CaptureResult<()>;

    async fn pause(&self);

    /// A new subscription to the source's audio, if it has any.
    fn audio_track(&self) -> Option<AudioTrack>;
}
