//! Capture session: records one full playback of a source.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use reelfx_common::config::CaptureConfig;
use reelfx_effect_model::{
    Artifact, AudioTrack, CaptureSurface, Container, ExportProgress, ExportSettings, ExportStage,
    ProgressCallback, Quality, TrackLayout, VideoTrack,
};

use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::{MediaRecorder, RecorderConfig};
use crate::policy::{decide_audio, AudioDecision, AudioFallback, FixedAudioDecision};
use crate::source::PlaybackSource;
use crate::state::{transition, CaptureEvent, CaptureState};

const DEFAULT_DECISION_TIMEOUT: Duration = Duration::from_secs(30);

/// Recording options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub quality: Quality,
    pub fps: u32,
    pub include_audio: bool,
}

impl From<&ExportSettings> for CaptureOptions {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            quality: settings.quality,
            fps: settings.fps,
            include_audio: settings.include_audio,
        }
    }
}

/// Terminal result of a capture.
#[derive(Debug)]
pub enum CaptureOutcome {
    Complete(Artifact),
    Cancelled,
    Failed(CaptureError),
}

enum Step<T> {
    Continue(T),
    Cancelled,
}

/// Records a surface while its source plays once.
///
/// Sessions are single use: `run` drives the state machine to a terminal
/// state and later calls return `Failed`.
pub struct CaptureSession {
    surface: Arc<dyn CaptureSurface>,
    source: Arc<dyn PlaybackSource>,
    recorder: Box<dyn MediaRecorder>,
    audio_policy: Arc<dyn AudioDecision>,
    decision_timeout: Duration,
    config: CaptureConfig,
    state: CaptureState,
}

impl CaptureSession {
    pub fn new(
        surface: Arc<dyn CaptureSurface>,
        source: Arc<dyn PlaybackSource>,
        recorder: Box<dyn MediaRecorder>,
    ) -> Self {
        Self {
            surface,
            source,
            recorder,
            audio_policy: Arc::new(FixedAudioDecision(AudioFallback::ContinueSilent)),
            decision_timeout: DEFAULT_DECISION_TIMEOUT,
            config: CaptureConfig::default(),
            state: CaptureState::Idle,
        }
    }

    pub fn with_config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// Who decides when requested audio is missing, and how long to wait.
    pub fn with_audio_policy(
        mut self,
        policy: Arc<dyn AudioDecision>,
        timeout: Duration,
    ) -> Self {
        self.audio_policy = policy;
        self.decision_timeout = timeout;
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    fn advance(&mut self, event: CaptureEvent) {
        match transition(self.state, event) {
            Some(next) => {
                if next != self.state {
                    tracing::debug!(from = %self.state, to = %next, ?event, "Capture state");
                }
                self.state = next;
            }
            None => {
                tracing::warn!(state = %self.state, ?event, "Ignoring unexpected capture event")
            }
        }
    }

    /// Run the capture to a terminal state.
    ///
    /// Progress: 0 preparing, 10..=80 while recording, 90 finalizing,
    /// 100 complete. Nothing is emitted after the outcome is decided.
    pub async fn run(
        &mut self,
        options: CaptureOptions,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> CaptureOutcome {
        if self.state != CaptureState::Idle {
            return CaptureOutcome::Failed(CaptureError::Config(format!(
                "capture session already {}",
                self.state
            )));
        }
        self.advance(CaptureEvent::Begin);
        tracing::info!(
            quality = ?options.quality,
            fps = options.fps,
            include_audio = options.include_audio,
            recorder = self.recorder.name(),
            "Starting capture"
        );

        match self.record(options, &progress, &cancel).await {
            Ok(Step::Continue(artifact)) => {
                tracing::info!(
                    bytes = artifact.len(),
                    duration_secs = artifact.duration_secs,
                    audio_tracks = artifact.tracks.audio_tracks,
                    "Capture complete"
                );
                CaptureOutcome::Complete(artifact)
            }
            Ok(Step::Cancelled) => {
                self.shutdown().await;
                self.advance(CaptureEvent::CancelRequested);
                tracing::info!("Capture cancelled");
                CaptureOutcome::Cancelled
            }
            Err(e) => {
                self.shutdown().await;
                self.advance(CaptureEvent::Failure);
                tracing::error!(error = %e, "Capture failed");
                CaptureOutcome::Failed(e)
            }
        }
    }

    /// Stop playback and drop whatever the recorder holds.
    async fn shutdown(&mut self) {
        self.source.pause().await;
        self.recorder.abort().await;
    }

    async fn record(
        &mut self,
        options: CaptureOptions,
        progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> CaptureResult<Step<Artifact>> {
        if options.fps == 0 {
            return Err(CaptureError::Config("fps must be positive".into()));
        }
        let duration = self.source.duration_secs();
        if !duration.is_finite() || duration <= 0.0 {
            return Err(CaptureError::Config(format!(
                "source duration must be positive, got {duration}"
            )));
        }

        // Preparing
        progress(ExportProgress::new(ExportStage::Preparing, 0.0, "Preparing export..."));
        self.source.seek(0.0).await?;
        let video = self
            .surface
            .capture_stream(options.fps)
            .ok_or_else(|| CaptureError::Unavailable("surface yields no video track".into()))?;
        if video.width == 0 || video.height == 0 {
            return Err(CaptureError::Unavailable(format!(
                "surface has invalid size {}x{}",
                video.width, video.height
            )));
        }
        self.advance(CaptureEvent::SurfaceVerified);
        if cancel.is_cancelled() {
            return Ok(Step::Cancelled);
        }

        // AcquiringStream
        let audio = match self.acquire_audio(options.include_audio, cancel).await? {
            Step::Continue(audio) => audio,
            Step::Cancelled => return Ok(Step::Cancelled),
        };
        let tracks = TrackLayout {
            video: true,
            audio_tracks: u8::from(audio.is_some()),
        };
        self.advance(CaptureEvent::StreamReady);

        // Recording
        let recorder_config = RecorderConfig {
            width: video.width,
            height: video.height,
            fps: options.fps,
            video_bitrate_bps: options.quality.bitrate_bps(),
            audio_bitrate_bps: audio.as_ref().map(|_| self.config.audio_bitrate_bps),
        };
        let chunks = match self
            .record_chunks(recorder_config, video, audio, duration, progress, cancel)
            .await?
        {
            Step::Continue(chunks) => chunks,
            Step::Cancelled => return Ok(Step::Cancelled),
        };

        // Finalizing
        let recorded_secs = self.source.position_secs().min(duration);
        self.source.pause().await;
        if let Err(e) = self.source.seek(0.0).await {
            tracing::warn!(error = %e, "Failed to rewind source after capture");
        }

        let stopped = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.recorder.stop() => Some(result),
        };
        let Some(final_chunks) = stopped else {
            return Ok(Step::Cancelled);
        };
        let final_chunks = final_chunks?;

        let data = concat(chunks.into_iter().chain(final_chunks));
        if data.is_empty() {
            return Err(CaptureError::recorder("recorder produced no data"));
        }
        progress(ExportProgress::new(ExportStage::Finalizing, 90.0, "Finalizing video..."));
        self.advance(CaptureEvent::RecorderFlushed);
        progress(ExportProgress::new(ExportStage::Complete, 100.0, "Export complete!"));

        Ok(Step::Continue(Artifact {
            container: Container::INTERMEDIATE,
            data,
            tracks,
            duration_secs: recorded_secs,
        }))
    }

    async fn acquire_audio(
        &mut self,
        include_audio: bool,
        cancel: &CancellationToken,
    ) -> CaptureResult<Step<Option<AudioTrack>>> {
        if !include_audio {
            return Ok(Step::Continue(None));
        }
        if let Some(track) = self.source.audio_track() {
            return Ok(Step::Continue(Some(track)));
        }

        tracing::warn!("Audio requested but the source has no audio track");
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Step::Cancelled),
            decision = decide_audio(self.audio_policy.as_ref(), self.decision_timeout) => {
                decision
            }
        };
        match decision {
            AudioFallback::ContinueSilent => {
                tracing::info!("Continuing capture without audio");
                Ok(Step::Continue(None))
            }
            AudioFallback::Abort => Err(CaptureError::AudioUnavailable(
                "source has no audio track".into(),
            )),
        }
    }

    async fn record_chunks(
        &mut self,
        config: RecorderConfig,
        video: VideoTrack,
        audio: Option<AudioTrack>,
        duration: f64,
        progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> CaptureResult<Step<Vec<Bytes>>> {
        self.recorder.start(config, video, audio).await?;
        self.source.play().await?;
        progress(ExportProgress::new(ExportStage::Recording, 10.0, "Recording..."));

        let mut chunks = Vec::new();
        let mut chunk_timer = tokio::time::interval(self.config.chunk_interval());
        chunk_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress_timer = tokio::time::interval(self.config.progress_interval());
        progress_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep(self.config.recording_deadline(duration));
        tokio::pin!(deadline);
        let mut last_percent = 10.0;

        // Both timers live in this loop and stop with it.
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Step::Cancelled),
                _ = &mut deadline => {
                    tracing::warn!(
                        duration_secs = duration,
                        position_secs = self.source.position_secs(),
                        "Playback did not end before the safety timeout, finalizing"
                    );
                    self.advance(CaptureEvent::TimeoutFired);
                    break;
                }
                _ = progress_timer.tick() => {
                    if self.source.is_ended() {
                        self.advance(CaptureEvent::PlaybackEnded);
                        break;
                    }
                    let fraction = (self.source.position_secs() / duration).clamp(0.0, 1.0);
                    let percent = (10.0 + fraction * 70.0).max(last_percent);
                    last_percent = percent;
                    progress(ExportProgress::new(ExportStage::Recording, percent, "Recording..."));
                }
                _ = chunk_timer.tick() => {
                    chunks.extend(self.recorder.request_data().await?);
                    self.advance(CaptureEvent::ChunkFlushed);
                }
            }
        }

        tracing::debug!(chunks = chunks.len(), "Recording stopped");
        Ok(Step::Continue(chunks))
    }
}

fn concat(chunks: impl IntoIterator<Item = Bytes>) -> Bytes {
    let mut out = BytesMut::new();
    for chunk in chunks {
        out.extend_from_slice(&chunk);
    }
    out.freeze()
}
