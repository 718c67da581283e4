//! Export settings, progress events, and produced artifacts.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use reelfx_common::config::ExportDefaults;
use reelfx_common::error::{ReelError, ReelResult};

/// Recording quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

impl Quality {
    /// Video bitrate used by the recorder.
    pub fn bitrate_bps(self) -> u32 {
        match self {
            Self::High => 8_000_000,
            Self::Medium => 4_000_000,
            Self::Low => 2_000_000,
        }
    }
}

impl FromStr for Quality {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(ReelError::config(format!("unknown quality '{other}'"))),
        }
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// Intermediate container, produced directly by capture.
    #[default]
    WebM,
    /// Target container, produced by transcoding.
    Mp4,
}

impl Container {
    pub const INTERMEDIATE: Container = Container::WebM;

    pub fn is_intermediate(self) -> bool {
        self == Self::INTERMEDIATE
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::WebM => "webm",
            Self::Mp4 => "mp4",
        }
    }

    /// MIME type for the given track layout.
    pub fn mime_type(self, has_audio: bool) -> &'static str {
        match (self, has_audio) {
            (Self::WebM, true) => "video/webm;codecs=vp9,opus",
            (Self::WebM, false) => "video/webm;codecs=vp9",
            (Self::Mp4, _) => "video/mp4",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Container {
    type Err = ReelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webm" => Ok(Self::WebM),
            "mp4" => Ok(Self::Mp4),
            other => Err(ReelError::config(format!("unsupported container '{other}'"))),
        }
    }
}

/// A single export request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub format: Container,
    pub quality: Quality,
    pub fps: u32,
    pub include_audio: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: Container::WebM,
            quality: Quality::High,
            fps: 30,
            include_audio: true,
        }
    }
}

impl ExportSettings {
    pub fn validate(&self) -> ReelResult<()> {
        if self.fps == 0 || self.fps > 240 {
            return Err(ReelError::config(format!(
                "fps must be in 1..=240, got {}",
                self.fps
            )));
        }
        Ok(())
    }

    pub fn needs_transcode(&self) -> bool {
        !self.format.is_intermediate()
    }

    /// Rough output size for a source of `duration_secs`, from the video bitrate.
    pub fn estimated_size_bytes(&self, duration_secs: f64) -> u64 {
        (duration_secs.max(0.0) * self.quality.bitrate_bps() as f64 / 8.0) as u64
    }
}

impl TryFrom<&ExportDefaults> for ExportSettings {
    type Error = ReelError;

    fn try_from(defaults: &ExportDefaults) -> Result<Self, Self::Error> {
        let settings = Self {
            format: defaults.format.parse()?,
            quality: defaults.quality.parse()?,
            fps: defaults.fps,
            include_audio: defaults.include_audio,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Coarse stage reported with progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStage {
    Preparing,
    Recording,
    Finalizing,
    Transcoding,
    Complete,
    Failed,
    Cancelled,
}

impl ExportStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preparing => "preparing",
            Self::Recording => "recording",
            Self::Finalizing => "finalizing",
            Self::Transcoding => "transcoding",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    pub stage: ExportStage,
    /// 0..=100
    pub percent: f64,
    pub message: String,
}

impl ExportProgress {
    pub fn new(stage: ExportStage, percent: f64, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.clamp(0.0, 100.0),
            message: message.into(),
        }
    }
}

/// Progress sink shared across stages.
pub type ProgressCallback = Arc<dyn Fn(ExportProgress) + Send + Sync>;

/// A progress callback that drops every event.
pub fn ignore_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Track layout of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackLayout {
    pub video: bool,
    pub audio_tracks: u8,
}

/// An encoded media file held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub container: Container,
    pub data: Bytes,
    pub tracks: TrackLayout,
    pub duration_secs: f64,
}

impl Artifact {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn mime_type(&self) -> &'static str {
        self.container.mime_type(self.tracks.audio_tracks > 0)
    }

    /// Suggested file name, e.g. `edited-video.mp4`.
    pub fn file_name(&self, stem: &str) -> String {
        format!("{stem}.{}", self.container.extension())
    }
}
