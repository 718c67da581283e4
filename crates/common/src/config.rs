//! Application configuration.
//!
//! Library entry points take these structs directly; only the CLI reads
//! them from disk via [`AppConfig::load`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Defaults offered for new export requests.
    pub export: ExportDefaults,

    /// Capture pipeline tuning.
    pub capture: CaptureConfig,

    /// Transcode engine settings.
    pub transcode: TranscodeConfig,

    /// Bounds on host decisions (audio missing, transcode fallback).
    pub decisions: DecisionConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Container: "webm" (intermediate) or "mp4" (target).
    pub format: String,

    /// Quality preset: "high", "medium" or "low".
    pub quality: String,

    /// Capture frame rate.
    pub fps: u32,

    /// Whether to record the source audio track.
    pub include_audio: bool,
}

/// Capture pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Recorder time-slice; each slice is flushed as one chunk.
    pub chunk_interval_ms: u64,

    /// Progress polling interval.
    pub progress_interval_ms: u64,

    /// Added to the source duration to form the recording safety timeout.
    pub safety_margin_secs: f64,

    /// Audio bitrate used when an audio track is recorded.
    pub audio_bitrate_bps: u32,
}

/// Transcode engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Explicit ffmpeg binary; looked up on `PATH` when unset.
    pub ffmpeg_path: Option<PathBuf>,

    /// Upper bound on engine initialization.
    pub init_timeout_secs: u64,

    /// Upper bound on a single encode.
    pub encode_timeout_secs: u64,

    /// x264 constant rate factor.
    pub crf: u8,

    /// x264 preset.
    pub preset: String,

    /// AAC bitrate, ffmpeg syntax (e.g. "128k").
    pub audio_bitrate: String,
}

/// Bounds on injected decision callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// How long to wait for a host decision before applying the default.
    pub timeout_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelfx=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            format: "webm".to_string(),
            quality: "high".to_string(),
            fps: 30,
            include_audio: true,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_interval_ms: 100,
            progress_interval_ms: 100,
            safety_margin_secs: 2.0,
            audio_bitrate_bps: 128_000,
        }
    }
}

impl CaptureConfig {
    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms.max(1))
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    /// Safety timeout for a source of the given duration.
    pub fn recording_deadline(&self, duration_secs: f64) -> Duration {
        Duration::from_secs_f64((duration_secs + self.safety_margin_secs).max(0.0))
    }
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            init_timeout_secs: 30,
            encode_timeout_secs: 120,
            crf: 23,
            preset: "ultrafast".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

impl TranscodeConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn encode_timeout(&self) -> Duration {
        Duration::from_secs(self.encode_timeout_secs)
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl DecisionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelfx").join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"transcode": {"encode_timeout_secs": 10}}"#).unwrap();
        assert_eq!(config.transcode.encode_timeout(), Duration::from_secs(10));
        assert_eq!(config.transcode.init_timeout(), Duration::from_secs(30));
        assert_eq!(config.capture.chunk_interval_ms, 100);
        assert_eq!(config.export.format, "webm");
    }

    #[test]
    fn test_recording_deadline_adds_margin() {
        let capture = CaptureConfig::default();
        assert_eq!(capture.recording_deadline(5.0), Duration::from_secs(7));
    }
}
