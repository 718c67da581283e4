//! ffmpeg-backed encoder engine.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use reelfx_common::config::TranscodeConfig;

use crate::engine::{EncoderEngine, EngineLoader, TranscodeProgress};
use crate::error::{TranscodeError, TranscodeResult};

const INPUT_NAME: &str = "input.webm";
const OUTPUT_NAME: &str = "output.mp4";

/// Locates and probes the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct FfmpegLoader {
    config: TranscodeConfig,
}

impl FfmpegLoader {
    pub fn new(config: TranscodeConfig) -> Self {
        Self { config }
    }

    /// The configured binary, or `ffmpeg` from `PATH`.
    pub fn locate(&self) -> TranscodeResult<PathBuf> {
        match &self.config.ffmpeg_path {
            Some(path) if path.is_file() => Ok(path.clone()),
            Some(path) => Err(TranscodeError::EngineUnavailable(format!(
                "configured ffmpeg not found at {}",
                path.display()
            ))),
            None => which::which("ffmpeg").map_err(|e| {
                TranscodeError::EngineUnavailable(format!("ffmpeg not found in PATH: {e}"))
            }),
        }
    }
}

#[async_trait]
impl EngineLoader for FfmpegLoader {
    async fn load(&self) -> TranscodeResult<Arc<dyn EncoderEngine>> {
        let binary = self.locate()?;
        let output = Command::new(&binary)
            .args(["-hide_banner", "-version"])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                let msg = format!("failed to run {}: {e}", binary.display());
                TranscodeError::EngineUnavailable(msg)
            })?;
        if !output.status.success() {
            return Err(TranscodeError::EngineUnavailable(format!(
                "{} -version exited with {}",
                binary.display(),
                output.status
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("ffmpeg")
            .trim()
            .to_string();
        tracing::info!(binary = %binary.display(), %version, "Probed ffmpeg");

        Ok(Arc::new(FfmpegEngine {
            binary,
            version,
            config: self.config.clone(),
        }))
    }
}

/// Runs one ffmpeg process per conversion in a private scratch directory.
#[derive(Debug)]
pub struct FfmpegEngine {
    binary: PathBuf,
    version: String,
    config: TranscodeConfig,
}

impl FfmpegEngine {
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Full argument list for converting `input` into `output`.
    pub fn command_args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.config.preset.clone(),
            "-crf".to_string(),
            self.config.crf.to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            self.config.audio_bitrate.clone(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }

    async fn run(
        &self,
        workdir: &Path,
        input: &Bytes,
        duration_secs: f64,
        progress: &TranscodeProgress,
    ) -> TranscodeResult<Bytes> {
        let input_path = workdir.join(INPUT_NAME);
        let output_path = workdir.join(OUTPUT_NAME);
        tokio::fs::write(&input_path, input).await?;

        let args = self.command_args(&input_path, &output_path);
        tracing::debug!(?args, "Running ffmpeg");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::failed(format!("failed to start ffmpeg: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscodeError::failed("failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscodeError::failed("failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            let mut reader = BufReader::new(stderr);
            match reader.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut state = ProgressState::default();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| TranscodeError::failed(format!("failed reading ffmpeg progress: {e}")))?
        {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            state.update(key, value);
            if key == "progress" {
                progress(state.percent(duration_secs));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| TranscodeError::failed(format!("failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if !status.success() {
            return Err(TranscodeError::failed(format!(
                "ffmpeg exited with {status}: {}",
                stderr_output.trim()
            )));
        }

        let data = tokio::fs::read(&output_path).await?;
        if data.is_empty() {
            return Err(TranscodeError::failed("ffmpeg produced an empty file"));
        }
        progress(100.0);
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl EncoderEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        input: Bytes,
        duration_secs: f64,
        progress: TranscodeProgress,
    ) -> TranscodeResult<Bytes> {
        let workdir = tempfile::Builder::new()
            .prefix("reelfx-transcode-")
            .tempdir()?;

        let result = self
            .run(workdir.path(), &input, duration_secs, &progress)
            .await;

        let path = workdir.path().to_path_buf();
        if let Err(e) = workdir.close() {
            tracing::warn!(
                dir = %path.display(),
                error = %e,
                "Failed to clean up transcode directory"
            );
        }
        result
    }
}

/// Accumulated `-progress` key/value state.
#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    /// Engine-native fraction scaled to 0..=100.
    fn percent(&self, duration_secs: f64) -> f64 {
        if self.complete {
            return 100.0;
        }
        if duration_secs <= 0.0 || !duration_secs.is_finite() {
            return 0.0;
        }
        (self.out_time_secs / duration_secs).clamp(0.0, 1.0) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FfmpegEngine {
        FfmpegEngine {
            binary: PathBuf::from("ffmpeg"),
            version: "ffmpeg version test".into(),
            config: TranscodeConfig::default(),
        }
    }

    #[test]
    fn test_command_args_fixed_profile() {
        let args = engine().command_args(Path::new("/tmp/in.webm"), Path::new("/tmp/out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-progress pipe:1 -i /tmp/in.webm"));
        assert!(joined.contains(
            "-c:v libx264 -preset ultrafast -crf 23 -c:a aac -b:a 128k -movflags +faststart -y"
        ));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_progress_state_parsing() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "2500000");
        assert!((state.percent(5.0) - 50.0).abs() < 1e-9);
        state.update("out_time_ms", "10000000");
        assert_eq!(state.percent(5.0), 100.0);
        state.update("out_time_us", "garbage");
        assert_eq!(state.out_time_secs, 10.0);
    }

    #[test]
    fn test_progress_end_marks_complete() {
        let mut state = ProgressState::default();
        state.update("progress", "continue");
        assert_eq!(state.percent(0.0), 0.0);
        state.update("progress", "end");
        assert_eq!(state.percent(0.0), 100.0);
    }

    #[test]
    fn test_missing_configured_binary() {
        let loader = FfmpegLoader::new(TranscodeConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/reelfx/ffmpeg")),
            ..TranscodeConfig::default()
        });
        assert!(matches!(
            loader.locate(),
            Err(TranscodeError::EngineUnavailable(_))
        ));
    }
}
