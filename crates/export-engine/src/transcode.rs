//! Intermediate → target container conversion.

use std::sync::Arc;
use std::time::Duration;

use reelfx_effect_model::{Artifact, Container};

use crate::engine::{SharedEngine, TranscodeProgress};
use crate::error::{TranscodeError, TranscodeResult};

/// Converts capture output into MP4 through the shared engine.
///
/// Engine loading is bounded by the engine's init timeout, each conversion
/// by the encode timeout. Progress is the engine's raw 0..=100.
#[derive(Clone)]
pub struct Transcoder {
    engine: Arc<SharedEngine>,
    encode_timeout: Duration,
}

impl Transcoder {
    pub fn new(engine: Arc<SharedEngine>, encode_timeout: Duration) -> Self {
        Self {
            engine,
            encode_timeout,
        }
    }

    pub fn engine(&self) -> &Arc<SharedEngine> {
        &self.engine
    }

    pub async fn transcode(
        &self,
        input: &Artifact,
        progress: TranscodeProgress,
    ) -> TranscodeResult<Artifact> {
        if input.container != Container::INTERMEDIATE {
            return Err(TranscodeError::failed(format!(
                "expected a {} input, got {}",
                Container::INTERMEDIATE,
                input.container
            )));
        }

        let engine = self.engine.get().await?;
        tracing::info!(
            engine = engine.name(),
            input_bytes = input.len(),
            duration_secs = input.duration_secs,
            "Transcoding to mp4"
        );

        let started = std::time::Instant::now();
        let converted = tokio::time::timeout(
            self.encode_timeout,
            engine.transcode(input.data.clone(), input.duration_secs, progress),
        )
        .await
        .map_err(|_| TranscodeError::EncodeTimeout(self.encode_timeout))??;

        tracing::info!(
            output_bytes = converted.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Transcode complete"
        );

        Ok(Artifact {
            container: Container::Mp4,
            data: converted,
            tracks: input.tracks,
            duration_secs: input.duration_secs,
        })
    }
}
