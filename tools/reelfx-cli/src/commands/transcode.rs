//! Convert a WebM file to MP4.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;

use reelfx_common::config::AppConfig;
use reelfx_export_engine::{FfmpegLoader, SharedEngine, TranscodeProgress};

pub async fn run(
    config: &AppConfig,
    input: PathBuf,
    output: PathBuf,
    duration: Option<f64>,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(&input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    println!("Transcoding {} -> {}", input.display(), output.display());

    let engine = SharedEngine::new(
        Arc::new(FfmpegLoader::new(config.transcode.clone())),
        config.transcode.init_timeout(),
    );
    let engine = engine.get().await?;

    let progress: TranscodeProgress = Arc::new(|percent: f64| {
        print!("\r  Progress: {percent:.1}%  ");
        std::io::stdout().flush().ok();
    });
    let converted = tokio::time::timeout(
        config.transcode.encode_timeout(),
        engine.transcode(Bytes::from(data), duration.unwrap_or(0.0), progress),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Transcode timed out"))??;

    tokio::fs::write(&output, &converted)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    println!("\nWrote {} ({} bytes)", output.display(), converted.len());
    Ok(())
}
