//! Export a synthetic clip rendered through the compositor.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio_util::sync::CancellationToken;

use reelfx_capture_engine::{
    GstRecorder, MediaRecorder, MemoryRecorder, PlaybackSource, SyntheticSource,
};
use reelfx_common::clock::{RateController, Stopwatch};
use reelfx_common::config::AppConfig;
use reelfx_effect_model::{
    AspectRatio, Container, EffectChain, ExportProgress, ExportSettings, ProgressCallback,
    Quality,
};
use reelfx_export_engine::{ExportOrchestrator, ExportOutcome, SharedEngine};
use reelfx_render_engine::{default_backend, Compositor, GpuBackend, PatternSource};

pub struct ExportArgs {
    pub duration: f64,
    pub format: Option<String>,
    pub quality: Option<String>,
    pub fps: Option<u32>,
    pub audio: bool,
    pub effects: Vec<String>,
    pub aspect: String,
    pub width: u32,
    pub height: u32,
    pub recorder: String,
    pub output: Option<PathBuf>,
}

pub async fn run(config: &AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    let settings = settings_from(config, &args)?;
    settings.validate()?;
    let chain = super::parse_chain(&args.effects)?;
    let aspect: AspectRatio = args.aspect.parse()?;

    let use_memory = match args.recorder.as_str() {
        "gst" => {
            if !GstRecorder::is_available() {
                return Err(anyhow!(
                    "GStreamer encoders are unavailable. \
                     Run `reelfx check`, or use --recorder memory"
                ));
            }
            false
        }
        "memory" => true,
        other => return Err(anyhow!("Unknown recorder: {other}. Use: gst, memory")),
    };

    let mut compositor = Compositor::new(default_backend());
    compositor.set_aspect_ratio(aspect);
    let pattern = PatternSource::new(args.width, args.height);
    compositor.attach(&pattern)?;
    let surface = compositor.tap();
    let renderer = RenderLoop::spawn(compositor, pattern, chain, settings.fps);

    let source: Arc<dyn PlaybackSource> = if settings.include_audio {
        Arc::new(SyntheticSource::new(args.duration).with_tone(48_000, 2))
    } else {
        Arc::new(SyntheticSource::new(args.duration))
    };

    let mut orchestrator =
        ExportOrchestrator::new(surface, SharedEngine::process_wide(&config.transcode))
            .with_config(config);
    if use_memory {
        orchestrator = orchestrator
            .with_recorder(|| Box::new(MemoryRecorder::new()) as Box<dyn MediaRecorder>);
    }

    println!(
        "Exporting {:.1}s clip: {} / {:?} / {} fps / audio {}",
        args.duration,
        settings.format,
        settings.quality,
        settings.fps,
        if settings.include_audio { "on" } else { "off" }
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let progress: ProgressCallback = Arc::new(|p: ExportProgress| {
        print!("\r  [{:>5.1}%] {:<12} {:<32}", p.percent, p.stage, p.message);
        std::io::stdout().flush().ok();
    });

    let (outcome, job) = orchestrator
        .export_job(source, settings, progress, cancel)
        .await;
    println!();
    renderer.stop();

    if let Some(job) = &job {
        tracing::debug!(job = %serde_json::to_string(job)?, "Export job record");
    }

    match outcome {
        ExportOutcome::Complete(artifact) => {
            let output = args
                .output
                .unwrap_or_else(|| PathBuf::from(artifact.file_name("export")));
            let output = if artifact.container != settings.format {
                println!("  Transcode unavailable, delivering {}", artifact.container);
                output.with_extension(artifact.container.extension())
            } else {
                output
            };
            tokio::fs::write(&output, &artifact.data)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            println!(
                "Export complete: {} ({} bytes, {})",
                output.display(),
                artifact.len(),
                artifact.mime_type()
            );
            Ok(())
        }
        ExportOutcome::Cancelled => {
            println!("Export cancelled");
            Ok(())
        }
        ExportOutcome::Failed(e) => Err(anyhow!("Export failed: {e}")),
    }
}

fn settings_from(config: &AppConfig, args: &ExportArgs) -> anyhow::Result<ExportSettings> {
    let mut settings = ExportSettings::try_from(&config.export)?;
    if let Some(format) = &args.format {
        settings.format = format.parse::<Container>()?;
    }
    if let Some(quality) = &args.quality {
        settings.quality = quality.parse::<Quality>()?;
    }
    if let Some(fps) = args.fps {
        settings.fps = fps;
    }
    settings.include_audio = args.audio;
    Ok(settings)
}

/// Ticks the compositor on its own thread so the surface keeps presenting
/// while the export awaits.
struct RenderLoop {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl RenderLoop {
    fn spawn<B>(
        mut compositor: Compositor<B>,
        source: Arc<PatternSource>,
        chain: EffectChain,
        fps: u32,
    ) -> Self
    where
        B: GpuBackend + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            // Keeps the weakly-held source alive for the loop's lifetime.
            let _source = source;
            let clock = Stopwatch::start();
            let mut pacer = RateController::new(fps);
            while !flag.load(Ordering::Relaxed) {
                if !pacer.should_tick(clock.elapsed().as_nanos() as u64) {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
                if let Err(e) = compositor.tick(&chain) {
                    tracing::error!(error = %e, "Render tick failed");
                    break;
                }
            }
            tracing::debug!(fps = compositor.fps(), "Render loop stopped");
        });
        Self { stop, handle }
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.handle.join().is_err() {
            tracing::warn!("Render loop panicked");
        }
    }
}
