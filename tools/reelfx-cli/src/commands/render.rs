//! Run the compositor over an animated test pattern.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use reelfx_common::clock::{RateController, Stopwatch};
use reelfx_effect_model::{AspectRatio, VideoFrame};
use reelfx_render_engine::{default_backend, Compositor, PatternSource, TickOutcome};

pub fn run(
    effects: Vec<String>,
    width: u32,
    height: u32,
    aspect: String,
    frames: u32,
    fps: u32,
    dump: Option<PathBuf>,
) -> anyhow::Result<()> {
    let chain = super::parse_chain(&effects)?;
    let aspect: AspectRatio = aspect.parse()?;

    let mut compositor = Compositor::new(default_backend());
    compositor.set_aspect_ratio(aspect);
    let source = PatternSource::new(width, height);
    compositor.attach(&source)?;

    println!("Rendering {frames} frames of {width}x{height} at {fps} fps");
    println!("  Backend: {}", compositor.backend().name());
    println!("  Chain: {} effect(s), aspect {aspect}", chain.len());

    let clock = Stopwatch::start();
    let mut pacer = RateController::new(fps);
    let mut rendered = 0u32;
    let mut skipped = 0u32;
    let mut degraded = 0usize;
    let mut source_time = 0.0;

    while rendered + skipped < frames {
        let now_ns = clock.elapsed().as_nanos() as u64;
        if !pacer.should_tick(now_ns) {
            std::thread::sleep(Duration::from_millis(1));
            continue;
        }
        match compositor.tick(&chain)? {
            TickOutcome::Rendered(report) => {
                rendered += 1;
                degraded = degraded.max(report.degraded);
                source_time = report.source_time;
            }
            TickOutcome::Skipped(reason) => {
                skipped += 1;
                tracing::debug!(?reason, "Tick skipped");
            }
        }
        if rendered > 0 && rendered % fps.max(1) == 0 {
            print!("\r  {rendered}/{frames} frames, {:.1} fps  ", compositor.fps());
            std::io::stdout().flush().ok();
        }
    }
    println!();

    let size = compositor.surface_size().unwrap_or((0, 0));
    println!(
        "Done: {rendered} rendered, {skipped} skipped, surface {}x{}, {:.1} fps, \
         source at {source_time:.2}s",
        size.0,
        size.1,
        compositor.fps()
    );
    if degraded > 0 {
        println!("  {degraded} pass(es) ran as pass-through (no shader available)");
    }

    if let Some(path) = dump {
        let frame = compositor.read_surface()?;
        write_ppm(&path, &frame).with_context(|| format!("writing {}", path.display()))?;
        println!("  Last frame written to {}", path.display());
    }
    Ok(())
}

/// Binary PPM, alpha dropped.
fn write_ppm(path: &Path, frame: &VideoFrame) -> std::io::Result<()> {
    let mut out = format!("P6\n{} {}\n255\n", frame.width, frame.height).into_bytes();
    out.reserve(frame.data.len() / 4 * 3);
    for px in frame.data.chunks_exact(4) {
        out.extend_from_slice(&px[..3]);
    }
    std::fs::write(path, out)
}
