//! Check encoder and GPU availability.

use std::sync::Arc;

use reelfx_capture_engine::GstRecorder;
use reelfx_common::config::{config_file_path, AppConfig};
use reelfx_export_engine::{FfmpegLoader, SharedEngine};
use reelfx_render_engine::default_backend;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("ReelFX System Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config: {}", path.display());
    } else {
        println!("[--] Config: defaults ({} not found)", path.display());
    }

    let backend = default_backend();
    println!("[OK] Render backend: {}", backend.name());

    let recorder_ok = GstRecorder::is_available();
    if recorder_ok {
        println!("[OK] GStreamer recorder: vp9enc, opusenc, webmmux available");
    } else {
        println!("[WARN] GStreamer recorder unavailable");
        println!("       Install gstreamer1.0-plugins-good and -base, then retry");
    }

    let loader = FfmpegLoader::new(config.transcode.clone());
    let transcode_ok = match loader.locate() {
        Ok(binary) => {
            let engine = SharedEngine::new(Arc::new(loader), config.transcode.init_timeout());
            match engine.get().await {
                Ok(_) => {
                    println!("[OK] ffmpeg: {}", binary.display());
                    true
                }
                Err(e) => {
                    println!("[WARN] ffmpeg at {} failed to start: {e}", binary.display());
                    false
                }
            }
        }
        Err(e) => {
            println!("[WARN] {e}");
            println!("       MP4 exports will fall back to WebM");
            false
        }
    };

    println!();
    match (recorder_ok, transcode_ok) {
        (true, true) => println!("All exporters are available. ReelFX is ready."),
        (true, false) => println!("WebM export is available; MP4 needs ffmpeg."),
        _ => println!("Export is unavailable. See above for fixes."),
    }
    Ok(())
}
