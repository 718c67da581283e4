//! ReelFX CLI: effect browsing, render previews, export and transcode.
//!
//! Usage:
//!   reelfx effects              List the built-in effect registry
//!   reelfx resolve W H          Resolve a viewport for an aspect ratio
//!   reelfx render [OPTIONS]     Run the compositor over a test pattern
//!   reelfx export [OPTIONS]     Export a synthetic clip through the pipeline
//!   reelfx transcode IN OUT     Convert a WebM file to MP4
//!   reelfx check                Check encoder availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use reelfx_common::config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "reelfx",
    about = "Real-time video effects and export",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available effects
    Effects {
        /// Only show one category: simple|math|ai
        #[arg(long)]
        category: Option<String>,

        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the output viewport for a source size
    Resolve {
        width: u32,
        height: u32,

        /// Target aspect ratio, `original` or W:H
        #[arg(short, long, default_value = "original")]
        aspect: String,
    },

    /// Render an effect chain over an animated test pattern
    Render {
        /// Effect to apply, e.g. `blur:radius=4`; repeat to chain
        #[arg(short, long = "effect")]
        effects: Vec<String>,

        /// Source width
        #[arg(long, default_value = "640")]
        width: u32,

        /// Source height
        #[arg(long, default_value = "360")]
        height: u32,

        /// Target aspect ratio, `original` or W:H
        #[arg(short, long, default_value = "original")]
        aspect: String,

        /// Number of frames to render
        #[arg(long, default_value = "120")]
        frames: u32,

        /// Tick rate
        #[arg(long, default_value = "60")]
        fps: u32,

        /// Write the last frame as a binary PPM
        #[arg(long)]
        dump: Option<PathBuf>,
    },

    /// Export a synthetic clip rendered through the compositor
    Export {
        /// Clip length in seconds
        #[arg(short, long, default_value = "5.0")]
        duration: f64,

        /// Output container: webm|mp4
        #[arg(long)]
        format: Option<String>,

        /// Quality preset: high|medium|low
        #[arg(long)]
        quality: Option<String>,

        /// Capture frame rate
        #[arg(long)]
        fps: Option<u32>,

        /// Record a test tone as the audio track
        #[arg(long)]
        audio: bool,

        /// Effect to apply, e.g. `vignette:strength=0.8`; repeat to chain
        #[arg(short, long = "effect")]
        effects: Vec<String>,

        /// Target aspect ratio, `original` or W:H
        #[arg(short, long, default_value = "original")]
        aspect: String,

        /// Source width
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Source height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Recorder implementation: gst|memory
        #[arg(long, default_value = "gst")]
        recorder: String,

        /// Output file; defaults to `export.<ext>` in the current directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert a WebM file to MP4 with ffmpeg
    Transcode {
        input: PathBuf,
        output: PathBuf,

        /// Input duration in seconds, used for progress
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Check encoder and GPU availability
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load();
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    reelfx_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Effects { category, json } => commands::effects::run(category, json),
        Commands::Resolve {
            width,
            height,
            aspect,
        } => commands::resolve::run(width, height, aspect),
        Commands::Render {
            effects,
            width,
            height,
            aspect,
            frames,
            fps,
            dump,
        } => commands::render::run(effects, width, height, aspect, frames, fps, dump),
        Commands::Export {
            duration,
            format,
            quality,
            fps,
            audio,
            effects,
            aspect,
            width,
            height,
            recorder,
            output,
        } => {
            commands::export::run(
                &config,
                commands::export::ExportArgs {
                    duration,
                    format,
                    quality,
                    fps,
                    audio,
                    effects,
                    aspect,
                    width,
                    height,
                    recorder,
                    output,
                },
            )
            .await
        }
        Commands::Transcode {
            input,
            output,
            duration,
        } => commands::transcode::run(&config, input, output, duration).await,
        Commands::Check => commands::check::run(&config).await,
    }
}
