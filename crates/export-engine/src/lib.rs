//! ReelFX Export Engine
//!
//! Sequences capture and the optional MP4 transcode into a single export
//! call with unified progress, fallback decisions and cancellation.
//!
//! ```text
//! export(settings)
//!   │
//!   ├── CaptureSession ─────────▶ webm artifact        progress [0, 90] or [0, 85]
//!   │
//!   ├── Transcoder (mp4 only) ──▶ mp4 artifact         progress [85, 95]
//!   │      │
//!   │      └── failure ──▶ DecisionPolicy: accept webm | abort
//!   │
//!   └── hand-off                                       progress 100
//! ```

pub mod engine;
pub mod error;
pub mod ffmpeg;
pub mod job;
pub mod orchestrator;
pub mod policy;
pub mod transcode;

pub use engine::{EncoderEngine, EngineLoader, SharedEngine, TranscodeProgress};
pub use error::{ExportError, TranscodeError, TranscodeResult};
pub use ffmpeg::{FfmpegEngine, FfmpegLoader};
pub use job::{ExportJob, JobId, JobOutcome};
pub use orchestrator::{ExportOrchestrator, ExportOutcome};
pub use policy::{DecisionPolicy, StaticPolicy, TranscodeFallback};
pub use transcode::Transcoder;
