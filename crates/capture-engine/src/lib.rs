//! ReelFX Capture Engine
//!
//! Records the compositor's presented surface, plus optional source audio,
//! into the intermediate container while the source plays once from start
//! to end.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  CaptureSession                  │
//! │  ┌────────────────┐        ┌──────────────────┐  │
//! │  │ CaptureSurface │        │  PlaybackSource  │  │
//! │  │  (video track) │        │ (clock + audio)  │  │
//! │  └───────┬────────┘        └────────┬─────────┘  │
//! │          └───────────┬──────────────┘            │
//! │                      ▼                           │
//! │             ┌─────────────────┐                  │
//! │             │  MediaRecorder  │ 100 ms chunks    │
//! │             └────────┬────────┘                  │
//! │                      ▼                           │
//! │              Artifact (webm)                     │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! Session progress is driven by an explicit state machine ([`state`]).

pub mod error;
pub mod pipeline;
pub mod policy;
pub mod session;
pub mod source;
pub mod state;
pub mod synthetic;

pub use error::{CaptureError, CaptureResult};
pub use pipeline::{GstRecorder, MediaRecorder, RecorderConfig};
pub use policy::{AudioDecision, AudioFallback, FixedAudioDecision};
pub use session::{CaptureOptions, CaptureOutcome, CaptureSession};
pub use source::PlaybackSource;
pub use state::{CaptureEvent, CaptureState};
pub use synthetic::{FrameSurface, MemoryRecorder, SyntheticSource};
