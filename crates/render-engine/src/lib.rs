//! ReelFX Render Engine
//!
//! Real-time compositor that renders an effect chain over a decoded video
//! frame on every host tick.
//!
//! # Pipeline Architecture
//!
//! ```text
//! FrameSource ──▶ upload ──┐
//!                          ├── pass 0 (crop to viewport)
//! EffectChain ─────────────┘        │
//!                             ping-pong targets
//!                                   │
//!                          pass N-1 ─▶ surface ──▶ SurfaceTap ──▶ capture
//! ```
//!
//! Backends: [`SoftwareBackend`] (always available, deterministic) and
//! `WgpuBackend` behind the `wgpu` feature.

pub mod backend;
pub mod compositor;
pub mod diagnostics;
pub mod error;
pub mod ping_pong;
pub mod source;
pub mod tap;

pub use backend::{default_backend, GpuBackend, SoftwareBackend};
pub use compositor::{Compositor, SkipReason, TickOutcome, TickReport};
pub use error::{GpuError, GpuResult};
pub use source::{FrameSource, PatternSource, StillSource};
pub use tap::SurfaceTap;
