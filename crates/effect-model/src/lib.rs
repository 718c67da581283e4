//! ReelFX Effect Model
//!
//! Defines the core data contracts shared by the compositor and the export
//! pipeline:
//! - **Effects:** Static effect descriptors, the built-in registry, and the
//!   user-edited effect chain
//! - **Viewport:** Aspect-ratio crop resolution for the render surface
//! - **Media:** Frames, capturable video/audio tracks, and the surface seam
//! - **Export:** Settings, containers, progress events, and artifacts

pub mod effect;
pub mod export;
pub mod media;
pub mod registry;
pub mod viewport;

pub use effect::*;
pub use export::*;
pub use media::*;
pub use viewport::*;
