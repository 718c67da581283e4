//! Publishes presented frames to capture consumers.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use reelfx_effect_model::{CaptureSurface, VideoFrame, VideoTrack};

/// Shared handle onto the compositor's presented surface.
///
/// The compositor only reads the surface back while at least one capture
/// stream is subscribed.
#[derive(Debug)]
pub struct SurfaceTap {
    frames: watch::Sender<Option<Arc<VideoFrame>>>,
    /// `width << 32 | height`; zero while detached.
    dims: AtomicU64,
    published: AtomicU64,
    capture_fps: AtomicU32,
}

impl SurfaceTap {
    pub fn new() -> Arc<Self> {
        let (frames, _) = watch::channel(None);
        Arc::new(Self {
            frames,
            dims: AtomicU64::new(0),
            published: AtomicU64::new(0),
            capture_fps: AtomicU32::new(0),
        })
    }

    pub fn has_subscribers(&self) -> bool {
        self.frames.receiver_count() > 0
    }

    pub(crate) fn set_dimensions(&self, dims: Option<(u32, u32)>) {
        let packed = dims.map_or(0, |(w, h)| (u64::from(w) << 32) | u64::from(h));
        self.dims.store(packed, Ordering::Release);
        if dims.is_none() {
            self.frames.send_replace(None);
        }
    }

    pub(crate) fn publish(&self, frame: VideoFrame) {
        self.frames.send_replace(Some(Arc::new(frame)));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames published since creation.
    pub fn published_frames(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Frame rate requested by the most recent capture stream.
    pub fn requested_fps(&self) -> Option<u32> {
        match self.capture_fps.load(Ordering::Relaxed) {
            0 => None,
            fps => Some(fps),
        }
    }
}

impl CaptureSurface for SurfaceTap {
    fn capture_stream(&self, fps: u32) -> Option<VideoTrack> {
        let (width, height) = self.dimensions()?;
        self.capture_fps.store(fps, Ordering::Relaxed);
        Some(VideoTrack {
            width,
            height,
            fps,
            frames: self.frames.subscribe(),
        })
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        match self.dims.load(Ordering::Acquire) {
            0 => None,
            packed => Some(((packed >> 32) as u32, packed as u32)),
        }
    }
}
