//! Decoded-video handles the compositor reads from.

use std::sync::{Arc, RwLock};

use reelfx_common::clock::Stopwatch;
use reelfx_effect_model::VideoFrame;

/// A decoded video owned by the host.
///
/// The compositor holds only a weak reference and never drives decoding.
pub trait FrameSource: Send + Sync {
    /// Frame to present now; `None` before the first decode.
    fn current_frame(&self) -> Option<Arc<VideoFrame>>;

    /// Presentation time of the current frame, in seconds.
    fn timestamp_secs(&self) -> f64;

    /// Native video dimensions.
    fn dimensions(&self) -> (u32, u32);
}

/// A frame source whose frame is replaced by the host.
#[derive(Debug)]
pub struct StillSource {
    frame: RwLock<(Arc<VideoFrame>, f64)>,
}

impl StillSource {
    pub fn new(frame: VideoFrame) -> Arc<Self> {
        Arc::new(Self {
            frame: RwLock::new((Arc::new(frame), 0.0)),
        })
    }

    pub fn set_frame(&self, frame: VideoFrame, timestamp_secs: f64) {
        if let Ok(mut slot) = self.frame.write() {
            *slot = (Arc::new(frame), timestamp_secs);
        }
    }
}

impl FrameSource for StillSource {
    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frame.read().ok().map(|slot| Arc::clone(&slot.0))
    }

    fn timestamp_secs(&self) -> f64 {
        self.frame.read().map(|slot| slot.1).unwrap_or(0.0)
    }

    fn dimensions(&self) -> (u32, u32) {
        self.frame
            .read()
            .map(|slot| slot.0.dimensions())
            .unwrap_or((0, 0))
    }
}

/// Animated test pattern driven by a wall clock.
#[derive(Debug)]
pub struct PatternSource {
    width: u32,
    height: u32,
    clock: Stopwatch,
}

impl PatternSource {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            width,
            height,
            clock: Stopwatch::start(),
        })
    }
}

impl FrameSource for PatternSource {
    fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        Some(Arc::new(VideoFrame::test_pattern(
            self.width,
            self.height,
            self.clock.elapsed_secs(),
        )))
    }

    fn timestamp_secs(&self) -> f64 {
        self.clock.elapsed_secs()
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
