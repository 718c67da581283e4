//! Frame and track types shared by the compositor and the capture pipeline.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

/// An RGBA8 frame, row-major, tightly packed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Transparent black frame.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Wrap existing RGBA8 bytes; `None` when the length does not match.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 4).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    /// Seven vertical color bars with a white square sweeping left to right
    /// once per second, for synthetic sources.
    pub fn test_pattern(width: u32, height: u32, t_secs: f64) -> Self {
        const BARS: [[u8; 4]; 7] = [
            [192, 192, 192, 255],
            [192, 192, 0, 255],
            [0, 192, 192, 255],
            [0, 192, 0, 255],
            [192, 0, 192, 255],
            [192, 0, 0, 255],
            [0, 0, 192, 255],
        ];

        let mut frame = Self::new(width, height);
        let side = (height / 6).max(1);
        let phase = t_secs.rem_euclid(1.0);
        let sq_x = (phase * width.saturating_sub(side) as f64) as u32;
        let sq_y = height.saturating_sub(side) / 2;

        for y in 0..height {
            for x in 0..width {
                let in_square = x >= sq_x && x < sq_x + side && y >= sq_y && y < sq_y + side;
                let color = if in_square {
                    [255, 255, 255, 255]
                } else {
                    BARS[(x as usize * BARS.len()) / width.max(1) as usize]
                };
                frame.set_pixel(x, y, color);
            }
        }
        frame
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Live video track: subscribers always see the most recent frame.
#[derive(Debug, Clone)]
pub struct VideoTrack {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frames: watch::Receiver<Option<Arc<VideoFrame>>>,
}

/// Interleaved f32 PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }
}

/// Live audio track from a playback source.
#[derive(Debug)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunks: broadcast::Receiver<Arc<AudioChunk>>,
}

/// A rendered surface that can be captured as a video stream.
pub trait CaptureSurface: Send + Sync {
    /// Start a capture stream at `fps`; `None` when the surface cannot be captured.
    fn capture_stream(&self, fps: u32) -> Option<VideoTrack>;

    /// Current surface dimensions, if any.
    fn dimensions(&self) -> Option<(u32, u32)>;
}
