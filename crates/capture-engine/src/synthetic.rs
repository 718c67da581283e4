//! In-process sources, surfaces and recorders.
//!
//! Used by tests and by the CLI's synthetic export. Time comes from
//! `tokio::time`, so paused-clock tests run instantly.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use reelfx_effect_model::{AudioChunk, AudioTrack, CaptureSurface, VideoFrame, VideoTrack};

use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::{MediaRecorder, RecorderConfig};
use crate::source::PlaybackSource;

const AUDIO_CHUNK: Duration = Duration::from_millis(20);
const TONE_HZ: f32 = 440.0;

#[derive(Debug, Clone, Copy)]
struct ToneSpec {
    sample_rate: u32,
    channels: u16,
}

#[derive(Debug, Default)]
struct Playhead {
    base_secs: f64,
    playing_since: Option<Instant>,
}

/// A clock-driven playback source of fixed duration, with an optional
/// sine-tone audio track.
pub struct SyntheticSource {
    duration_secs: f64,
    tone: Option<ToneSpec>,
    audio_tx: Option<broadcast::Sender<Arc<AudioChunk>>>,
    playhead: Mutex<Playhead>,
    generator: Mutex<Option<JoinHandle<()>>>,
    stalled: bool,
}

impl SyntheticSource {
    /// A silent source.
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            tone: None,
            audio_tx: None,
            playhead: Mutex::new(Playhead::default()),
            generator: Mutex::new(None),
            stalled: false,
        }
    }

    /// Add a 440 Hz tone track.
    pub fn with_tone(mut self, sample_rate: u32, channels: u16) -> Self {
        let (tx, _) = broadcast::channel(64);
        self.tone = Some(ToneSpec {
            sample_rate,
            channels,
        });
        self.audio_tx = Some(tx);
        self
    }

    /// A source whose playhead never advances, as if playback stalled.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    fn stop_generator(&self) {
        if let Ok(mut slot) = self.generator.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl PlaybackSource for SyntheticSource {
    fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    fn position_secs(&self) -> f64 {
        let Ok(head) = self.playhead.lock() else {
            return 0.0;
        };
        let running = match head.playing_since {
            Some(since) if !self.stalled => since.elapsed().as_secs_f64(),
            _ => 0.0,
        };
        (head.base_secs + running).min(self.duration_secs)
    }

    fn is_ended(&self) -> bool {
        !self.stalled && self.position_secs() >= self.duration_secs
    }

    async fn seek(&self, position_secs: f64) -> CaptureResult<()> {
        if !position_secs.is_finite() || position_secs < 0.0 {
            return Err(CaptureError::playback(format!(
                "cannot seek to {position_secs}"
            )));
        }
        let mut head = self
            .playhead
            .lock()
            .map_err(|_| CaptureError::playback("playhead poisoned"))?;
        head.base_secs = position_secs.min(self.duration_secs);
        if head.playing_since.is_some() {
            head.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    async fn play(&self) -> CaptureResult<()> {
        {
            let mut head = self
                .playhead
                .lock()
                .map_err(|_| CaptureError::playback("playhead poisoned"))?;
            if head.playing_since.is_none() {
                head.playing_since = Some(Instant::now());
            }
        }

        if let (Some(tone), Some(tx)) = (self.tone, &self.audio_tx) {
            self.stop_generator();
            let task = tokio::spawn(generate_tone(tone, tx.clone(), self.duration_secs));
            if let Ok(mut slot) = self.generator.lock() {
                *slot = Some(task);
            }
        }
        Ok(())
    }

    async fn pause(&self) {
        self.stop_generator();
        let position = self.position_secs();
        if let Ok(mut head) = self.playhead.lock() {
            head.base_secs = position;
            head.playing_since = None;
        }
    }

    fn audio_track(&self) -> Option<AudioTrack> {
        let tone = self.tone?;
        let tx = self.audio_tx.as_ref()?;
        Some(AudioTrack {
            sample_rate: tone.sample_rate,
            channels: tone.channels,
            chunks: tx.subscribe(),
        })
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

async fn generate_tone(tone: ToneSpec, tx: broadcast::Sender<Arc<AudioChunk>>, duration_secs: f64) {
    let frames_per_chunk = (tone.sample_rate as f64 * AUDIO_CHUNK.as_secs_f64()) as usize;
    let total_frames = (tone.sample_rate as f64 * duration_secs) as usize;
    let step = TONE_HZ * std::f32::consts::TAU / tone.sample_rate.max(1) as f32;
    let mut ticker = tokio::time::interval(AUDIO_CHUNK);
    let mut frame = 0usize;

    while frame < total_frames {
        ticker.tick().await;
        let n = frames_per_chunk.min(total_frames - frame);
        let mut samples = Vec::with_capacity(n * tone.channels as usize);
        for i in 0..n {
            let s = ((frame + i) as f32 * step).sin() * 0.25;
            samples.extend(std::iter::repeat(s).take(tone.channels as usize));
        }
        frame += n;
        // No receivers is fine: nobody is recording audio.
        let _ = tx.send(Arc::new(AudioChunk {
            sample_rate: tone.sample_rate,
            channels: tone.channels,
            samples,
        }));
    }
}

/// A capture surface presenting a fixed frame, replaceable by the host.
pub struct FrameSurface {
    frames: Option<watch::Sender<Option<Arc<VideoFrame>>>>,
    size: (u32, u32),
}

impl FrameSurface {
    pub fn new(frame: VideoFrame) -> Self {
        let size = frame.dimensions();
        let (tx, _) = watch::channel(Some(Arc::new(frame)));
        Self {
            frames: Some(tx),
            size,
        }
    }

    /// A surface that cannot be captured.
    pub fn unavailable() -> Self {
        Self {
            frames: None,
            size: (0, 0),
        }
    }

    pub fn present(&self, frame: VideoFrame) {
        if let Some(tx) = &self.frames {
            tx.send_replace(Some(Arc::new(frame)));
        }
    }
}

impl CaptureSurface for FrameSurface {
    fn capture_stream(&self, fps: u32) -> Option<VideoTrack> {
        let tx = self.frames.as_ref()?;
        Some(VideoTrack {
            width: self.size.0,
            height: self.size.1,
            fps,
            frames: tx.subscribe(),
        })
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames.as_ref().map(|_| self.size)
    }
}

/// Magic for the in-memory recording format.
pub const MEMORY_MAGIC: &[u8; 4] = b"RFXM";

/// Deterministic recorder that writes a compact description of what it saw
/// instead of encoded media.
///
/// Layout: a header chunk (`RFXM`, width, height, fps, video bitrate,
/// audio track count), one record per `request_data` (sequence, checksum of
/// the latest frame, audio frames drained) and a trailer on `stop`.
#[derive(Default)]
pub struct MemoryRecorder {
    active: Option<MemoryActive>,
    fail_after: Option<u64>,
}

struct MemoryActive {
    config: RecorderConfig,
    video: VideoTrack,
    audio: Option<AudioTrack>,
    header_sent: bool,
    sequence: u64,
    frames_seen: u64,
    audio_frames: u64,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `request_data` after the first `flushes` succeed.
    pub fn failing_after(flushes: u64) -> Self {
        Self {
            active: None,
            fail_after: Some(flushes),
        }
    }

    fn header(active: &MemoryActive) -> Bytes {
        let mut buf = BytesMut::with_capacity(21);
        buf.put_slice(MEMORY_MAGIC);
        buf.put_u32_le(active.config.width);
        buf.put_u32_le(active.config.height);
        buf.put_u32_le(active.config.fps);
        buf.put_u32_le(active.config.video_bitrate_bps);
        buf.put_u8(u8::from(active.audio.is_some()));
        buf.freeze()
    }

    fn drain(active: &mut MemoryActive) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(2);
        if !active.header_sent {
            out.push(Self::header(active));
            active.header_sent = true;
        }

        let checksum = match active.video.frames.has_changed() {
            Ok(true) => {
                active.frames_seen += 1;
                active
                    .video
                    .frames
                    .borrow_and_update()
                    .as_deref()
                    .map_or(0, |frame| fnv1a(&frame.data))
            }
            _ => 0,
        };

        if let Some(audio) = &mut active.audio {
            loop {
                match audio.chunks.try_recv() {
                    Ok(chunk) => active.audio_frames += chunk.frames() as u64,
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
        }

        let mut record = BytesMut::with_capacity(24);
        record.put_u64_le(active.sequence);
        record.put_u64_le(checksum);
        record.put_u64_le(active.audio_frames);
        out.push(record.freeze());
        active.sequence += 1;
        out
    }
}

#[async_trait]
impl MediaRecorder for MemoryRecorder {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn start(
        &mut self,
        config: RecorderConfig,
        mut video: VideoTrack,
        audio: Option<AudioTrack>,
    ) -> CaptureResult<()> {
        if self.active.is_some() {
            return Err(CaptureError::recorder("Recorder already started"));
        }
        // The frame present at start counts as the first one seen.
        video.frames.mark_changed();
        self.active = Some(MemoryActive {
            config,
            video,
            audio,
            header_sent: false,
            sequence: 0,
            frames_seen: 0,
            audio_frames: 0,
        });
        Ok(())
    }

    async fn request_data(&mut self) -> CaptureResult<Vec<Bytes>> {
        let fail_after = self.fail_after;
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| CaptureError::recorder("Recorder not started"))?;
        if fail_after.is_some_and(|n| active.sequence >= n) {
            return Err(CaptureError::recorder("simulated encoder failure"));
        }
        Ok(Self::drain(active))
    }

    async fn stop(&mut self) -> CaptureResult<Vec<Bytes>> {
        let mut active = self
            .active
            .take()
            .ok_or_else(|| CaptureError::recorder("Recorder not started"))?;
        let mut out = Self::drain(&mut active);

        let mut trailer = BytesMut::with_capacity(20);
        trailer.put_slice(b"END!");
        trailer.put_u64_le(active.frames_seen);
        trailer.put_u64_le(active.audio_frames);
        out.push(trailer.freeze());

        tracing::debug!(
            records = active.sequence,
            frames = active.frames_seen,
            audio_frames = active.audio_frames,
            "Memory recorder stopped"
        );
        Ok(out)
    }

    async fn abort(&mut self) {
        self.active = None;
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder_config(audio: bool) -> RecorderConfig {
        RecorderConfig {
            width: 8,
            height: 4,
            fps: 24,
            video_bitrate_bps: 2_000_000,
            audio_bitrate_bps: audio.then_some(128_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_source_plays_to_end() {
        let source = SyntheticSource::new(1.0);
        assert_eq!(source.position_secs(), 0.0);
        source.play().await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!((source.position_secs() - 0.4).abs() < 1e-6);
        assert!(!source.is_ended());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(source.is_ended());
        assert_eq!(source.position_secs(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_seek() {
        let source = SyntheticSource::new(10.0);
        source.play().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        source.pause().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!((source.position_secs() - 2.0).abs() < 1e-6);
        source.seek(0.0).await.unwrap();
        assert_eq!(source.position_secs(), 0.0);
        assert!(source.seek(-1.0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_source_never_ends() {
        let source = SyntheticSource::new(1.0).stalled();
        source.play().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!source.is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tone_track_emits_chunks() {
        let source = SyntheticSource::new(0.1).with_tone(48_000, 2);
        let mut track = source.audio_track().unwrap();
        source.play().await.unwrap();
        let chunk = track.chunks.recv().await.unwrap();
        assert_eq!(chunk.channels, 2);
        assert_eq!(chunk.frames(), 960);
    }

    #[test]
    fn test_silent_source_has_no_audio() {
        assert!(SyntheticSource::new(1.0).audio_track().is_none());
    }

    #[test]
    fn test_unavailable_surface() {
        let surface = FrameSurface::unavailable();
        assert!(surface.capture_stream(30).is_none());
        assert!(surface.dimensions().is_none());
    }

    #[tokio::test]
    async fn test_memory_recorder_layout() {
        let surface = FrameSurface::new(VideoFrame::solid(8, 4, [1, 2, 3, 255]));
        let video = surface.capture_stream(24).unwrap();
        let mut recorder = MemoryRecorder::new();
        recorder.start(recorder_config(false), video, None).await.unwrap();

        let first = recorder.request_data().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(&first[0][..4], MEMORY_MAGIC);
        assert_eq!(first[0][20], 0);
        assert_ne!(&first[1][8..16], &[0u8; 8]);

        let second = recorder.request_data().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(&second[0][8..16], &[0u8; 8]);

        let tail = recorder.stop().await.unwrap();
        assert_eq!(&tail.last().unwrap()[..4], b"END!");
        assert!(recorder.request_data().await.is_err());
    }

    #[tokio::test]
    async fn test_memory_recorder_counts_audio_track() {
        let surface = FrameSurface::new(VideoFrame::new(8, 4));
        let source = SyntheticSource::new(1.0).with_tone(48_000, 1);
        let mut recorder = MemoryRecorder::new();
        recorder
            .start(
                recorder_config(true),
                surface.capture_stream(24).unwrap(),
                source.audio_track(),
            )
            .await
            .unwrap();
        let first = recorder.request_data().await.unwrap();
        assert_eq!(first[0][20], 1);
    }

    #[tokio::test]
    async fn test_failing_recorder() {
        let surface = FrameSurface::new(VideoFrame::new(8, 4));
        let mut recorder = MemoryRecorder::failing_after(1);
        recorder
            .start(recorder_config(false), surface.capture_stream(24).unwrap(), None)
            .await
            .unwrap();
        assert!(recorder.request_data().await.is_ok());
        assert!(recorder.request_data().await.is_err());
    }
}
