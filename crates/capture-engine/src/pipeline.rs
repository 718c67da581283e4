//! Media recorders and the GStreamer encode pipeline.
//!
//! A recorder consumes a live video track (and optionally an audio track)
//! and emits encoded intermediate-container bytes in chunks on request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use gst::prelude::*;
use gstreamer as gst;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use reelfx_effect_model::{AudioTrack, VideoTrack};

use crate::error::{CaptureError, CaptureResult};

/// Encoder settings for one recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_bps: u32,
    /// Set only when an audio track is recorded.
    pub audio_bitrate_bps: Option<u32>,
}

/// Trait for a chunked media recorder.
#[async_trait]
pub trait MediaRecorder: Send {
    fn name(&self) -> &'static str;

    /// Begin encoding the given tracks.
    async fn start(
        &mut self,
        config: RecorderConfig,
        video: VideoTrack,
        audio: Option<AudioTrack>,
    ) -> CaptureResult<()>;

    /// Encoded bytes produced since the last request. May be empty.
    async fn request_data(&mut self) -> CaptureResult<Vec<Bytes>>;

    /// Finish encoding and return the remaining bytes.
    async fn stop(&mut self) -> CaptureResult<Vec<Bytes>>;

    /// Tear down without flushing. Safe to call in any state.
    async fn abort(&mut self);
}

const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Recorder backed by a GStreamer pipeline:
/// `appsrc ! vp9enc ! webmmux ! appsink`, with an `appsrc ! opusenc` branch
/// when audio is recorded.
#[derive(Default)]
pub struct GstRecorder {
    active: Option<GstActive>,
}

struct GstActive {
    pipeline: gst::Pipeline,
    sink: gst::Element,
    sources: Vec<gst::Element>,
    feeders: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl GstRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the encoder elements this recorder needs are installed.
    pub fn is_available() -> bool {
        if init_gstreamer().is_err() {
            return false;
        }
        ["appsrc", "appsink", "vp9enc", "opusenc", "webmmux", "videoconvert"]
            .iter()
            .all(|name| gst::ElementFactory::find(name).is_some())
    }

    fn pull_available(active: &GstActive, timeout: gst::ClockTime) -> CaptureResult<Vec<Bytes>> {
        let mut chunks = Vec::new();
        loop {
            let sample = active
                .sink
                .emit_by_name::<Option<gst::Sample>>("try-pull-sample", &[&timeout.nseconds()]);
            let Some(sample) = sample else {
                break;
            };
            let Some(buffer) = sample.buffer() else {
                continue;
            };
            let map = buffer
                .map_readable()
                .map_err(|e| CaptureError::recorder(format!("Unreadable encoder buffer: {e}")))?;
            chunks.push(Bytes::copy_from_slice(map.as_slice()));
        }
        Ok(chunks)
    }

    fn teardown(active: GstActive) {
        active.running.store(false, Ordering::SeqCst);
        for feeder in active.feeders {
            feeder.abort();
        }
        if let Err(e) = active.pipeline.set_state(gst::State::Null) {
            tracing::warn!(error = ?e, "Failed to stop recorder pipeline");
        }
    }
}

#[async_trait]
impl MediaRecorder for GstRecorder {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    async fn start(
        &mut self,
        config: RecorderConfig,
        video: VideoTrack,
        audio: Option<AudioTrack>,
    ) -> CaptureResult<()> {
        if self.active.is_some() {
            return Err(CaptureError::recorder("Recorder already started"));
        }
        init_gstreamer()?;

        let launch = build_launch(&config, audio.as_ref().map(|a| (a.sample_rate, a.channels)));
        tracing::debug!(%launch, "Building recorder pipeline");

        let element = gst::parse::launch(&launch)
            .map_err(|e| CaptureError::recorder(format!("Failed to build pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| CaptureError::recorder("Launch string did not produce a pipeline"))?;

        let by_name = |name: &str| {
            pipeline
                .by_name(name)
                .ok_or_else(|| CaptureError::recorder(format!("Pipeline has no '{name}' element")))
        };
        let sink = by_name("sink")?;
        let vsrc = by_name("vsrc")?;
        let asrc = audio.as_ref().map(|_| by_name("asrc")).transpose()?;

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            CaptureError::recorder(format!("Failed to start recorder pipeline: {e:?}"))
        })?;

        let running = Arc::new(AtomicBool::new(true));
        let mut feeders = vec![tokio::spawn(feed_video(
            vsrc.clone(),
            video,
            config,
            Arc::clone(&running),
        ))];
        let mut sources = vec![vsrc];
        if let (Some(asrc), Some(audio)) = (asrc, audio) {
            feeders.push(tokio::spawn(feed_audio(
                asrc.clone(),
                audio,
                Arc::clone(&running),
            )));
            sources.push(asrc);
        }

        tracing::info!(
            width = config.width,
            height = config.height,
            fps = config.fps,
            video_bitrate = config.video_bitrate_bps,
            audio = config.audio_bitrate_bps.is_some(),
            "Recorder pipeline started"
        );

        self.active = Some(GstActive {
            pipeline,
            sink,
            sources,
            feeders,
            running,
        });
        Ok(())
    }

    async fn request_data(&mut self) -> CaptureResult<Vec<Bytes>> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| CaptureError::recorder("Recorder not started"))?;

        if let Some(bus) = active.pipeline.bus() {
            while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
                if let gst::MessageView::Error(e) = msg.view() {
                    return Err(CaptureError::recorder(format!(
                        "Encoder pipeline error: {}",
                        e.error()
                    )));
                }
            }
        }

        Self::pull_available(active, gst::ClockTime::ZERO)
    }

    async fn stop(&mut self) -> CaptureResult<Vec<Bytes>> {
        let active = self
            .active
            .take()
            .ok_or_else(|| CaptureError::recorder("Recorder not started"))?;

        active.running.store(false, Ordering::SeqCst);
        for src in &active.sources {
            let flow = src.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
            eos_accepted(src.name().as_str(), flow);
        }

        // Drain until the muxer has written its tail and the sink reports EOS.
        let drained = tokio::task::spawn_blocking(move || {
            let deadline = std::time::Instant::now() + EOS_DRAIN_TIMEOUT;
            let mut chunks = Vec::new();
            let result = loop {
                match Self::pull_available(&active, gst::ClockTime::from_mseconds(100)) {
                    Ok(more) => chunks.extend(more),
                    Err(e) => break Err(e),
                }
                if active.sink.property::<bool>("eos") {
                    break Ok(());
                }
                if std::time::Instant::now() >= deadline {
                    tracing::warn!("Recorder EOS drain timed out; output may be truncated");
                    break Ok(());
                }
            };
            Self::teardown(active);
            result.map(|()| chunks)
        })
        .await
        .map_err(|e| CaptureError::recorder(format!("Recorder drain task failed: {e}")))??;

        tracing::info!(chunks = drained.len(), "Recorder pipeline drained");
        Ok(drained)
    }

    async fn abort(&mut self) {
        if let Some(active) = self.active.take() {
            Self::teardown(active);
            tracing::debug!("Recorder pipeline aborted");
        }
    }
}

impl Drop for GstRecorder {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            Self::teardown(active);
        }
    }
}

/// Whether an appsrc took end-of-stream; a refusal is logged.
fn eos_accepted(source: &str, flow: gst::FlowReturn) -> bool {
    if flow == gst::FlowReturn::Ok {
        return true;
    }
    tracing::warn!(source, ?flow, "Appsrc refused end-of-stream");
    false
}

fn build_launch(config: &RecorderConfig, audio: Option<(u32, u16)>) -> String {
    let mut launch = format!(
        "appsrc name=vsrc is-live=true format=time \
         caps=video/x-raw,format=RGBA,width={w},height={h},framerate={fps}/1 \
         ! videoconvert ! vp9enc target-bitrate={bitrate} deadline=1 cpu-used=8 \
         ! queue ! webmmux name=mux streamable=true ! appsink name=sink sync=false",
        w = config.width,
        h = config.height,
        fps = config.fps.max(1),
        bitrate = config.video_bitrate_bps,
    );
    if let (Some((rate, channels)), Some(bitrate)) = (audio, config.audio_bitrate_bps) {
        launch.push_str(&format!(
            " appsrc name=asrc is-live=true format=time \
             caps=audio/x-raw,format=F32LE,layout=interleaved,rate={rate},channels={channels} \
             ! audioconvert ! audioresample ! opusenc bitrate={bitrate} ! queue ! mux."
        ));
    }
    launch
}

async fn feed_video(
    src: gst::Element,
    mut video: VideoTrack,
    config: RecorderConfig,
    running: Arc<AtomicBool>,
) {
    let mut clock = FrameClock::new(config.fps);
    let frame_ns = clock.frame_ns;
    let mut ticker = tokio::time::interval(Duration::from_nanos(frame_ns));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = tokio::time::Instant::now();
    let mut size_warned = false;

    while running.load(Ordering::SeqCst) {
        ticker.tick().await;
        let Some(frame) = video.frames.borrow_and_update().clone() else {
            continue;
        };
        if frame.dimensions() != (config.width, config.height) {
            if !size_warned {
                tracing::warn!(
                    frame = ?frame.dimensions(),
                    expected = ?(config.width, config.height),
                    "Dropping frames that do not match the recording size"
                );
                size_warned = true;
            }
            continue;
        }

        let pts = clock.stamp(started.elapsed());
        let mut buffer = gst::Buffer::from_mut_slice(frame.data.clone());
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(gst::ClockTime::from_nseconds(pts));
            buf.set_duration(gst::ClockTime::from_nseconds(frame_ns));
        }
        if src.emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]) != gst::FlowReturn::Ok {
            tracing::debug!(pts_ns = pts, "Video appsrc refused buffer, stopping feeder");
            break;
        }
    }
}

/// Stamps video frames on the frame grid by elapsed recording time. A skipped
/// tick or a missing frame leaves a gap, keeping video aligned with audio.
#[derive(Debug, Clone, Copy)]
struct FrameClock {
    frame_ns: u64,
    last_slot: Option<u64>,
}

impl FrameClock {
    fn new(fps: u32) -> Self {
        Self {
            frame_ns: 1_000_000_000 / u64::from(fps.max(1)),
            last_slot: None,
        }
    }

    /// Presentation time in nanoseconds for a frame pushed `elapsed` after
    /// the feeder started. Strictly increasing.
    fn stamp(&mut self, elapsed: Duration) -> u64 {
        let elapsed_ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let nearest = elapsed_ns.saturating_add(self.frame_ns / 2) / self.frame_ns;
        let slot = match self.last_slot {
            Some(last) if nearest <= last => last + 1,
            _ => nearest,
        };
        self.last_slot = Some(slot);
        slot * self.frame_ns
    }
}

async fn feed_audio(src: gst::Element, mut audio: AudioTrack, running: Arc<AtomicBool>) {
    let rate = u64::from(audio.sample_rate.max(1));
    let mut frames_sent: u64 = 0;

    while running.load(Ordering::SeqCst) {
        let chunk = match audio.chunks.recv().await {
            Ok(chunk) => chunk,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Audio feeder lagged behind source");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let frames = chunk.frames() as u64;
        let bytes: Vec<u8> = chunk.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut buffer = gst::Buffer::from_mut_slice(bytes);
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(gst::ClockTime::from_nseconds(frames_sent * 1_000_000_000 / rate));
            buf.set_duration(gst::ClockTime::from_nseconds(frames * 1_000_000_000 / rate));
        }
        if src.emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer]) != gst::FlowReturn::Ok {
            break;
        }
        frames_sent += frames;
    }
}

fn init_gstreamer() -> CaptureResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(CaptureError::recorder(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(audio: bool) -> RecorderConfig {
        RecorderConfig {
            width: 1280,
            height: 720,
            fps: 24,
            video_bitrate_bps: 2_000_000,
            audio_bitrate_bps: audio.then_some(128_000),
        }
    }

    #[test]
    fn test_launch_video_only() {
        let launch = build_launch(&config(false), None);
        assert!(launch.contains("width=1280,height=720,framerate=24/1"));
        assert!(launch.contains("vp9enc target-bitrate=2000000"));
        assert!(launch.contains("appsink name=sink"));
        assert!(!launch.contains("asrc"));
    }

    #[test]
    fn test_launch_with_audio_branch() {
        let launch = build_launch(&config(true), Some((48_000, 2)));
        assert!(launch.contains("rate=48000,channels=2"));
        assert!(launch.contains("opusenc bitrate=128000 ! queue ! mux."));
    }

    #[test]
    fn test_audio_branch_needs_bitrate() {
        let launch = build_launch(&config(false), Some((48_000, 2)));
        assert!(!launch.contains("opusenc"));
    }

    #[test]
    fn test_eos_refusal_is_reported() {
        assert!(eos_accepted("vsrc", gst::FlowReturn::Ok));
        assert!(!eos_accepted("vsrc", gst::FlowReturn::Flushing));
        assert!(!eos_accepted("asrc", gst::FlowReturn::Eos));
    }

    #[test]
    fn test_frame_clock_leaves_gap_for_skipped_tick() {
        let mut clock = FrameClock::new(25);
        let ms = Duration::from_millis;
        assert_eq!(clock.stamp(ms(0)), 0);
        assert_eq!(clock.stamp(ms(40)), 40_000_000);
        // Nothing pushed at 80 ms.
        assert_eq!(clock.stamp(ms(120)), 120_000_000);
        assert_eq!(clock.stamp(ms(161)), 160_000_000);
    }

    #[test]
    fn test_frame_clock_is_strictly_increasing() {
        let mut clock = FrameClock::new(25);
        let first = clock.stamp(Duration::from_millis(40));
        let late_tick = clock.stamp(Duration::from_millis(41));
        let again = clock.stamp(Duration::from_millis(42));
        assert_eq!(first, 40_000_000);
        assert_eq!(late_tick, 80_000_000);
        assert_eq!(again, 120_000_000);
    }

    #[tokio::test]
    async fn test_request_before_start_fails() {
        let mut recorder = GstRecorder::new();
        assert!(recorder.request_data().await.is_err());
        recorder.abort().await;
    }
}
