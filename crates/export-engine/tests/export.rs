//! End-to-end export tests: synthetic playback, in-memory recorder and
//! scripted encoder engines, all on a paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use reelfx_capture_engine::{
    AudioFallback, FrameSurface, MediaRecorder, MemoryRecorder, PlaybackSource, SyntheticSource,
};
use reelfx_common::config::AppConfig;
use reelfx_effect_model::{
    ignore_progress, Container, ExportProgress, ExportSettings, ExportStage, ProgressCallback,
    Quality, VideoFrame,
};
use reelfx_export_engine::{
    DecisionPolicy, EncoderEngine, EngineLoader, ExportError, ExportOrchestrator, ExportOutcome,
    JobOutcome, SharedEngine, StaticPolicy, TranscodeError, TranscodeFallback, TranscodeProgress,
    TranscodeResult,
};

/// Engine behaviour for one test.
#[derive(Clone, Copy)]
enum Script {
    /// Reports a few progress steps and returns a fake MP4.
    Succeed,
    Fail,
    /// Never finishes on its own.
    Hang,
}

struct ScriptedEngine(Script);

#[async_trait]
impl EncoderEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcode(
        &self,
        input: Bytes,
        _duration_secs: f64,
        progress: TranscodeProgress,
    ) -> TranscodeResult<Bytes> {
        match self.0 {
            Script::Succeed => {
                for step in [25.0, 50.0, 75.0, 100.0] {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    progress(step);
                }
                let mut out = b"ftypmp42".to_vec();
                out.extend_from_slice(&input);
                Ok(Bytes::from(out))
            }
            Script::Fail => {
                progress(10.0);
                Err(TranscodeError::failed("encoder exited with status 1"))
            }
            Script::Hang => {
                progress(5.0);
                std::future::pending().await
            }
        }
    }
}

struct ScriptedLoader {
    script: Script,
    available: bool,
}

#[async_trait]
impl EngineLoader for ScriptedLoader {
    async fn load(&self) -> TranscodeResult<Arc<dyn EncoderEngine>> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if !self.available {
            return Err(TranscodeError::EngineUnavailable("no encoder installed".into()));
        }
        Ok(Arc::new(ScriptedEngine(self.script)))
    }
}

/// Counts transcode decisions and answers with a fixed fallback.
struct CountingPolicy {
    transcode: TranscodeFallback,
    asked: AtomicUsize,
}

#[async_trait]
impl DecisionPolicy for CountingPolicy {
    async fn on_audio_unavailable(&self) -> AudioFallback {
        AudioFallback::ContinueSilent
    }

    async fn on_transcode_failed(&self, _error: &TranscodeError) -> TranscodeFallback {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.transcode
    }
}

fn engine(script: Script, available: bool) -> Arc<SharedEngine> {
    SharedEngine::new(
        Arc::new(ScriptedLoader { script, available }),
        Duration::from_secs(30),
    )
}

fn orchestrator(script: Script) -> ExportOrchestrator {
    orchestrator_with(engine(script, true))
}

fn orchestrator_with(engine: Arc<SharedEngine>) -> ExportOrchestrator {
    reelfx_common::logging::init_test_logging();
    let surface = Arc::new(FrameSurface::new(VideoFrame::test_pattern(32, 18, 0.0)));
    ExportOrchestrator::new(surface, engine)
        .with_recorder(|| Box::new(MemoryRecorder::new()) as Box<dyn MediaRecorder>)
}

fn settings(format: Container, include_audio: bool) -> ExportSettings {
    ExportSettings {
        format,
        quality: Quality::Low,
        fps: 24,
        include_audio,
    }
}

fn source(duration_secs: f64) -> Arc<dyn PlaybackSource> {
    Arc::new(SyntheticSource::new(duration_secs))
}

fn collect() -> (ProgressCallback, Arc<Mutex<Vec<ExportProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: ProgressCallback =
        Arc::new(move |p: ExportProgress| sink.lock().unwrap().push(p));
    (callback, events)
}

fn percents(events: &[ExportProgress]) -> Vec<f64> {
    events.iter().map(|e| e.percent).collect()
}

fn cancel_after(delay: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trigger.cancel();
    });
    token
}

#[tokio::test(start_paused = true)]
async fn test_direct_webm_export() {
    let orchestrator = orchestrator(Script::Succeed);
    let (callback, events) = collect();

    let (outcome, job) = orchestrator
        .export_job(
            source(5.0),
            settings(Container::WebM, false),
            callback,
            CancellationToken::new(),
        )
        .await;

    let ExportOutcome::Complete(artifact) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(artifact.container, Container::WebM);
    assert!(!artifact.is_empty());
    assert_eq!(artifact.tracks.audio_tracks, 0);
    assert!((artifact.duration_secs - 5.0).abs() < 1e-6);

    let events = events.lock().unwrap();
    let percents = percents(&events);
    assert_eq!(percents.first(), Some(&0.0));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(&percents[percents.len() - 2..], &[90.0, 100.0]);
    assert!(events.iter().all(|e| e.stage != ExportStage::Transcoding));
    assert_eq!(events.last().unwrap().message, "Export complete!");
    assert_eq!(
        events
            .iter()
            .filter(|e| e.stage == ExportStage::Complete)
            .count(),
        1
    );

    let job = job.unwrap();
    assert_eq!(job.stage, ExportStage::Complete);
    assert_eq!(job.progress, 100.0);
    assert!(matches!(
        job.outcome,
        Some(JobOutcome::Complete {
            fallback: false,
            ..
        })
    ));
    assert!(!orchestrator.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_audio_track_follows_include_audio() {
    let orchestrator = orchestrator(Script::Succeed);

    let with_tone: Arc<dyn PlaybackSource> =
        Arc::new(SyntheticSource::new(2.0).with_tone(48_000, 2));
    let outcome = orchestrator
        .export(
            with_tone,
            settings(Container::WebM, true),
            ignore_progress(),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome.artifact().unwrap().tracks.audio_tracks, 1);

    let with_tone: Arc<dyn PlaybackSource> =
        Arc::new(SyntheticSource::new(2.0).with_tone(48_000, 2));
    let outcome = orchestrator
        .export(
            with_tone,
            settings(Container::WebM, false),
            ignore_progress(),
            CancellationToken::new(),
        )
        .await;
    let artifact = outcome.artifact().unwrap();
    assert_eq!(artifact.tracks.audio_tracks, 0);
    assert!(artifact.tracks.video);
}

#[tokio::test(start_paused = true)]
async fn test_silent_source_with_audio_requested_continues() {
    let orchestrator = orchestrator(Script::Succeed);
    let outcome = orchestrator
        .export(
            source(1.0),
            settings(Container::WebM, true),
            ignore_progress(),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(outcome.artifact().unwrap().tracks.audio_tracks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_mp4_export_transcodes() {
    let orchestrator = orchestrator(Script::Succeed);
    let (callback, events) = collect();

    let outcome = orchestrator
        .export(
            source(3.0),
            settings(Container::Mp4, false),
            callback,
            CancellationToken::new(),
        )
        .await;

    let artifact = outcome.artifact().expect("mp4 export should complete");
    assert_eq!(artifact.container, Container::Mp4);
    assert!(artifact.data.starts_with(b"ftypmp42"));
    assert!((artifact.duration_secs - 3.0).abs() < 1e-6);

    let events = events.lock().unwrap();
    let percents = percents(&events);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents.last(), Some(&100.0));

    let transcoding: Vec<&ExportProgress> = events
        .iter()
        .filter(|e| e.stage == ExportStage::Transcoding)
        .collect();
    assert!(!transcoding.is_empty());
    assert_eq!(transcoding[0].message, "Converting to MP4...");
    assert!(transcoding
        .iter()
        .all(|e| (85.0..=95.0).contains(&e.percent)));
    assert_eq!(transcoding.last().unwrap().percent, 95.0);

    // Capture output is scaled into the lower window.
    assert!(events
        .iter()
        .filter(|e| e.stage == ExportStage::Recording)
        .all(|e| e.percent <= 85.0));
}

#[tokio::test(start_paused = true)]
async fn test_transcode_failure_accepts_intermediate() {
    let policy = Arc::new(CountingPolicy {
        transcode: TranscodeFallback::AcceptIntermediate,
        asked: AtomicUsize::new(0),
    });
    let orchestrator = orchestrator(Script::Fail).with_policy(policy.clone());
    let (callback, events) = collect();

    let (outcome, job) = orchestrator
        .export_job(
            source(2.0),
            settings(Container::Mp4, false),
            callback,
            CancellationToken::new(),
        )
        .await;

    let artifact = outcome.artifact().expect("fallback delivers the intermediate");
    assert_eq!(artifact.container, Container::WebM);
    assert_eq!(policy.asked.load(Ordering::SeqCst), 1);

    let events = events.lock().unwrap();
    let last = events.last().unwrap();
    assert_eq!(last.stage, ExportStage::Complete);
    assert_eq!(last.percent, 100.0);
    assert_eq!(last.message, "Export complete (webm fallback)");
    assert!(matches!(
        job.unwrap().outcome,
        Some(JobOutcome::Complete { fallback: true, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_transcode_failure_abort() {
    let policy = Arc::new(CountingPolicy {
        transcode: TranscodeFallback::Abort,
        asked: AtomicUsize::new(0),
    });
    let orchestrator = orchestrator(Script::Fail).with_policy(policy.clone());
    let (callback, events) = collect();

    let outcome = orchestrator
        .export(
            source(2.0),
            settings(Container::Mp4, false),
            callback,
            CancellationToken::new(),
        )
        .await;

    assert!(matches!(
        outcome,
        ExportOutcome::Failed(ExportError::TranscodeFailure(TranscodeError::Failed(_)))
    ));
    assert_eq!(policy.asked.load(Ordering::SeqCst), 1);
    assert_eq!(events.lock().unwrap().last().unwrap().stage, ExportStage::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_missing_engine_asks_policy_once() {
    let policy = Arc::new(CountingPolicy {
        transcode: TranscodeFallback::AcceptIntermediate,
        asked: AtomicUsize::new(0),
    });
    let engine = engine(Script::Succeed, false);
    let orchestrator = orchestrator_with(Arc::clone(&engine)).with_policy(policy.clone());

    let outcome = orchestrator
        .export(
            source(1.0),
            settings(Container::Mp4, false),
            ignore_progress(),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome.artifact().unwrap().container, Container::WebM);
    assert_eq!(policy.asked.load(Ordering::SeqCst), 1);
    assert_eq!(engine.load_attempts(), 1);
    assert!(!engine.is_loaded());
}

#[tokio::test(start_paused = true)]
async fn test_encode_timeout_is_reported_as_timeout() {
    let mut config = AppConfig::default();
    config.transcode.encode_timeout_secs = 5;
    let orchestrator = orchestrator(Script::Hang)
        .with_config(&config)
        .with_policy(Arc::new(StaticPolicy {
            audio: AudioFallback::ContinueSilent,
            transcode: TranscodeFallback::Abort,
        }));

    let outcome = orchestrator
        .export(
            source(1.0),
            settings(Container::Mp4, false),
            ignore_progress(),
            CancellationToken::new(),
        )
        .await;

    let ExportOutcome::Failed(ExportError::TranscodeFailure(error)) = outcome else {
        panic!("expected a transcode failure, got {outcome:?}");
    };
    assert!(error.is_timeout());
    assert!(matches!(error, TranscodeError::EncodeTimeout(d) if d == Duration::from_secs(5)));
}

#[tokio::test(start_paused = true)]
async fn test_second_export_is_rejected_while_busy() {
    let orchestrator = Arc::new(orchestrator(Script::Succeed));

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .export(
                    source(2.0),
                    settings(Container::WebM, false),
                    ignore_progress(),
                    CancellationToken::new(),
                )
                .await
        })
    };
    while !orchestrator.is_busy() {
        tokio::task::yield_now().await;
    }

    let (callback, events) = collect();
    let (rejected, job) = orchestrator
        .export_job(
            source(2.0),
            settings(Container::WebM, false),
            callback,
            CancellationToken::new(),
        )
        .await;
    assert!(matches!(rejected, ExportOutcome::Failed(ExportError::Busy)));
    assert!(job.is_none());
    assert!(events.lock().unwrap().is_empty());

    let first = first.await.unwrap();
    assert!(first.artifact().is_some());
    assert!(!orchestrator.is_busy());

    let again = orchestrator
        .export(
            source(1.0),
            settings(Container::WebM, false),
            ignore_progress(),
            CancellationToken::new(),
        )
        .await;
    assert!(again.artifact().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_invalid_settings_rejected_without_job() {
    let orchestrator = orchestrator(Script::Succeed);
    let mut bad = settings(Container::WebM, false);
    bad.fps = 0;

    let (outcome, job) = orchestrator
        .export_job(
            source(1.0),
            bad,
            ignore_progress(),
            CancellationToken::new(),
        )
        .await;
    assert!(matches!(outcome, ExportOutcome::Failed(ExportError::Config(_))));
    assert!(job.is_none());
    assert!(!orchestrator.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_capture() {
    let orchestrator = orchestrator(Script::Succeed);
    let (callback, events) = collect();
    let cancel = cancel_after(Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    let (outcome, job) = orchestrator
        .export_job(source(30.0), settings(Container::Mp4, false), callback, cancel)
        .await;

    assert!(matches!(outcome, ExportOutcome::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(job.unwrap().outcome, Some(JobOutcome::Cancelled));

    let events = events.lock().unwrap();
    assert!(events.iter().all(|e| e.stage != ExportStage::Transcoding));
    assert_eq!(events.last().unwrap().stage, ExportStage::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_transcode() {
    let orchestrator = orchestrator(Script::Hang);
    let (callback, events) = collect();
    // Capture of a 1s source ends near 1s; the engine hangs after that.
    let cancel = cancel_after(Duration::from_secs(3));

    let started = tokio::time::Instant::now();
    let outcome = orchestrator
        .export(source(1.0), settings(Container::Mp4, false), callback, cancel)
        .await;

    assert!(matches!(outcome, ExportOutcome::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(4));

    let count = {
        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| e.stage == ExportStage::Transcoding));
        assert_eq!(events.last().unwrap().stage, ExportStage::Cancelled);
        events.len()
    };

    // The detached encode must not report anything after the terminal event.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(events.lock().unwrap().len(), count);
}
