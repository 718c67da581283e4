//! Export orchestration: capture, optional transcode, fallback, hand-off.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use reelfx_capture_engine::{
    CaptureOptions, CaptureOutcome, CaptureSession, GstRecorder, MediaRecorder, PlaybackSource,
};
use reelfx_common::config::{AppConfig, CaptureConfig};
use reelfx_effect_model::{
    Artifact, CaptureSurface, ExportProgress, ExportSettings, ExportStage, ProgressCallback,
};

use crate::engine::{SharedEngine, TranscodeProgress};
use crate::error::{ExportError, TranscodeError};
use crate::job::{ExportJob, JobOutcome};
use crate::policy::{
    decide_transcode, AudioBridge, DecisionPolicy, StaticPolicy, TranscodeFallback,
};
use crate::transcode::Transcoder;

/// Capture window when the requested container is the intermediate one.
const DIRECT_CAPTURE_END: f64 = 90.0;
/// Capture and transcode windows when a transcode follows.
const TRANSCODE_START: f64 = 85.0;
const TRANSCODE_END: f64 = 95.0;

/// Terminal result of an export.
#[derive(Debug)]
pub enum ExportOutcome {
    Complete(Artifact),
    Cancelled,
    Failed(ExportError),
}

impl ExportOutcome {
    pub fn artifact(&self) -> Option<&Artifact> {
        match self {
            Self::Complete(artifact) => Some(artifact),
            _ => None,
        }
    }
}

type RecorderFactory = Box<dyn Fn() -> Box<dyn MediaRecorder> + Send + Sync>;

/// Runs export jobs against one capture surface, one at a time.
pub struct ExportOrchestrator {
    surface: Arc<dyn CaptureSurface>,
    transcoder: Transcoder,
    policy: Arc<dyn DecisionPolicy>,
    decision_timeout: Duration,
    capture: CaptureConfig,
    recorder: RecorderFactory,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the job ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Shared job record plus the progress sink; drops events once finished.
#[derive(Clone)]
struct Reporter {
    job: Arc<Mutex<ExportJob>>,
    sink: ProgressCallback,
}

impl Reporter {
    fn emit(&self, event: ExportProgress) {
        let reported = match self.job.lock() {
            Ok(mut job) => job.record(event),
            Err(_) => None,
        };
        if let Some(event) = reported {
            (self.sink)(event);
        }
    }

    /// Finish the job and emit its terminal event.
    fn finish(&self, outcome: JobOutcome, message: impl Into<String>) -> Option<ExportJob> {
        let job = {
            let mut job = self.job.lock().ok()?;
            if job.is_finished() {
                return None;
            }
            job.finish(outcome);
            job.clone()
        };
        (self.sink)(ExportProgress::new(job.stage, job.progress, message));
        Some(job)
    }

    fn snapshot(&self) -> Option<ExportJob> {
        self.job.lock().ok().map(|job| job.clone())
    }
}

impl ExportOrchestrator {
    /// An orchestrator recording with GStreamer and transcoding through `engine`.
    pub fn new(surface: Arc<dyn CaptureSurface>, engine: Arc<SharedEngine>) -> Self {
        let defaults = AppConfig::default();
        Self {
            surface,
            transcoder: Transcoder::new(engine, defaults.transcode.encode_timeout()),
            policy: Arc::new(StaticPolicy::default()),
            decision_timeout: defaults.decisions.timeout(),
            capture: defaults.capture,
            recorder: Box::new(|| Box::new(GstRecorder::new())),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn DecisionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Apply capture tuning, encode timeout and decision timeout.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.capture = config.capture.clone();
        self.decision_timeout = config.decisions.timeout();
        self.transcoder = Transcoder::new(
            Arc::clone(self.transcoder.engine()),
            config.transcode.encode_timeout(),
        );
        self
    }

    pub fn with_recorder<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn MediaRecorder> + Send + Sync + 'static,
    {
        self.recorder = Box::new(factory);
        self
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Export `source` as rendered on this orchestrator's surface.
    pub async fn export(
        &self,
        source: Arc<dyn PlaybackSource>,
        settings: ExportSettings,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> ExportOutcome {
        self.export_job(source, settings, progress, cancel).await.0
    }

    /// Like [`Self::export`], also returning the job record. The record is
    /// `None` when the request was rejected before a job was created.
    pub async fn export_job(
        &self,
        source: Arc<dyn PlaybackSource>,
        settings: ExportSettings,
        progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> (ExportOutcome, Option<ExportJob>) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Rejecting export: another export is running on this surface");
            return (ExportOutcome::Failed(ExportError::Busy), None);
        }
        let _guard = InFlight(&self.in_flight);

        if let Err(e) = settings.validate() {
            return (ExportOutcome::Failed(ExportError::Config(e.to_string())), None);
        }

        let reporter = Reporter {
            job: Arc::new(Mutex::new(ExportJob::new(settings))),
            sink: progress,
        };
        let job_id = reporter.snapshot().map(|job| job.id);
        tracing::info!(
            job = ?job_id,
            format = %settings.format,
            quality = ?settings.quality,
            fps = settings.fps,
            include_audio = settings.include_audio,
            "Export started"
        );

        let outcome = self.run(source, settings, &reporter, &cancel).await;

        let job = match &outcome {
            ExportOutcome::Complete(artifact) => {
                let fallback = artifact.container != settings.format;
                let message = if fallback {
                    format!("Export complete ({} fallback)", artifact.container)
                } else {
                    "Export complete!".to_string()
                };
                reporter.finish(
                    JobOutcome::Complete {
                        container: artifact.container,
                        bytes: artifact.len(),
                        fallback,
                    },
                    message,
                )
            }
            ExportOutcome::Cancelled => reporter.finish(JobOutcome::Cancelled, "Export cancelled"),
            ExportOutcome::Failed(e) => reporter.finish(
                JobOutcome::Failed {
                    reason: e.to_string(),
                },
                format!("Export failed: {e}"),
            ),
        };
        let job = job.or_else(|| reporter.snapshot());

        if let Some(job) = &job {
            tracing::info!(
                job = %job.id,
                stage = %job.stage,
                elapsed_ms = job.elapsed().num_milliseconds(),
                "Export finished"
            );
        }
        (outcome, job)
    }

    async fn run(
        &self,
        source: Arc<dyn PlaybackSource>,
        settings: ExportSettings,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> ExportOutcome {
        let transcode = settings.needs_transcode();
        let capture_end = if transcode {
            TRANSCODE_START
        } else {
            DIRECT_CAPTURE_END
        };

        let capture_progress: ProgressCallback = {
            let reporter = reporter.clone();
            Arc::new(move |event: ExportProgress| {
                let percent = event.percent / 100.0 * capture_end;
                // Capture completing is not the export completing.
                let event = match event.stage {
                    ExportStage::Complete => {
                        ExportProgress::new(ExportStage::Finalizing, percent, "Capture complete")
                    }
                    stage => ExportProgress::new(stage, percent, event.message),
                };
                reporter.emit(event);
            })
        };

        let recorder = (self.recorder)();
        let mut session = CaptureSession::new(Arc::clone(&self.surface), source, recorder)
            .with_config(self.capture.clone())
            .with_audio_policy(
                Arc::new(AudioBridge(Arc::clone(&self.policy))),
                self.decision_timeout,
            );

        let intermediate = match session
            .run(CaptureOptions::from(&settings), capture_progress, cancel.clone())
            .await
        {
            CaptureOutcome::Complete(artifact) => artifact,
            CaptureOutcome::Cancelled => return ExportOutcome::Cancelled,
            CaptureOutcome::Failed(e) => return ExportOutcome::Failed(e.into()),
        };

        if !transcode {
            return ExportOutcome::Complete(intermediate);
        }
        self.transcode(intermediate, reporter, cancel).await
    }

    async fn transcode(
        &self,
        intermediate: Artifact,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> ExportOutcome {
        reporter.emit(ExportProgress::new(
            ExportStage::Transcoding,
            TRANSCODE_START,
            "Converting to MP4...",
        ));

        let engine_progress: TranscodeProgress = {
            let reporter = reporter.clone();
            Arc::new(move |raw: f64| {
                let span = TRANSCODE_END - TRANSCODE_START;
                let percent = TRANSCODE_START + raw.clamp(0.0, 100.0) / 100.0 * span;
                reporter.emit(ExportProgress::new(
                    ExportStage::Transcoding,
                    percent,
                    "Converting to MP4...",
                ));
            })
        };

        // Runs detached so a cancel can resolve immediately; the encode then
        // finishes or times out on its own.
        let mut task = {
            let transcoder = self.transcoder.clone();
            let input = intermediate.clone();
            tokio::spawn(async move { transcoder.transcode(&input, engine_progress).await })
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Export cancelled during transcode, encode left running");
                return ExportOutcome::Cancelled;
            }
            joined = &mut task => joined.unwrap_or_else(|e| {
                Err(TranscodeError::failed(format!("transcode task failed: {e}")))
            }),
        };

        let error = match result {
            Ok(mp4) => return ExportOutcome::Complete(mp4),
            Err(e) => e,
        };

        tracing::warn!(error = %error, timeout = error.is_timeout(), "Transcode failed");
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExportOutcome::Cancelled,
            decision = decide_transcode(
                self.policy.as_ref(),
                &error,
                self.decision_timeout,
            ) => decision,
        };

        match decision {
            TranscodeFallback::AcceptIntermediate => {
                tracing::info!(
                    container = %intermediate.container,
                    "Delivering intermediate artifact"
                );
                ExportOutcome::Complete(intermediate)
            }
            TranscodeFallback::Abort => ExportOutcome::Failed(ExportError::TranscodeFailure(error)),
        }
    }
}
