//! Per-request export job record.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use reelfx_effect_model::{Container, ExportProgress, ExportSettings, ExportStage};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "export-{}", self.0)
    }
}

/// Summary of how a job ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Complete {
        container: Container,
        bytes: usize,
        /// True when the intermediate artifact was delivered after a failed transcode.
        fallback: bool,
    },
    Cancelled,
    Failed {
        reason: String,
    },
}

/// One export request. Never reused.
#[derive(Debug, Clone, Serialize)]
pub struct ExportJob {
    pub id: JobId,
    pub settings: ExportSettings,
    pub stage: ExportStage,
    /// Monotonic, 0..=100.
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
}

impl ExportJob {
    pub fn new(settings: ExportSettings) -> Self {
        Self {
            id: JobId::next(),
            settings,
            stage: ExportStage::Preparing,
            progress: 0.0,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Apply a progress event, never letting progress go backwards.
    /// Returns the event as it should be reported, or `None` once finished.
    pub fn record(&mut self, event: ExportProgress) -> Option<ExportProgress> {
        if self.is_finished() {
            return None;
        }
        self.progress = self.progress.max(event.percent);
        self.stage = event.stage;
        Some(ExportProgress {
            percent: self.progress,
            ..event
        })
    }

    /// Mark the job terminal.
    pub fn finish(&mut self, outcome: JobOutcome) {
        if self.is_finished() {
            return;
        }
        self.stage = match outcome {
            JobOutcome::Complete { .. } => ExportStage::Complete,
            JobOutcome::Cancelled => ExportStage::Cancelled,
            JobOutcome::Failed { .. } => ExportStage::Failed,
        };
        if matches!(outcome, JobOutcome::Complete { .. }) {
            self.progress = 100.0;
        }
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = ExportJob::new(ExportSettings::default());
        job.record(ExportProgress::new(ExportStage::Recording, 40.0, "Recording..."));
        let reported = job
            .record(ExportProgress::new(ExportStage::Recording, 30.0, "Recording..."))
            .unwrap();
        assert_eq!(reported.percent, 40.0);
        assert_eq!(job.progress, 40.0);
    }

    #[test]
    fn test_finished_job_ignores_events() {
        let mut job = ExportJob::new(ExportSettings::default());
        job.finish(JobOutcome::Cancelled);
        assert!(job
            .record(ExportProgress::new(ExportStage::Recording, 50.0, "late"))
            .is_none());
        job.finish(JobOutcome::Failed {
            reason: "too late".into(),
        });
        assert_eq!(job.outcome, Some(JobOutcome::Cancelled));
        assert_eq!(job.stage, ExportStage::Cancelled);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = ExportJob::new(ExportSettings::default());
        let b = ExportJob::new(ExportSettings::default());
        assert_ne!(a.id, b.id);
        assert!(a.id.to_string().starts_with("export-"));
    }

    #[test]
    fn test_job_serializes() {
        let mut job = ExportJob::new(ExportSettings::default());
        job.finish(JobOutcome::Complete {
            container: Container::Mp4,
            bytes: 1024,
            fallback: false,
        });
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["outcome"]["status"], "complete");
        assert_eq!(json["outcome"]["container"], "mp4");
        assert_eq!(json["progress"], 100.0);
    }
}
