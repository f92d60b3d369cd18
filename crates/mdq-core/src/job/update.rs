//! Update payloads and the per-job sequence counter.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{JobId, JobStatus, Phase};

/// Failure details, present only on jobs in `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub exit_code: Option<i32>,
    /// Last lines of the tool's stderr (bounded).
    pub stderr_tail: String,
    /// Full output log for this job.
    pub log_ref: Option<PathBuf>,
}

/// One status-affecting or progress sample for a job. `None` fields leave the
/// current value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_target: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn completed(output_path: PathBuf) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(100.0),
            phase: Some(Phase::Finalizing),
            output_path: Some(output_path),
            ..Self::default()
        }
    }

    pub fn failed(detail: ErrorDetail) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(detail),
            ..Self::default()
        }
    }

    pub fn conflict(target: PathBuf) -> Self {
        Self {
            status: Some(JobStatus::FileConflict),
            conflict_target: Some(target),
            ..Self::default()
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(JobStatus::is_terminal)
    }

    /// Folds a later progress-only sample into this one. Fields the later
    /// sample leaves empty keep their earlier value.
    pub(crate) fn absorb(&mut self, later: JobUpdate) {
        debug_assert!(self.status.is_none() && later.status.is_none());
        self.progress = later.progress.or(self.progress);
        self.speed = later.speed.or(self.speed.take());
        self.eta = later.eta.or(self.eta.take());
        self.filename = later.filename.or(self.filename.take());
        self.phase = later.phase.or(self.phase);
        self.output_path = later.output_path.or(self.output_path.take());
    }
}

/// A job update tagged with its ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub job_id: JobId,
    pub sequence_id: u64,
    #[serde(flatten)]
    pub update: JobUpdate,
}

/// Ordered group of updates emitted by the progress pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub updates: Vec<UpdateEntry>,
}

impl BatchUpdate {
    pub fn single(entry: UpdateEntry) -> Self {
        Self {
            updates: vec![entry],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Per-job monotonic counter. Every status-affecting or progress emission for a
/// job takes the next value, whoever emits it (scheduler or supervisor).
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Counter whose next value is `last + 1`.
    pub fn starting_after(last: u64) -> Self {
        SequenceCounter(Arc::new(AtomicU64::new(last)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_strictly_increasing_across_clones() {
        let a = SequenceCounter::starting_after(7);
        let b = a.clone();
        assert_eq!(a.next(), 8);
        assert_eq!(b.next(), 9);
        assert_eq!(a.next(), 10);
        assert_eq!(b.next(), 11);
    }

    #[test]
    fn absorb_keeps_earlier_fields_the_later_sample_lacks() {
        let mut first = JobUpdate {
            progress: Some(10.0),
            filename: Some("clip.mp4".into()),
            speed: Some("1.00 MiB/s".into()),
            ..JobUpdate::default()
        };
        first.absorb(JobUpdate {
            progress: Some(25.0),
            eta: Some("00:12".into()),
            ..JobUpdate::default()
        });
        assert_eq!(first.progress, Some(25.0));
        assert_eq!(first.filename.as_deref(), Some("clip.mp4"));
        assert_eq!(first.speed.as_deref(), Some("1.00 MiB/s"));
        assert_eq!(first.eta.as_deref(), Some("00:12"));
    }

    #[test]
    fn entry_serializes_flat() {
        let entry = UpdateEntry {
            job_id: JobId::new(),
            sequence_id: 3,
            update: JobUpdate::status(JobStatus::Downloading).with_phase(Phase::Initializing),
        };
        let v = serde_json::to_value(&entry).unwrap();
        assert_eq!(v["sequence_id"], 3);
        assert_eq!(v["status"], "downloading");
        assert_eq!(v["phase"], "initializing");
        assert!(v.get("progress").is_none());
    }
}
