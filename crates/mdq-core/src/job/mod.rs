//! Job data model: the canonical record, its settings snapshot, and update payloads.

mod config;
mod types;
mod update;

pub use config::{FormatPreset, JobConfig, DEFAULT_FILENAME_TEMPLATE};
pub use types::{JobId, JobStatus, Phase};
pub use update::{BatchUpdate, ErrorDetail, JobUpdate, SequenceCounter, UpdateEntry};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Informational display fields; never used for correctness decisions
/// (except `phase`, which the scheduler reads to tell transfer from post-processing).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDisplay {
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
    pub phase: Option<Phase>,
}

/// Canonical job record. Owned by the registry; mutated only through `JobRegistry::apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub status: JobStatus,
    pub sequence_id: u64,
    /// 0..=100; non-decreasing while downloading.
    pub progress: f32,
    pub display: JobDisplay,
    pub config: JobConfig,
    pub error: Option<ErrorDetail>,
    pub output_path: Option<PathBuf>,
    /// Existing file blocking the job; present only in `FileConflict`.
    pub conflict_target: Option<PathBuf>,
    /// Unix milliseconds at submission.
    pub submitted_at: i64,
}

impl Job {
    /// New `Pending` job at sequence 0.
    pub fn pending(id: JobId, url: impl Into<String>, config: JobConfig, submitted_at: i64) -> Self {
        Self {
            id,
            url: url.into(),
            status: JobStatus::Pending,
            sequence_id: 0,
            progress: 0.0,
            display: JobDisplay::default(),
            config,
            error: None,
            output_path: None,
            conflict_target: None,
            submitted_at,
        }
    }

    /// Occupies a transfer slot: busy and not yet in a post-processing phase.
    pub fn is_transferring(&self) -> bool {
        match self.status {
            JobStatus::FileConflict => true,
            JobStatus::Downloading => !self
                .display
                .phase
                .is_some_and(Phase::is_post_processing),
            _ => false,
        }
    }

    /// The job as an update entry, used when merging full-state snapshots.
    pub fn as_update(&self) -> UpdateEntry {
        UpdateEntry {
            job_id: self.id,
            sequence_id: self.sequence_id,
            update: JobUpdate {
                status: Some(self.status),
                progress: Some(self.progress),
                speed: self.display.speed.clone(),
                eta: self.display.eta.clone(),
                filename: self.display.filename.clone(),
                phase: self.display.phase,
                output_path: self.output_path.clone(),
                conflict_target: self.conflict_target.clone(),
                error: self.error.clone(),
            },
        }
    }
}
