//! Core job types: identifier, status state machine, post-processing phase.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque job identifier, assigned at submission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(uuid::Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(uuid::Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s.trim()).map(JobId)
    }
}

/// Job lifecycle state.
///
/// `Pending → Downloading → {Completed | Error | Cancelled}`,
/// `Downloading → FileConflict → {Downloading | Cancelled}`,
/// and any non-terminal state → `Cancelled` on user cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    FileConflict,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Holds a concurrency slot.
    pub fn is_busy(self) -> bool {
        matches!(self, JobStatus::Downloading | JobStatus::FileConflict)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::FileConflict => "file_conflict",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "downloading" => Some(JobStatus::Downloading),
            "file_conflict" => Some(JobStatus::FileConflict),
            "completed" => Some(JobStatus::Completed),
            "error" => Some(JobStatus::Error),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the external tool is doing right now. Informational, except that
/// post-processing phases release a transfer slot (the job stays busy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Transferring,
    Merging,
    EmbeddingMetadata,
    EmbeddingThumbnail,
    Finalizing,
}

impl Phase {
    pub fn is_post_processing(self) -> bool {
        match self {
            Phase::Initializing | Phase::Transferring => false,
            Phase::Merging
            | Phase::EmbeddingMetadata
            | Phase::EmbeddingThumbnail
            | Phase::Finalizing => true,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Transferring => "downloading",
            Phase::Merging => "merging",
            Phase::EmbeddingMetadata => "writing metadata",
            Phase::EmbeddingThumbnail => "embedding thumbnail",
            Phase::Finalizing => "finalizing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_and_busy_sets() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::FileConflict.is_terminal());

        assert!(JobStatus::Downloading.is_busy());
        assert!(JobStatus::FileConflict.is_busy());
        assert!(!JobStatus::Pending.is_busy());
        assert!(!JobStatus::Completed.is_busy());
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Downloading,
            JobStatus::FileConflict,
            JobStatus::Completed,
            JobStatus::Error,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("running"), None);
    }

    #[test]
    fn post_processing_phases() {
        assert!(!Phase::Initializing.is_post_processing());
        assert!(!Phase::Transferring.is_post_processing());
        assert!(Phase::Merging.is_post_processing());
        assert!(Phase::Finalizing.is_post_processing());
    }

    #[test]
    fn job_id_parses_display_form() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
