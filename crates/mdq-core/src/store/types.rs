//! Rows of the state database.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobConfig, JobId, JobStatus};

/// Minimal information needed to reconstruct a job after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeDescriptor {
    pub job_id: JobId,
    pub url: String,
    /// Last persisted status. Informational: resumed jobs always start `Pending`.
    pub status: JobStatus,
    pub config: JobConfig,
    /// Last sequence id the job reached; resumed jobs continue after it.
    pub sequence_id: u64,
    pub submitted_at: i64,
}

impl ResumeDescriptor {
    pub fn of(job: &Job) -> Self {
        Self {
            job_id: job.id,
            url: job.url.clone(),
            status: job.status,
            config: job.config.clone(),
            sequence_id: job.sequence_id,
            submitted_at: job.submitted_at,
        }
    }

    /// Reconstructs the job as `Pending`, keeping id, snapshot and ordering key.
    pub fn into_job(self) -> Job {
        let mut job = Job::pending(self.job_id, self.url, self.config, self.submitted_at);
        job.sequence_id = self.sequence_id;
        job
    }
}

/// One completed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub url: String,
    /// Unix milliseconds.
    pub completed_at: i64,
}
