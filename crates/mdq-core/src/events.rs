//! Events pushed by the engine to its subscribers.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::{BatchUpdate, ErrorDetail, Job, JobId, JobStatus, JobUpdate, UpdateEntry};

/// Every transition variant carries the per-job `sequence_id` it reports, so
/// clients can gate terminal events the same way they gate batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ProgressBatch(BatchUpdate),
    Completed {
        job_id: JobId,
        sequence_id: u64,
        output_path: PathBuf,
    },
    Error {
        job_id: JobId,
        sequence_id: u64,
        message: String,
        exit_code: Option<i32>,
        stderr_tail: String,
        log_ref: Option<PathBuf>,
    },
    Cancelled {
        job_id: JobId,
        sequence_id: u64,
    },
    FileConflict {
        job_id: JobId,
        sequence_id: u64,
        target: PathBuf,
    },
    /// New jobs entered the registry (submission, retry or resume).
    JobsAdded { jobs: Vec<Job> },
    /// Finished jobs were dismissed by the user.
    JobsRemoved { job_ids: Vec<JobId> },
}

impl EngineEvent {
    /// Builds the dedicated event for a status transition, if it has one.
    pub(crate) fn for_transition(entry: &UpdateEntry) -> Option<Self> {
        let job_id = entry.job_id;
        let sequence_id = entry.sequence_id;
        match entry.update.status? {
            JobStatus::Completed => Some(EngineEvent::Completed {
                job_id,
                sequence_id,
                output_path: entry.update.output_path.clone().unwrap_or_default(),
            }),
            JobStatus::Error => {
                let detail = entry.update.error.clone().unwrap_or_else(|| ErrorDetail {
                    message: "unknown error".to_string(),
                    exit_code: None,
                    stderr_tail: String::new(),
                    log_ref: None,
                });
                Some(EngineEvent::Error {
                    job_id,
                    sequence_id,
                    message: detail.message,
                    exit_code: detail.exit_code,
                    stderr_tail: detail.stderr_tail,
                    log_ref: detail.log_ref,
                })
            }
            JobStatus::Cancelled => Some(EngineEvent::Cancelled {
                job_id,
                sequence_id,
            }),
            JobStatus::FileConflict => Some(EngineEvent::FileConflict {
                job_id,
                sequence_id,
                target: entry.update.conflict_target.clone().unwrap_or_default(),
            }),
            JobStatus::Pending | JobStatus::Downloading => None,
        }
    }

    /// The update entries this event stands for, for projection merges.
    pub fn entries(&self) -> Vec<UpdateEntry> {
        match self {
            EngineEvent::ProgressBatch(batch) => batch.updates.clone(),
            EngineEvent::JobsAdded { jobs } => jobs.iter().map(Job::as_update).collect(),
            EngineEvent::JobsRemoved { .. } => Vec::new(),
            EngineEvent::Completed {
                job_id,
                sequence_id,
                output_path,
            } => vec![UpdateEntry {
                job_id: *job_id,
                sequence_id: *sequence_id,
                update: JobUpdate::completed(output_path.clone()),
            }],
            EngineEvent::Error {
                job_id,
                sequence_id,
                message,
                exit_code,
                stderr_tail,
                log_ref,
            } => vec![UpdateEntry {
                job_id: *job_id,
                sequence_id: *sequence_id,
                update: JobUpdate::failed(ErrorDetail {
                    message: message.clone(),
                    exit_code: *exit_code,
                    stderr_tail: stderr_tail.clone(),
                    log_ref: log_ref.clone(),
                }),
            }],
            EngineEvent::Cancelled {
                job_id,
                sequence_id,
            } => vec![UpdateEntry {
                job_id: *job_id,
                sequence_id: *sequence_id,
                update: JobUpdate::status(JobStatus::Cancelled),
            }],
            EngineEvent::FileConflict {
                job_id,
                sequence_id,
                target,
            } => vec![UpdateEntry {
                job_id: *job_id,
                sequence_id: *sequence_id,
                update: JobUpdate::conflict(target.clone()),
            }],
        }
    }
}
