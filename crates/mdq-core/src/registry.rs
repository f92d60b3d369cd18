//! Canonical in-memory job map.
//!
//! `apply` is the only mutation path. It discards an update when the job is already
//! terminal or when the update's sequence id is not newer than the job's; that single
//! rule keeps out-of-order, duplicated and stale samples from corrupting state.
//! The same type backs the engine's authoritative registry and any client projection.

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::job::{Job, JobId, JobStatus, JobUpdate};

/// Result of `JobRegistry::apply`. For diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// `sequence_id` was not newer than the job's current one.
    Stale { current: u64 },
    /// Job already reached `Completed`, `Error` or `Cancelled`.
    Terminal,
    UnknownJob,
}

#[derive(Debug, Default, Clone)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
    /// Insertion (submission) order for snapshots.
    order: Vec<JobId>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: Job) -> Result<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(EngineError::JobAlreadyExists(job.id));
        }
        self.order.push(job.id);
        self.jobs.insert(job.id, job);
        Ok(())
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Jobs in submission order.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|id| self.jobs.get(id))
    }

    /// Merges `update` into job `id` if `sequence_id` is newer and the job is not terminal.
    pub fn apply(&mut self, id: JobId, update: &JobUpdate, sequence_id: u64) -> ApplyOutcome {
        let Some(job) = self.jobs.get_mut(&id) else {
            return ApplyOutcome::UnknownJob;
        };
        if job.status.is_terminal() {
            return ApplyOutcome::Terminal;
        }
        if sequence_id <= job.sequence_id {
            return ApplyOutcome::Stale {
                current: job.sequence_id,
            };
        }

        job.sequence_id = sequence_id;
        if let Some(status) = update.status {
            job.status = status;
        }
        if let Some(p) = update.progress.filter(|p| p.is_finite()) {
            let p = p.clamp(0.0, 100.0);
            if p > job.progress {
                job.progress = p;
            }
        }
        if let Some(speed) = &update.speed {
            job.display.speed = Some(speed.clone());
        }
        if let Some(eta) = &update.eta {
            job.display.eta = Some(eta.clone());
        }
        if let Some(filename) = &update.filename {
            job.display.filename = Some(filename.clone());
        }
        if let Some(phase) = update.phase {
            job.display.phase = Some(phase);
        }

        // Status-scoped fields exist only in their status.
        job.output_path = match job.status {
            JobStatus::Completed => update.output_path.clone().or(job.output_path.take()),
            _ => None,
        };
        job.error = match job.status {
            JobStatus::Error => update.error.clone().or(job.error.take()),
            _ => None,
        };
        job.conflict_target = match job.status {
            JobStatus::FileConflict => update.conflict_target.clone().or(job.conflict_target.take()),
            _ => None,
        };
        ApplyOutcome::Applied
    }

    /// Removes a job (user dismissal / bulk clear). The engine never evicts on its own.
    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        let job = self.jobs.remove(id)?;
        self.order.retain(|j| j != id);
        Some(job)
    }

    /// Consistent point-in-time copy of every job, in submission order.
    pub fn snapshot_all(&self) -> Vec<Job> {
        self.jobs().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ErrorDetail, JobConfig, Phase};
    use std::path::PathBuf;

    fn registry_with_job() -> (JobRegistry, JobId) {
        let mut reg = JobRegistry::new();
        let id = JobId::new();
        reg.insert(Job::pending(id, "https://example.com/v/1", JobConfig::new("/tmp"), 1))
            .unwrap();
        (reg, id)
    }

    fn progress(p: f32) -> JobUpdate {
        JobUpdate {
            progress: Some(p),
            phase: Some(Phase::Transferring),
            ..JobUpdate::default()
        }
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (mut reg, id) = registry_with_job();
        let dup = Job::pending(id, "https://example.com/other", JobConfig::new("/tmp"), 2);
        assert!(matches!(reg.insert(dup), Err(EngineError::JobAlreadyExists(x)) if x == id));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn lower_or_equal_sequence_is_noop() {
        let (mut reg, id) = registry_with_job();
        assert_eq!(
            reg.apply(id, &JobUpdate::status(JobStatus::Downloading), 1),
            ApplyOutcome::Applied
        );
        assert_eq!(reg.apply(id, &progress(40.0), 5), ApplyOutcome::Applied);
        let before = reg.get(&id).cloned().unwrap();

        assert_eq!(
            reg.apply(id, &progress(10.0), 3),
            ApplyOutcome::Stale { current: 5 }
        );
        assert_eq!(
            reg.apply(id, &JobUpdate::status(JobStatus::Pending), 5),
            ApplyOutcome::Stale { current: 5 }
        );
        assert_eq!(reg.get(&id), Some(&before));
    }

    #[test]
    fn terminal_state_is_final() {
        let (mut reg, id) = registry_with_job();
        reg.apply(id, &JobUpdate::status(JobStatus::Downloading), 1);
        reg.apply(id, &JobUpdate::completed(PathBuf::from("/tmp/a.mp4")), 2);
        let done = reg.get(&id).cloned().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.progress, 100.0);

        for (seq, update) in [
            (3, JobUpdate::status(JobStatus::Downloading)),
            (10, progress(5.0)),
            (11, JobUpdate::status(JobStatus::Cancelled)),
        ] {
            assert_eq!(reg.apply(id, &update, seq), ApplyOutcome::Terminal);
        }
        assert_eq!(reg.get(&id), Some(&done));
    }

    #[test]
    fn progress_never_moves_backward() {
        let (mut reg, id) = registry_with_job();
        reg.apply(id, &JobUpdate::status(JobStatus::Downloading), 1);
        reg.apply(id, &progress(60.0), 2);
        reg.apply(id, &progress(15.0), 3);
        assert_eq!(reg.get(&id).unwrap().progress, 60.0);
        reg.apply(id, &progress(250.0), 4);
        assert_eq!(reg.get(&id).unwrap().progress, 100.0);
        reg.apply(id, &progress(f32::NAN), 5);
        assert_eq!(reg.get(&id).unwrap().progress, 100.0);
    }

    #[test]
    fn status_scoped_fields_follow_status() {
        let (mut reg, id) = registry_with_job();
        reg.apply(id, &JobUpdate::status(JobStatus::Downloading), 1);
        reg.apply(id, &JobUpdate::conflict(PathBuf::from("/out/a.mp4")), 2);
        assert_eq!(
            reg.get(&id).unwrap().conflict_target.as_deref(),
            Some(std::path::Path::new("/out/a.mp4"))
        );
        reg.apply(id, &JobUpdate::status(JobStatus::Downloading), 3);
        assert!(reg.get(&id).unwrap().conflict_target.is_none());

        let detail = ErrorDetail {
            message: "Process failed (exit code 1)".into(),
            exit_code: Some(1),
            stderr_tail: "ERROR: boom".into(),
            log_ref: None,
        };
        reg.apply(id, &JobUpdate::failed(detail.clone()), 4);
        let job = reg.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_ref(), Some(&detail));
        assert!(job.output_path.is_none());
    }

    #[test]
    fn unknown_job_reported() {
        let mut reg = JobRegistry::new();
        assert_eq!(
            reg.apply(JobId::new(), &progress(1.0), 1),
            ApplyOutcome::UnknownJob
        );
    }

    #[test]
    fn snapshot_keeps_submission_order_after_remove() {
        let mut reg = JobRegistry::new();
        let ids: Vec<JobId> = (0..4).map(|_| JobId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            reg.insert(Job::pending(*id, format!("https://e.com/{i}"), JobConfig::new("/tmp"), i as i64))
                .unwrap();
        }
        reg.remove(&ids[1]);
        let snap: Vec<JobId> = reg.snapshot_all().into_iter().map(|j| j.id).collect();
        assert_eq!(snap, vec![ids[0], ids[2], ids[3]]);
    }
}
