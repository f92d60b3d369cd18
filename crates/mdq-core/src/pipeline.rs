//! Progress event pipeline: batches raw per-job samples into ordered update batches.
//!
//! Progress-only samples wait for the next interval flush and are coalesced per job
//! (the later sample wins, keeping its sequence id). Status-bearing samples flush that
//! job's buffer immediately together with the transition, so terminal and conflict
//! transitions are never delayed and never overtake earlier samples of the same job.

use std::collections::HashMap;

use crate::job::{BatchUpdate, JobId, UpdateEntry};

/// Default interval between batch flushes.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 250;

#[derive(Debug, Default)]
pub struct ProgressPipeline {
    buffered: HashMap<JobId, Vec<UpdateEntry>>,
    /// Jobs in the order their first buffered sample arrived.
    order: Vec<JobId>,
}

impl ProgressPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Accepts one sample. Returns a batch to publish right away when the sample
    /// carries a status change.
    pub fn push(&mut self, entry: UpdateEntry) -> Option<BatchUpdate> {
        let job_id = entry.job_id;
        if entry.update.status.is_some() {
            let mut updates = self.take_job(&job_id);
            updates.push(entry);
            return Some(BatchUpdate { updates });
        }

        if !self.buffered.contains_key(&job_id) {
            self.order.push(job_id);
        }
        let queue = self.buffered.entry(job_id).or_default();
        let coalesce = queue.last().is_some_and(|last| {
            last.update.status.is_none() && entry.sequence_id > last.sequence_id
        });
        if !coalesce {
            queue.push(entry);
        } else if let Some(last) = queue.last_mut() {
            last.sequence_id = entry.sequence_id;
            last.update.absorb(entry.update);
        }
        None
    }

    /// Drains everything buffered into one batch (interval tick).
    pub fn flush(&mut self) -> Option<BatchUpdate> {
        if self.order.is_empty() {
            return None;
        }
        let mut updates = Vec::new();
        for job_id in std::mem::take(&mut self.order) {
            if let Some(q) = self.buffered.remove(&job_id) {
                updates.extend(q);
            }
        }
        Some(BatchUpdate { updates })
    }

    fn take_job(&mut self, job_id: &JobId) -> Vec<UpdateEntry> {
        match self.buffered.remove(job_id) {
            Some(q) => {
                self.order.retain(|j| j != job_id);
                q
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, JobUpdate, Phase};
    use std::path::PathBuf;

    fn sample(job_id: JobId, seq: u64, pct: f32) -> UpdateEntry {
        UpdateEntry {
            job_id,
            sequence_id: seq,
            update: JobUpdate {
                progress: Some(pct),
                phase: Some(Phase::Transferring),
                ..JobUpdate::default()
            },
        }
    }

    #[test]
    fn progress_waits_for_flush_and_coalesces() {
        let mut p = ProgressPipeline::new();
        let a = JobId::new();
        let b = JobId::new();
        assert!(p.push(sample(a, 1, 10.0)).is_none());
        assert!(p.push(sample(b, 1, 5.0)).is_none());
        assert!(p.push(sample(a, 2, 20.0)).is_none());

        let batch = p.flush().unwrap();
        assert_eq!(batch.updates.len(), 2);
        assert_eq!(batch.updates[0].job_id, a);
        assert_eq!(batch.updates[0].sequence_id, 2);
        assert_eq!(batch.updates[0].update.progress, Some(20.0));
        assert_eq!(batch.updates[1].job_id, b);
        assert!(p.flush().is_none());
    }

    #[test]
    fn terminal_sample_bypasses_delay_after_earlier_samples() {
        let mut p = ProgressPipeline::new();
        let a = JobId::new();
        let b = JobId::new();
        p.push(sample(a, 1, 40.0));
        p.push(sample(b, 1, 10.0));
        let done = UpdateEntry {
            job_id: a,
            sequence_id: 2,
            update: JobUpdate::completed(PathBuf::from("/out/a.mkv")),
        };
        let batch = p.push(done).unwrap();
        let seqs: Vec<u64> = batch.updates.iter().map(|e| e.sequence_id).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(batch.updates.iter().all(|e| e.job_id == a));
        assert_eq!(batch.updates[1].update.status, Some(JobStatus::Completed));

        // b is still buffered.
        let rest = p.flush().unwrap();
        assert_eq!(rest.updates.len(), 1);
        assert_eq!(rest.updates[0].job_id, b);
    }

    #[test]
    fn same_job_never_reordered() {
        let mut p = ProgressPipeline::new();
        let a = JobId::new();
        p.push(sample(a, 3, 30.0));
        // A late sample with a lower sequence is kept after, not merged over.
        p.push(sample(a, 2, 20.0));
        let batch = p.flush().unwrap();
        let seqs: Vec<u64> = batch.updates.iter().map(|e| e.sequence_id).collect();
        assert_eq!(seqs, vec![3, 2]);
    }
}
