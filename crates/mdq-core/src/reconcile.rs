//! State reconciler: merges batches, events and full-state snapshots into a registry.
//!
//! Every path goes through `JobRegistry::apply`, so a reconnecting client can never
//! regress a job it already knows more recently.

use crate::events::EngineEvent;
use crate::job::{BatchUpdate, Job, UpdateEntry};
use crate::registry::{ApplyOutcome, JobRegistry};

/// Counts of what a merge did. Diagnostics only.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    pub stale: usize,
    pub terminal: usize,
    pub unknown: usize,
    /// Jobs the registry did not know and took from a full-state snapshot.
    pub inserted: usize,
}

impl ReconcileReport {
    fn record(&mut self, entry: &UpdateEntry, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Stale { current } => {
                self.stale += 1;
                tracing::debug!(
                    job_id = %entry.job_id,
                    sequence_id = entry.sequence_id,
                    current,
                    "discarded stale update"
                );
            }
            ApplyOutcome::Terminal => {
                self.terminal += 1;
                tracing::debug!(
                    job_id = %entry.job_id,
                    sequence_id = entry.sequence_id,
                    "discarded update for finished job"
                );
            }
            ApplyOutcome::UnknownJob => self.unknown += 1,
        }
    }
}

/// Applies one entry through the registry gate.
pub fn apply_entry(registry: &mut JobRegistry, entry: &UpdateEntry) -> ApplyOutcome {
    registry.apply(entry.job_id, &entry.update, entry.sequence_id)
}

/// Applies a batch in order; entries for the same job keep their relative order.
pub fn apply_batch(registry: &mut JobRegistry, batch: &BatchUpdate) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for entry in &batch.updates {
        let outcome = apply_entry(registry, entry);
        report.record(entry, outcome);
    }
    report
}

/// Merges a full-state snapshot. Unknown jobs are inserted as-is; known jobs go
/// through the same sequence gate as any other update.
pub fn apply_full_sync(registry: &mut JobRegistry, snapshot: &[Job]) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    for job in snapshot {
        if !registry.contains(&job.id) {
            if registry.insert(job.clone()).is_ok() {
                report.inserted += 1;
            }
            continue;
        }
        let entry = job.as_update();
        let outcome = apply_entry(registry, &entry);
        report.record(&entry, outcome);
    }
    report
}

/// Applies a pushed engine event to a client-side projection.
pub fn apply_event(registry: &mut JobRegistry, event: &EngineEvent) -> ReconcileReport {
    match event {
        EngineEvent::JobsAdded { jobs } => return apply_full_sync(registry, jobs),
        EngineEvent::JobsRemoved { job_ids } => {
            for id in job_ids {
                registry.remove(id);
            }
            return ReconcileReport::default();
        }
        _ => {}
    }
    let mut report = ReconcileReport::default();
    for entry in event.entries() {
        let outcome = apply_entry(registry, &entry);
        report.record(&entry, outcome);
    }
    report
}
