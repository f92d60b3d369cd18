//! FIFO admission control.

use std::collections::VecDeque;

use crate::job::{JobId, JobStatus};
use crate::registry::JobRegistry;

use super::limits::{ConcurrencyLimits, SlotUsage};

/// Decides which `Pending` jobs move to `Downloading`. Strict FIFO by submission,
/// no priorities. The scheduler only decides; the engine applies the transition and
/// asks the supervisor to spawn.
#[derive(Debug)]
pub struct Scheduler {
    limits: ConcurrencyLimits,
    queue: VecDeque<JobId>,
}

impl Scheduler {
    pub fn new(limits: ConcurrencyLimits) -> Self {
        Self {
            limits,
            queue: VecDeque::new(),
        }
    }

    pub fn limits(&self) -> ConcurrencyLimits {
        self.limits
    }

    /// Changing limits never stops running jobs; a lower limit only blocks
    /// admission until usage drops below it.
    pub fn set_limits(&mut self, limits: ConcurrencyLimits) {
        self.limits = limits;
    }

    /// Drops a job from the waiting queue (cancelled or dismissed before start).
    pub fn remove(&mut self, id: &JobId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|j| j != id);
        self.queue.len() != before
    }

    /// Queues newly submitted jobs and promotes as many as the budgets allow.
    pub fn admit_on_submit(&mut self, new_job_ids: &[JobId], registry: &JobRegistry) -> Vec<JobId> {
        self.queue.extend(new_job_ids.iter().copied());
        self.admit(registry)
    }

    /// Re-runs admission without a specific trigger (limits raised, jobs resumed).
    pub fn admit_waiting(&mut self, registry: &JobRegistry) -> Vec<JobId> {
        self.admit(registry)
    }

    /// Re-runs admission after `freed` left the busy set (or the transfer set).
    pub fn admit_on_release(&mut self, freed: JobId, registry: &JobRegistry) -> Vec<JobId> {
        let promoted = self.admit(registry);
        if !promoted.is_empty() {
            tracing::debug!(freed = %freed, promoted = promoted.len(), "slot released");
        }
        promoted
    }

    fn admit(&mut self, registry: &JobRegistry) -> Vec<JobId> {
        let mut available = self.limits.available(SlotUsage::of(registry));
        let mut promoted = Vec::new();
        while available > 0 {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            // Skip anything that stopped being Pending while queued.
            if registry.get(&id).map(|j| j.status) != Some(JobStatus::Pending) {
                continue;
            }
            promoted.push(id);
            available -= 1;
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobConfig, JobUpdate, Phase};

    fn registry_with(n: usize) -> (JobRegistry, Vec<JobId>) {
        let mut reg = JobRegistry::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = JobId::new();
            reg.insert(Job::pending(id, format!("https://e.com/{i}"), JobConfig::new("/tmp"), i as i64))
                .unwrap();
            ids.push(id);
        }
        (reg, ids)
    }

    fn start(reg: &mut JobRegistry, ids: &[JobId]) {
        for id in ids {
            let seq = reg.get(id).unwrap().sequence_id + 1;
            reg.apply(
                *id,
                &JobUpdate::status(JobStatus::Downloading).with_phase(Phase::Initializing),
                seq,
            );
        }
    }

    #[test]
    fn twenty_five_entries_with_five_slots() {
        let (mut reg, ids) = registry_with(25);
        let mut s = Scheduler::new(ConcurrencyLimits::new(5, 5).unwrap());
        let promoted = s.admit_on_submit(&ids, &reg);
        assert_eq!(promoted, ids[..5].to_vec());
        start(&mut reg, &promoted);
        assert_eq!(s.queue.len(), 20);

        // Nothing else fits until a slot frees.
        assert!(s.admit_on_release(ids[0], &reg).is_empty());
    }

    #[test]
    fn release_promotes_one_per_freed_slot_in_fifo_order() {
        let (mut reg, ids) = registry_with(4);
        let mut s = Scheduler::new(ConcurrencyLimits::new(2, 2).unwrap());
        let first = s.admit_on_submit(&ids, &reg);
        start(&mut reg, &first);

        let seq = reg.get(&ids[0]).unwrap().sequence_id + 1;
        reg.apply(ids[0], &JobUpdate::status(JobStatus::Cancelled), seq);
        let next = s.admit_on_release(ids[0], &reg);
        assert_eq!(next, vec![ids[2]]);
    }

    #[test]
    fn post_processing_frees_transfer_slot_but_not_busy_slot() {
        let (mut reg, ids) = registry_with(4);
        let mut s = Scheduler::new(ConcurrencyLimits::new(1, 2).unwrap());
        let first = s.admit_on_submit(&ids, &reg);
        assert_eq!(first, vec![ids[0]]);
        start(&mut reg, &first);

        let seq = reg.get(&ids[0]).unwrap().sequence_id + 1;
        reg.apply(
            ids[0],
            &JobUpdate::default().with_phase(Phase::Merging),
            seq,
        );
        let second = s.admit_on_release(ids[0], &reg);
        assert_eq!(second, vec![ids[1]]);
        start(&mut reg, &second);

        // Busy budget (2) is now full even though job 0 is not transferring.
        assert!(s.admit_on_release(ids[0], &reg).is_empty());
    }

    #[test]
    fn cancelled_pending_jobs_are_skipped() {
        let (mut reg, ids) = registry_with(3);
        let mut s = Scheduler::new(ConcurrencyLimits::new(1, 1).unwrap());
        let first = s.admit_on_submit(&ids, &reg);
        start(&mut reg, &first);

        reg.apply(ids[1], &JobUpdate::status(JobStatus::Cancelled), 1);
        let seq = reg.get(&ids[0]).unwrap().sequence_id + 1;
        reg.apply(ids[0], &JobUpdate::status(JobStatus::Cancelled), seq);
        assert_eq!(s.admit_on_release(ids[0], &reg), vec![ids[2]]);
    }

    #[test]
    fn lowering_limit_blocks_admission_only() {
        let (mut reg, ids) = registry_with(5);
        let mut s = Scheduler::new(ConcurrencyLimits::new(3, 3).unwrap());
        let first = s.admit_on_submit(&ids, &reg);
        start(&mut reg, &first);
        s.set_limits(ConcurrencyLimits::new(1, 1).unwrap());

        let seq = reg.get(&ids[0]).unwrap().sequence_id + 1;
        reg.apply(ids[0], &JobUpdate::status(JobStatus::Completed), seq);
        // Two still busy against a limit of one: no admission.
        assert!(s.admit_on_release(ids[0], &reg).is_empty());
        assert_eq!(SlotUsage::of(&reg).busy, 2);
    }
}
