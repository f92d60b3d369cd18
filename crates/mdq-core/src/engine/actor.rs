//! The engine actor: single owner of the authoritative registry.
//!
//! Commands, supervisor reports and batch ticks are handled one at a time, so every
//! registry mutation and every admission decision is serialized here.

use std::collections::{HashMap, HashSet};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::EngineSettings;
use crate::conflict::ConflictDecision;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::job::{
    BatchUpdate, ErrorDetail, Job, JobId, JobStatus, JobUpdate, Phase, SequenceCounter,
    UpdateEntry,
};
use crate::paths::StateLayout;
use crate::pipeline::ProgressPipeline;
use crate::reconcile;
use crate::registry::{ApplyOutcome, JobRegistry};
use crate::scheduler::{ConcurrencyLimits, Scheduler};
use crate::store::{unix_timestamp_ms, ResumeDescriptor, ResumeWriter, StateDb};
use crate::supervisor::{ProcessSupervisor, SupervisorEvent};

use super::command::{Command, PreparedSubmit};
use super::submit::{dedup_key, SubmitResponse};

/// Extra time given to job tasks on shutdown beyond the cancel grace period.
const SHUTDOWN_MARGIN: std::time::Duration = std::time::Duration::from_secs(2);

pub(super) struct Engine {
    pub settings: EngineSettings,
    pub layout: StateLayout,
    pub db: StateDb,
    pub registry: JobRegistry,
    pub counters: HashMap<JobId, SequenceCounter>,
    pub scheduler: Scheduler,
    pub supervisor: ProcessSupervisor,
    pub pipeline: ProgressPipeline,
    pub writer: ResumeWriter,
    pub writer_task: JoinHandle<()>,
    pub events: broadcast::Sender<EngineEvent>,
    pub shutting_down: bool,
}

impl Engine {
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut reports: mpsc::UnboundedReceiver<SupervisorEvent>,
    ) {
        let mut tick = interval(self.settings.batch_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown(&mut reports).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        self.shutdown(&mut reports).await;
                        break;
                    }
                },
                Some(report) = reports.recv() => self.on_report(report),
                _ = tick.tick() => {
                    if let Some(batch) = self.pipeline.flush() {
                        if self.commit(batch) {
                            self.admit_waiting();
                        }
                    }
                }
            }
        }

        let Engine {
            writer,
            writer_task,
            ..
        } = self;
        drop(writer);
        let _ = writer_task.await;
        tracing::info!("engine stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { prepared, reply } => {
                let _ = reply.send(self.submit(prepared));
            }
            Command::Cancel { id, reply } => {
                let _ = reply.send(self.cancel(id));
            }
            Command::ResolveConflict {
                id,
                decision,
                reply,
            } => {
                let _ = reply.send(self.resolve_conflict(id, decision));
            }
            Command::PendingResumable { reply } => {
                let _ = reply.send(self.orphaned_descriptors().await);
            }
            Command::ResumeAll { reply } => {
                let _ = reply.send(self.resume_all().await);
            }
            Command::DiscardPending { reply } => {
                let _ = reply.send(self.discard_pending().await);
            }
            Command::SyncState { reply } => {
                if let Some(batch) = self.pipeline.flush() {
                    if self.commit(batch) {
                        self.admit_waiting();
                    }
                }
                let _ = reply.send(self.registry.snapshot_all());
            }
            Command::Retry { id, reply } => {
                let _ = reply.send(self.retry(id));
            }
            Command::Dismiss { id, reply } => {
                let _ = reply.send(self.dismiss(id));
            }
            Command::ClearFinished { reply } => {
                let _ = reply.send(self.clear_finished());
            }
            Command::SetLimits { limits, reply } => {
                self.set_limits(limits);
                let _ = reply.send(());
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn submit(&mut self, prepared: PreparedSubmit) -> Result<SubmitResponse> {
        let PreparedSubmit {
            urls,
            config,
            bypass_history,
            mut skipped_urls,
            total_found,
        } = prepared;

        let mut seen: HashSet<String> = if bypass_history {
            HashSet::new()
        } else {
            self.registry
                .jobs()
                .filter(|j| !matches!(j.status, JobStatus::Error | JobStatus::Cancelled))
                .map(|j| dedup_key(&j.url))
                .collect()
        };

        let now = unix_timestamp_ms();
        let mut jobs = Vec::new();
        for url in urls {
            if !bypass_history && !seen.insert(dedup_key(&url)) {
                tracing::debug!(%url, "already queued, skipping");
                skipped_urls.push(url);
                continue;
            }
            jobs.push(Job::pending(JobId::new(), url, config.clone(), now));
        }

        let job_ids = self.add_jobs(jobs)?;
        tracing::info!(
            accepted = job_ids.len(),
            skipped = skipped_urls.len(),
            total_found,
            "submission accepted"
        );
        Ok(SubmitResponse {
            job_ids,
            skipped_count: skipped_urls.len(),
            total_found,
            skipped_urls,
        })
    }

    /// Registers new `Pending` jobs, announces them and runs admission.
    fn add_jobs(&mut self, jobs: Vec<Job>) -> Result<Vec<JobId>> {
        let mut added = Vec::with_capacity(jobs.len());
        for job in jobs {
            self.registry.insert(job.clone())?;
            self.counters
                .insert(job.id, SequenceCounter::starting_after(job.sequence_id));
            self.writer.upsert(ResumeDescriptor::of(&job));
            added.push(job);
        }
        if added.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<JobId> = added.iter().map(|j| j.id).collect();
        let _ = self.events.send(EngineEvent::JobsAdded { jobs: added });

        let promoted = self.scheduler.admit_on_submit(&ids, &self.registry);
        self.start(promoted);
        Ok(ids)
    }

    fn cancel(&mut self, id: JobId) -> Result<()> {
        let status = self
            .registry
            .get(&id)
            .map(|j| j.status)
            .ok_or(EngineError::UnknownJob(id))?;
        match status {
            s if s.is_terminal() => Ok(()),
            JobStatus::Pending => {
                self.scheduler.remove(&id);
                self.transition(id, JobUpdate::status(JobStatus::Cancelled));
                Ok(())
            }
            _ => {
                // A live task that no longer listens has already sent its final
                // update; that update settles the job.
                if !self.supervisor.cancel(&id) && !self.supervisor.is_live(&id) {
                    self.orphaned(id);
                }
                Ok(())
            }
        }
    }

    fn resolve_conflict(&mut self, id: JobId, decision: ConflictDecision) -> Result<()> {
        let status = self
            .registry
            .get(&id)
            .map(|j| j.status)
            .ok_or(EngineError::UnknownJob(id))?;
        if status != JobStatus::FileConflict {
            return Err(EngineError::validation(format!(
                "job {} is {}, not waiting for a conflict decision",
                id, status
            )));
        }
        tracing::info!(job_id = %id, %decision, "conflict resolved");
        if !self.supervisor.resolve(&id, decision) && !self.supervisor.is_live(&id) {
            self.orphaned(id);
        }
        Ok(())
    }

    /// A busy job without a live task can never finish; close it as cancelled.
    fn orphaned(&mut self, id: JobId) {
        tracing::warn!(job_id = %id, "no running task for busy job, marking cancelled");
        if self.transition(id, JobUpdate::status(JobStatus::Cancelled)) {
            self.admit_after(id);
        }
    }

    /// Stored descriptors of jobs this engine does not hold, i.e. left over from
    /// an earlier session.
    async fn orphaned_descriptors(&self) -> Result<Vec<ResumeDescriptor>> {
        self.writer.flush().await;
        let stored = self.db.load_pending().await?;
        Ok(stored
            .into_iter()
            .filter(|d| !self.registry.contains(&d.job_id))
            .collect())
    }

    async fn resume_all(&mut self) -> Result<Vec<ResumeDescriptor>> {
        let descriptors = self.orphaned_descriptors().await?;
        let jobs = descriptors.iter().cloned().map(ResumeDescriptor::into_job).collect();
        let ids = self.add_jobs(jobs)?;
        tracing::info!(resumed = ids.len(), "resumed interrupted jobs");
        Ok(descriptors)
    }

    async fn discard_pending(&mut self) -> Result<usize> {
        let descriptors = self.orphaned_descriptors().await?;
        for d in &descriptors {
            self.writer.forget(d.job_id);
            let staging = self.layout.staging_dir(&d.job_id);
            if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(job_id = %d.job_id, "could not remove {}: {}", staging.display(), e);
                }
            }
        }
        self.writer.flush().await;
        tracing::info!(discarded = descriptors.len(), "discarded interrupted jobs");
        Ok(descriptors.len())
    }

    fn retry(&mut self, id: JobId) -> Result<JobId> {
        let job = self.registry.get(&id).ok_or(EngineError::UnknownJob(id))?;
        if !matches!(job.status, JobStatus::Error | JobStatus::Cancelled) {
            return Err(EngineError::validation(format!(
                "job {} is {}; only failed or cancelled jobs can be retried",
                id, job.status
            )));
        }
        let fresh = Job::pending(
            JobId::new(),
            job.url.clone(),
            job.config.clone(),
            unix_timestamp_ms(),
        );
        let new_id = fresh.id;
        self.add_jobs(vec![fresh])?;
        tracing::info!(job_id = %id, new_job_id = %new_id, "job retried");
        Ok(new_id)
    }

    fn dismiss(&mut self, id: JobId) -> Result<()> {
        let job = self.registry.get(&id).ok_or(EngineError::UnknownJob(id))?;
        if !job.status.is_terminal() {
            return Err(EngineError::validation(format!(
                "job {} is {}; cancel it before dismissing",
                id, job.status
            )));
        }
        self.forget_jobs(vec![id]);
        Ok(())
    }

    fn clear_finished(&mut self) -> usize {
        let finished: Vec<JobId> = self
            .registry
            .jobs()
            .filter(|j| j.status.is_terminal())
            .map(|j| j.id)
            .collect();
        let n = finished.len();
        self.forget_jobs(finished);
        n
    }

    fn forget_jobs(&mut self, ids: Vec<JobId>) {
        if ids.is_empty() {
            return;
        }
        for id in &ids {
            self.registry.remove(id);
            self.counters.remove(id);
        }
        let _ = self.events.send(EngineEvent::JobsRemoved { job_ids: ids });
    }

    fn set_limits(&mut self, limits: ConcurrencyLimits) {
        tracing::info!(
            transfers = limits.max_concurrent_transfers,
            busy = limits.max_total_busy,
            "concurrency limits changed"
        );
        self.scheduler.set_limits(limits);
        self.admit_waiting();
    }

    fn on_report(&mut self, report: SupervisorEvent) {
        match report {
            SupervisorEvent::Update(entry) => {
                let id = entry.job_id;
                if let Some(batch) = self.pipeline.push(entry) {
                    if self.commit(batch) {
                        self.admit_after(id);
                    }
                }
            }
            SupervisorEvent::Exited(id) => {
                self.supervisor.reap(&id);
                let busy = self
                    .registry
                    .get(&id)
                    .is_some_and(|j| !j.status.is_terminal());
                if busy && !self.shutting_down {
                    tracing::error!(job_id = %id, "job task exited without a final state");
                    let update = JobUpdate::failed(ErrorDetail {
                        message: "internal error: job stopped without reporting a result"
                            .to_string(),
                        exit_code: None,
                        stderr_tail: String::new(),
                        log_ref: Some(self.layout.log_path(&id)),
                    });
                    if self.transition(id, update) {
                        self.admit_after(id);
                    }
                }
            }
        }
    }

    /// Engine-originated transition, stamped from the job's own counter and
    /// published like any supervisor report. Returns whether slot usage changed.
    fn transition(&mut self, id: JobId, update: JobUpdate) -> bool {
        let Some(seq) = self.counters.get(&id) else {
            return false;
        };
        let entry = UpdateEntry {
            job_id: id,
            sequence_id: seq.next(),
            update,
        };
        match self.pipeline.push(entry) {
            Some(batch) => self.commit(batch),
            None => false,
        }
    }

    /// Merges a batch into the registry, publishes what applied and runs the
    /// side effects of each status change. Returns whether any job's slot usage
    /// changed.
    fn commit(&mut self, batch: BatchUpdate) -> bool {
        let mut applied = Vec::with_capacity(batch.updates.len());
        let mut transitions = Vec::new();
        let mut usage_changed = false;

        for entry in batch.updates {
            let before = self.slot_state(&entry.job_id);
            match reconcile::apply_entry(&mut self.registry, &entry) {
                ApplyOutcome::Applied => {}
                ApplyOutcome::UnknownJob => {
                    tracing::debug!(job_id = %entry.job_id, "update for dismissed job dropped");
                    continue;
                }
                outcome => {
                    tracing::debug!(
                        job_id = %entry.job_id,
                        sequence_id = entry.sequence_id,
                        ?outcome,
                        "update discarded"
                    );
                    continue;
                }
            }
            if self.slot_state(&entry.job_id) != before {
                usage_changed = true;
            }
            if entry.update.status.is_some() {
                self.persist_transition(&entry);
                transitions.extend(EngineEvent::for_transition(&entry));
            }
            applied.push(entry);
        }

        if !applied.is_empty() {
            let _ = self
                .events
                .send(EngineEvent::ProgressBatch(BatchUpdate { updates: applied }));
        }
        for event in transitions {
            let _ = self.events.send(event);
        }
        usage_changed
    }

    fn slot_state(&self, id: &JobId) -> Option<(JobStatus, bool)> {
        self.registry
            .get(id)
            .map(|j| (j.status, j.is_transferring()))
    }

    fn persist_transition(&self, entry: &UpdateEntry) {
        let Some(job) = self.registry.get(&entry.job_id) else {
            return;
        };
        match job.status {
            JobStatus::Completed => {
                tracing::info!(job_id = %job.id, url = %job.url, "job completed");
                self.writer.record_completed(job.url.clone());
                self.writer.forget(job.id);
            }
            JobStatus::Error => {
                tracing::warn!(
                    job_id = %job.id,
                    error = job.error.as_ref().map(|e| e.message.as_str()).unwrap_or(""),
                    "job failed"
                );
                self.writer.forget(job.id);
            }
            JobStatus::Cancelled => {
                tracing::info!(job_id = %job.id, "job cancelled");
                // Jobs stopped by shutdown stay resumable.
                if !self.shutting_down {
                    self.writer.forget(job.id);
                }
            }
            JobStatus::Pending | JobStatus::Downloading | JobStatus::FileConflict => {
                self.writer.upsert(ResumeDescriptor::of(job));
            }
        }
    }

    fn admit_after(&mut self, freed: JobId) {
        if self.shutting_down {
            return;
        }
        let promoted = self.scheduler.admit_on_release(freed, &self.registry);
        self.start(promoted);
    }

    fn admit_waiting(&mut self) {
        if self.shutting_down {
            return;
        }
        let promoted = self.scheduler.admit_waiting(&self.registry);
        self.start(promoted);
    }

    /// Moves admitted jobs to `Downloading` and hands them to the supervisor.
    fn start(&mut self, promoted: Vec<JobId>) {
        let mut freed = false;
        for id in promoted {
            self.transition(
                id,
                JobUpdate::status(JobStatus::Downloading).with_phase(Phase::Initializing),
            );
            let (Some(job), Some(seq)) = (self.registry.get(&id), self.counters.get(&id)) else {
                continue;
            };
            if job.status != JobStatus::Downloading {
                continue;
            }
            if let Err(e) = self.supervisor.spawn(job, seq.clone()) {
                tracing::error!(job_id = %id, "could not start job: {}", e);
                freed |= self.transition(
                    id,
                    JobUpdate::failed(ErrorDetail {
                        message: e.to_string(),
                        exit_code: None,
                        stderr_tail: String::new(),
                        log_ref: None,
                    }),
                );
            }
        }
        if freed {
            self.admit_waiting();
        }
    }

    /// Stops every running job, keeps their descriptors and flushes all state.
    async fn shutdown(&mut self, reports: &mut mpsc::UnboundedReceiver<SupervisorEvent>) {
        self.shutting_down = true;
        let running = self.supervisor.live_count();
        tracing::info!(running, "engine shutting down");
        self.supervisor
            .shutdown_all(self.settings.cancel_grace + SHUTDOWN_MARGIN)
            .await;
        while let Ok(report) = reports.try_recv() {
            self.on_report(report);
        }
        if let Some(batch) = self.pipeline.flush() {
            self.commit(batch);
        }
        self.writer.flush().await;
    }
}
