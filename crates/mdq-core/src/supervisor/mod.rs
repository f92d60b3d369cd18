//! Process supervisor: one task per running job, owning its child process.
//!
//! The supervisor never touches the registry. Each job task reports through an
//! unbounded event channel, stamping every update with the job's shared sequence
//! counter, and finishes with exactly one terminal update followed by `Exited`.
//! A panic inside a job task is caught at the task boundary and reported as that
//! job's `Error`.

mod capture;
mod finalize;
mod run;
mod signal;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};

use crate::adapter::DownloaderAdapter;
use crate::config::EngineSettings;
use crate::conflict::ConflictDecision;
use crate::error::{EngineError, Result};
use crate::job::{ErrorDetail, Job, JobId, JobUpdate, SequenceCounter, UpdateEntry};
use crate::paths::StateLayout;

use run::JobRun;

/// What job tasks report to the engine.
#[derive(Debug)]
pub enum SupervisorEvent {
    Update(UpdateEntry),
    /// The job task is gone; its slot bookkeeping can be dropped.
    Exited(JobId),
}

#[derive(Debug)]
pub(crate) enum ControlMsg {
    Cancel,
    Resolve(ConflictDecision),
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub cancel_grace: Duration,
    pub stderr_tail_lines: usize,
    pub log_tail_lines: usize,
}

impl From<&EngineSettings> for SupervisorSettings {
    fn from(s: &EngineSettings) -> Self {
        Self {
            cancel_grace: s.cancel_grace,
            stderr_tail_lines: s.stderr_tail_lines,
            log_tail_lines: s.log_tail_lines,
        }
    }
}

struct LiveJob {
    control: mpsc::UnboundedSender<ControlMsg>,
    task: JoinHandle<()>,
    inner: AbortHandle,
}

pub struct ProcessSupervisor {
    adapter: Arc<dyn DownloaderAdapter>,
    layout: StateLayout,
    settings: SupervisorSettings,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    live: HashMap<JobId, LiveJob>,
}

impl ProcessSupervisor {
    pub fn new(
        adapter: Arc<dyn DownloaderAdapter>,
        layout: StateLayout,
        settings: SupervisorSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                adapter,
                layout,
                settings,
                events,
                live: HashMap::new(),
            },
            rx,
        )
    }

    pub fn is_live(&self, id: &JobId) -> bool {
        self.live.contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Starts the tool for `job`. At most one child runs per job.
    pub fn spawn(&mut self, job: &Job, seq: SequenceCounter) -> Result<()> {
        if self.live.contains_key(&job.id) {
            return Err(EngineError::JobAlreadyExists(job.id));
        }
        let job_id = job.id;
        let (control, control_rx) = mpsc::unbounded_channel();
        let run = JobRun {
            job_id,
            url: job.url.clone(),
            config: job.config.clone(),
            seq: seq.clone(),
            staging: self.layout.staging_dir(&job_id),
            log_path: self.layout.log_path(&job_id),
            adapter: Arc::clone(&self.adapter),
            settings: self.settings.clone(),
            events: self.events.clone(),
        };

        let inner = tokio::spawn(run.execute(control_rx));
        let inner_abort = inner.abort_handle();
        let events = self.events.clone();
        let log_ref = Some(self.layout.log_path(&job_id));
        let task = tokio::spawn(async move {
            if let Err(e) = inner.await {
                if e.is_panic() {
                    tracing::error!(job_id = %job_id, "job supervisor panicked");
                    let entry = UpdateEntry {
                        job_id,
                        sequence_id: seq.next(),
                        update: JobUpdate::failed(ErrorDetail {
                            message: "internal error: job supervisor panicked".to_string(),
                            exit_code: None,
                            stderr_tail: String::new(),
                            log_ref,
                        }),
                    };
                    let _ = events.send(SupervisorEvent::Update(entry));
                }
            }
            let _ = events.send(SupervisorEvent::Exited(job_id));
        });

        tracing::debug!(job_id = %job_id, "job task started");
        self.live.insert(
            job_id,
            LiveJob {
                control,
                task,
                inner: inner_abort,
            },
        );
        Ok(())
    }

    /// Asks a running job to stop. Returns false if no task runs for it.
    pub fn cancel(&self, id: &JobId) -> bool {
        self.send(id, ControlMsg::Cancel)
    }

    /// Delivers a conflict decision. Returns false if no task runs for it.
    pub fn resolve(&self, id: &JobId, decision: ConflictDecision) -> bool {
        self.send(id, ControlMsg::Resolve(decision))
    }

    fn send(&self, id: &JobId, msg: ControlMsg) -> bool {
        self.live
            .get(id)
            .is_some_and(|job| job.control.send(msg).is_ok())
    }

    /// Drops bookkeeping for a job whose task has exited.
    pub fn reap(&mut self, id: &JobId) {
        self.live.remove(id);
    }

    /// Cancels every running job and waits for their tasks, aborting any still
    /// alive after `timeout`.
    pub async fn shutdown_all(&mut self, timeout: Duration) {
        for job in self.live.values() {
            let _ = job.control.send(ControlMsg::Cancel);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        for (id, job) in self.live.drain() {
            if tokio::time::timeout_at(deadline, job.task).await.is_err() {
                tracing::warn!(job_id = %id, "job task did not stop in time, aborting");
                job.inner.abort();
            }
        }
    }
}
