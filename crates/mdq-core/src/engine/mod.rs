//! Job orchestration engine.
//!
//! `EngineHandle` is the only way in. Every command travels over a channel to one
//! actor task that owns the registry, the scheduler and the supervisor; state
//! changes come back out as `EngineEvent`s on a broadcast channel.

mod actor;
mod command;
mod submit;

pub use submit::{SubmitRequest, SubmitResponse};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::adapter::{CollectionExpander, DownloaderAdapter};
use crate::config::EngineSettings;
use crate::conflict::ConflictDecision;
use crate::error::{EngineError, Result};
use crate::events::EngineEvent;
use crate::job::{Job, JobId};
use crate::paths::StateLayout;
use crate::pipeline::ProgressPipeline;
use crate::registry::JobRegistry;
use crate::scheduler::{ConcurrencyLimits, Scheduler};
use crate::store::{ResumeDescriptor, ResumeWriter, StateDb};
use crate::supervisor::{ProcessSupervisor, SupervisorSettings};

use actor::Engine;
use command::Command;

const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 1024;

/// Everything the engine needs from the outside world.
pub struct EngineParts {
    pub settings: EngineSettings,
    pub layout: StateLayout,
    pub db: StateDb,
    pub adapter: Arc<dyn DownloaderAdapter>,
    pub expander: Arc<dyn CollectionExpander>,
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<EngineEvent>,
    db: StateDb,
    expander: Arc<dyn CollectionExpander>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("closed", &self.tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl EngineHandle {
    /// Starts the engine actor. The returned task ends after `shutdown` (or once
    /// every handle is dropped).
    pub fn spawn(parts: EngineParts) -> (Self, JoinHandle<()>) {
        let EngineParts {
            settings,
            layout,
            db,
            adapter,
            expander,
        } = parts;

        let (tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let (writer, writer_task) = ResumeWriter::spawn(db.clone(), settings.persist_debounce);
        let (supervisor, reports) =
            ProcessSupervisor::new(adapter, layout.clone(), SupervisorSettings::from(&settings));

        let engine = Engine {
            scheduler: Scheduler::new(settings.limits),
            settings,
            layout,
            db: db.clone(),
            registry: JobRegistry::new(),
            counters: HashMap::new(),
            supervisor,
            pipeline: ProgressPipeline::new(),
            writer,
            writer_task,
            events: events.clone(),
            shutting_down: false,
        };
        let task = tokio::spawn(engine.run(commands, reports));

        (
            Self {
                tx,
                events,
                db,
                expander,
            },
            task,
        )
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::EngineClosed)?;
        rx.await.map_err(|_| EngineError::EngineClosed)
    }

    /// Validates, expands and enqueues. Validation errors return here and create
    /// no job; everything later is reported through events.
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmitResponse> {
        let prepared = submit::prepare(req, self.expander.as_ref(), &self.db).await?;
        self.request(|reply| Command::Submit { prepared, reply })
            .await?
    }

    /// Stops a job. Pending jobs are cancelled at once; running ones after their
    /// process exits. Cancelling a finished job does nothing.
    pub async fn cancel(&self, id: JobId) -> Result<()> {
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    pub async fn resolve_conflict(&self, id: JobId, decision: ConflictDecision) -> Result<()> {
        self.request(|reply| Command::ResolveConflict {
            id,
            decision,
            reply,
        })
        .await?
    }

    /// Number of jobs left unfinished by an earlier session.
    pub async fn list_pending_resumable(&self) -> Result<usize> {
        Ok(self.pending_resumable().await?.len())
    }

    /// Descriptors of jobs left unfinished by an earlier session.
    pub async fn pending_resumable(&self) -> Result<Vec<ResumeDescriptor>> {
        self.request(|reply| Command::PendingResumable { reply })
            .await?
    }

    /// Re-enqueues every interrupted job under its original id and settings.
    pub async fn resume_all(&self) -> Result<Vec<ResumeDescriptor>> {
        self.request(|reply| Command::ResumeAll { reply }).await?
    }

    /// Forgets every interrupted job and removes its partial files.
    pub async fn discard_pending(&self) -> Result<usize> {
        self.request(|reply| Command::DiscardPending { reply })
            .await?
    }

    /// Point-in-time copy of every job, for clients (re)building a projection.
    pub async fn sync_state(&self) -> Result<Vec<Job>> {
        self.request(|reply| Command::SyncState { reply }).await
    }

    /// Re-enqueues a failed or cancelled job as a new job with a new id.
    pub async fn retry(&self, id: JobId) -> Result<JobId> {
        self.request(|reply| Command::Retry { id, reply }).await?
    }

    /// Removes a finished job from the registry.
    pub async fn dismiss(&self, id: JobId) -> Result<()> {
        self.request(|reply| Command::Dismiss { id, reply }).await?
    }

    pub async fn clear_finished(&self) -> Result<usize> {
        self.request(|reply| Command::ClearFinished { reply })
            .await
    }

    pub async fn set_limits(&self, limits: ConcurrencyLimits) -> Result<()> {
        self.request(|reply| Command::SetLimits { limits, reply })
            .await
    }

    /// Stops running jobs (keeping them resumable), flushes state and ends the
    /// actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}
