//! Messages from `EngineHandle` to the engine actor.

use tokio::sync::oneshot;

use crate::conflict::ConflictDecision;
use crate::error::Result;
use crate::job::{Job, JobConfig, JobId};
use crate::scheduler::ConcurrencyLimits;
use crate::store::ResumeDescriptor;

use super::submit::SubmitResponse;

pub(super) type Reply<T> = oneshot::Sender<T>;

/// URLs that survived validation, expansion and the history check.
#[derive(Debug)]
pub(super) struct PreparedSubmit {
    pub urls: Vec<String>,
    pub config: JobConfig,
    pub bypass_history: bool,
    pub skipped_urls: Vec<String>,
    pub total_found: usize,
}

#[derive(Debug)]
pub(super) enum Command {
    Submit {
        prepared: PreparedSubmit,
        reply: Reply<Result<SubmitResponse>>,
    },
    Cancel {
        id: JobId,
        reply: Reply<Result<()>>,
    },
    ResolveConflict {
        id: JobId,
        decision: ConflictDecision,
        reply: Reply<Result<()>>,
    },
    PendingResumable {
        reply: Reply<Result<Vec<ResumeDescriptor>>>,
    },
    ResumeAll {
        reply: Reply<Result<Vec<ResumeDescriptor>>>,
    },
    DiscardPending {
        reply: Reply<Result<usize>>,
    },
    SyncState {
        reply: Reply<Vec<Job>>,
    },
    Retry {
        id: JobId,
        reply: Reply<Result<JobId>>,
    },
    Dismiss {
        id: JobId,
        reply: Reply<Result<()>>,
    },
    ClearFinished {
        reply: Reply<usize>,
    },
    SetLimits {
        limits: ConcurrencyLimits,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}
