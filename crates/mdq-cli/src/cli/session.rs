//! Foreground session: renders engine events and answers file conflicts until
//! every job known to the engine has finished (or the user hits Ctrl-C).
//!
//! The terminal view is a projection rebuilt purely from pushed events and
//! `sync_state`, merged with the same sequence gate the engine uses.

use anyhow::{bail, Result};
use mdq_core::conflict::ConflictDecision;
use mdq_core::job::{Job, JobId, JobStatus};
use mdq_core::reconcile;
use mdq_core::registry::JobRegistry;
use mdq_core::{EngineEvent, EngineHandle};
use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;

use super::ConflictPolicy;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Still pending or busy (only non-zero after an interrupt).
    pub unfinished: usize,
}

impl Summary {
    pub fn of(jobs: &JobRegistry) -> Self {
        let mut s = Summary::default();
        for job in jobs.jobs() {
            match job.status {
                JobStatus::Completed => s.completed += 1,
                JobStatus::Error => s.failed += 1,
                JobStatus::Cancelled => s.cancelled += 1,
                _ => s.unfinished += 1,
            }
        }
        s
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Finished(Summary),
    Interrupted(Summary),
}

pub struct Session {
    engine: EngineHandle,
    events: broadcast::Receiver<EngineEvent>,
    view: JobRegistry,
    policy: ConflictPolicy,
    /// Conflicts already answered, keyed by the transition that raised them.
    answered: HashSet<(JobId, u64)>,
    stdin: Lines<BufReader<Stdin>>,
}

impl Session {
    /// `events` must be subscribed before any job is submitted, so nothing is missed.
    pub fn new(
        engine: EngineHandle,
        events: broadcast::Receiver<EngineEvent>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            engine,
            events,
            view: JobRegistry::new(),
            policy,
            answered: HashSet::new(),
            stdin: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    pub async fn run(mut self) -> Result<SessionEnd> {
        self.resync().await?;
        let mut tick = tokio::time::interval(PROGRESS_INTERVAL);
        tick.tick().await;

        loop {
            self.answer_conflicts().await?;
            if self.view.jobs().all(|j| j.status.is_terminal()) {
                return Ok(SessionEnd::Finished(Summary::of(&self.view)));
            }
            tokio::select! {
                received = self.events.recv() => match received {
                    Ok(event) => {
                        reconcile::apply_event(&mut self.view, &event);
                        announce(&event, &self.view);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(missed = n, "event stream lagged, resyncing");
                        self.resync().await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => bail!("engine stopped unexpectedly"),
                },
                _ = tick.tick() => render_progress(&self.view),
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    return Ok(SessionEnd::Interrupted(Summary::of(&self.view)));
                }
            }
        }
    }

    async fn resync(&mut self) -> Result<()> {
        let snapshot = self.engine.sync_state().await?;
        reconcile::apply_full_sync(&mut self.view, &snapshot);
        Ok(())
    }

    async fn answer_conflicts(&mut self) -> Result<()> {
        let waiting: Vec<(JobId, u64, String)> = self
            .view
            .jobs()
            .filter(|j| j.status == JobStatus::FileConflict)
            .filter(|j| !self.answered.contains(&(j.id, j.sequence_id)))
            .map(|j| (j.id, j.sequence_id, conflict_target(j)))
            .collect();

        for (id, seq, target) in waiting {
            let decision = match self.policy {
                ConflictPolicy::Overwrite => ConflictDecision::Overwrite,
                ConflictPolicy::Discard => ConflictDecision::Discard,
                ConflictPolicy::Ask => self.ask(id, &target).await?,
            };
            self.answered.insert((id, seq));
            if let Err(e) = self.engine.resolve_conflict(id, decision).await {
                // The job may have been cancelled meanwhile; the next event settles it.
                tracing::debug!(job_id = %id, "conflict answer not applied: {}", e);
            }
        }
        Ok(())
    }

    async fn ask(&mut self, id: JobId, target: &str) -> Result<ConflictDecision> {
        print!("{} already exists ({}). Overwrite? [y/N] ", target, short_id(&id));
        std::io::stdout().flush()?;
        let answer = self.stdin.next_line().await?.unwrap_or_default();
        Ok(parse_answer(&answer))
    }
}

/// Anything but an explicit yes keeps the existing file.
pub fn parse_answer(answer: &str) -> ConflictDecision {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "o" | "overwrite" => ConflictDecision::Overwrite,
        _ => ConflictDecision::Discard,
    }
}

pub fn short_id(id: &JobId) -> String {
    id.to_string().chars().take(8).collect()
}

fn conflict_target(job: &Job) -> String {
    job.conflict_target
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "output file".to_string())
}

fn announce(event: &EngineEvent, view: &JobRegistry) {
    match event {
        EngineEvent::JobsAdded { jobs } => {
            for job in jobs {
                println!("queued    {}  {}", job.id, job.url);
            }
        }
        EngineEvent::Completed {
            job_id,
            output_path,
            ..
        } => println!("done      {}  {}", short_id(job_id), output_path.display()),
        EngineEvent::Error {
            job_id,
            message,
            log_ref,
            ..
        } => {
            println!("failed    {}  {}", short_id(job_id), message);
            if let Some(log) = log_ref {
                println!("          log: {}", log.display());
            }
        }
        EngineEvent::Cancelled { job_id, .. } => {
            let url = view.get(job_id).map(|j| j.url.as_str()).unwrap_or("");
            println!("cancelled {}  {}", short_id(job_id), url);
        }
        EngineEvent::ProgressBatch(_)
        | EngineEvent::FileConflict { .. }
        | EngineEvent::JobsRemoved { .. } => {}
    }
}

/// One line per transferring job plus a queue summary.
pub fn progress_lines(view: &JobRegistry) -> Vec<String> {
    let mut lines = Vec::new();
    let mut waiting = 0;
    for job in view.jobs() {
        match job.status {
            JobStatus::Pending => waiting += 1,
            JobStatus::Downloading => {
                let stage = job
                    .display
                    .phase
                    .map(|p| p.label())
                    .unwrap_or("Starting");
                let name = job.display.filename.as_deref().unwrap_or(&job.url);
                lines.push(format!(
                    "  {}  {:>5.1}%  {:>11}  ETA {:>8}  {:<13} {}",
                    short_id(&job.id),
                    job.progress,
                    job.display.speed.as_deref().unwrap_or("-"),
                    job.display.eta.as_deref().unwrap_or("-"),
                    stage,
                    name
                ));
            }
            _ => {}
        }
    }
    if !lines.is_empty() && waiting > 0 {
        lines.push(format!("  ({waiting} waiting)"));
    }
    lines
}

fn render_progress(view: &JobRegistry) {
    for line in progress_lines(view) {
        println!("{line}");
    }
}

/// Prints the end-of-session summary.
pub fn report(end: SessionEnd) {
    match end {
        SessionEnd::Finished(s) => println!(
            "Finished: {} completed, {} failed, {} cancelled",
            s.completed, s.failed, s.cancelled
        ),
        SessionEnd::Interrupted(s) => {
            println!(
                "Interrupted: {} completed, {} failed, {} cancelled",
                s.completed, s.failed, s.cancelled
            );
            if s.unfinished > 0 {
                println!(
                    "{} unfinished job(s) kept; continue with `mdq resume` or drop with `mdq discard`",
                    s.unfinished
                );
            }
        }
    }
}
