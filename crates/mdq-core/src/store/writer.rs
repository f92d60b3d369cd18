//! Background writer for the state database.
//!
//! Resume writes arrive on every status change; the writer keeps only the latest op
//! per job and flushes on a fixed interval, on explicit `flush`, and when every
//! handle is dropped. Failures are logged and never reach the engine.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::db::StateDb;
use super::types::ResumeDescriptor;
use crate::job::JobId;

#[derive(Debug)]
enum ResumeOp {
    Upsert(ResumeDescriptor),
    Forget,
}

#[derive(Debug)]
enum WriterMsg {
    Upsert(ResumeDescriptor),
    Forget(JobId),
    History(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to the writer task. Cloneable; the task exits after the last handle drops.
#[derive(Debug, Clone)]
pub struct ResumeWriter {
    tx: mpsc::UnboundedSender<WriterMsg>,
}

impl ResumeWriter {
    pub fn spawn(db: StateDb, debounce: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer_loop(rx, db, debounce));
        (ResumeWriter { tx }, task)
    }

    pub fn upsert(&self, descriptor: ResumeDescriptor) {
        let _ = self.tx.send(WriterMsg::Upsert(descriptor));
    }

    pub fn forget(&self, id: JobId) {
        let _ = self.tx.send(WriterMsg::Forget(id));
    }

    /// Queues a history record; written with the next flush.
    pub fn record_completed(&self, url: impl Into<String>) {
        let _ = self.tx.send(WriterMsg::History(url.into()));
    }

    /// Writes everything queued so far. Returns once the write finished (or the
    /// writer is gone).
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriterMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[derive(Default)]
struct Pending {
    ops: HashMap<JobId, ResumeOp>,
    /// First-touch order, so rows keep submission order on insert.
    order: Vec<JobId>,
    history: Vec<String>,
}

impl Pending {
    fn put(&mut self, id: JobId, op: ResumeOp) {
        if self.ops.insert(id, op).is_none() {
            self.order.push(id);
        }
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty() && self.history.is_empty()
    }

    async fn write(&mut self, db: &StateDb) {
        for url in self.history.drain(..) {
            if let Err(e) = db.record_completed(&url).await {
                tracing::warn!(url = %url, "history write failed: {e}");
            }
        }
        for id in std::mem::take(&mut self.order) {
            let Some(op) = self.ops.remove(&id) else {
                continue;
            };
            let result = match &op {
                ResumeOp::Upsert(d) => db.persist_resume(d).await,
                ResumeOp::Forget => db.forget_resume(&id).await,
            };
            if let Err(e) = result {
                tracing::warn!(job_id = %id, "resume store write failed: {e}");
            }
        }
    }
}

async fn run_writer_loop(mut rx: mpsc::UnboundedReceiver<WriterMsg>, db: StateDb, debounce: Duration) {
    let mut pending = Pending::default();
    let mut tick = tokio::time::interval(debounce);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(WriterMsg::Upsert(d)) => pending.put(d.job_id, ResumeOp::Upsert(d)),
                Some(WriterMsg::Forget(id)) => pending.put(id, ResumeOp::Forget),
                Some(WriterMsg::History(url)) => pending.history.push(url),
                Some(WriterMsg::Flush(done)) => {
                    pending.write(&db).await;
                    let _ = done.send(());
                }
                None => break,
            },
            _ = tick.tick() => {
                if !pending.is_empty() {
                    pending.write(&db).await;
                }
            }
        }
    }

    pending.write(&db).await;
    tracing::debug!("resume writer stopped");
}
