//! Shared harness for engine integration tests.
//!
//! `ShellAdapter` stands in for the real downloader: each job runs a small `sh`
//! script chosen by the URL path, printing the same output grammar the real tool
//! does, so the whole supervisor path (pipes, parsing, signals, file moves) is
//! exercised without network access.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdq_core::adapter::{
    parse_ytdlp_line, CollectionExpander, DownloaderAdapter, LineEvent, OutputStream,
};
use mdq_core::config::EngineSettings;
use mdq_core::job::{Job, JobConfig, JobId, JobStatus};
use mdq_core::paths::StateLayout;
use mdq_core::scheduler::ConcurrencyLimits;
use mdq_core::store::StateDb;
use mdq_core::{EngineEvent, EngineHandle, EngineParts};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(20);

/// Runs a canned script per URL:
/// - `/ok/<name>` writes `<name>.mp4` and exits 0
/// - `/slow/<name>` reports some progress, then sleeps until killed
/// - `/fail/<name>` prints an authentication error and exits 1
/// - `/stubborn/<name>` ignores SIGTERM, writes its pid to `<output_dir>/<name>.pid`
///   and sleeps until killed
/// - `/panic/<name>` panics while building the command
pub struct ShellAdapter;

impl ShellAdapter {
    pub fn script_for(url: &str) -> String {
        let name = url.rsplit('/').next().unwrap_or("clip");
        if url.contains("/slow/") {
            r#"echo '{"status":"downloading","downloaded_bytes":10,"total_bytes":100}'
exec sleep 30"#
                .to_string()
        } else if url.contains("/stubborn/") {
            format!(
                r#"trap '' TERM
echo $$ > "$MDQ_OUT/{name}.pid"
echo '{{"status":"downloading","downloaded_bytes":10,"total_bytes":100}}'
exec sleep 30"#
            )
        } else if url.contains("/fail/") {
            r#"echo "ERROR: Sign in to confirm you're not a bot" >&2
exit 1"#
                .to_string()
        } else {
            format!(
                r#"echo '[download] Destination: {name}.mp4'
sleep 0.3
echo '{{"status":"downloading","downloaded_bytes":512,"total_bytes":1024,"filename":"{name}.mp4"}}'
printf 'media:{name}' > '{name}.mp4'
echo '{{"status":"finished","downloaded_bytes":1024,"total_bytes":1024,"filename":"{name}.mp4"}}'"#
            )
        }
    }
}

impl DownloaderAdapter for ShellAdapter {
    fn command(&self, url: &str, config: &JobConfig, _staging_dir: &Path) -> Command {
        if url.contains("/panic/") {
            panic!("adapter failed for {url}");
        }
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(Self::script_for(url))
            .env("MDQ_OUT", &config.output_dir);
        cmd
    }

    fn parse_line(&self, line: &str, stream: OutputStream) -> Option<LineEvent> {
        parse_ytdlp_line(line, stream)
    }
}

/// `/list/<n>` expands to `n` entries under `/ok/`; anything else to itself.
pub struct StaticExpander;

#[async_trait]
impl CollectionExpander for StaticExpander {
    async fn expand(&self, url: &str) -> mdq_core::Result<Vec<String>> {
        if let Some(n) = url.split("/list/").nth(1) {
            let n: usize = n.parse().unwrap_or(0);
            return Ok((0..n)
                .map(|i| format!("https://media.test/ok/entry-{i}"))
                .collect());
        }
        Ok(vec![url.to_string()])
    }
}

pub fn settings(transfers: usize, busy: usize) -> EngineSettings {
    EngineSettings {
        limits: ConcurrencyLimits::new(transfers, busy).expect("valid limits"),
        batch_interval: Duration::from_millis(50),
        cancel_grace: Duration::from_secs(1),
        persist_debounce: Duration::from_millis(20),
        ..EngineSettings::default()
    }
}

pub struct TestEngine {
    pub handle: EngineHandle,
    pub task: JoinHandle<()>,
    pub db: StateDb,
}

pub async fn start_engine(root: &Path, transfers: usize, busy: usize) -> TestEngine {
    let layout = StateLayout::new(root);
    let db = StateDb::open_at(layout.db_path()).await.expect("open state db");
    let (handle, task) = EngineHandle::spawn(EngineParts {
        settings: settings(transfers, busy),
        layout,
        db: db.clone(),
        adapter: Arc::new(ShellAdapter),
        expander: Arc::new(StaticExpander),
    });
    TestEngine { handle, task, db }
}

impl TestEngine {
    pub async fn stop(self) {
        self.handle.shutdown().await.expect("shutdown");
        self.task.await.expect("engine task");
    }
}

pub async fn wait_for<F>(rx: &mut broadcast::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("engine event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for engine event")
}

pub fn is_completed(id: JobId) -> impl FnMut(&EngineEvent) -> bool {
    move |e| matches!(e, EngineEvent::Completed { job_id, .. } if *job_id == id)
}

pub fn is_cancelled(id: JobId) -> impl FnMut(&EngineEvent) -> bool {
    move |e| matches!(e, EngineEvent::Cancelled { job_id, .. } if *job_id == id)
}

/// Polls `sync_state` until every job is terminal.
pub async fn wait_all_terminal(handle: &EngineHandle) -> Vec<Job> {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            let jobs = handle.sync_state().await.expect("sync_state");
            if jobs.iter().all(|j| j.status.is_terminal()) {
                return jobs;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("timed out waiting for jobs to finish")
}

/// Waits until `path` exists and holds a pid.
pub async fn wait_for_pid(path: &Path) -> i32 {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for pid file")
}

pub fn count(jobs: &[Job], status: JobStatus) -> usize {
    jobs.iter().filter(|j| j.status == status).count()
}

pub fn status_of(jobs: &[Job], id: JobId) -> Option<JobStatus> {
    jobs.iter().find(|j| j.id == id).map(|j| j.status)
}
