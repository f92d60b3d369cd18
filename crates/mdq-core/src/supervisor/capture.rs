//! Captured tool output: bounded in-memory tails plus the full per-job log file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::adapter::OutputStream;

/// Lines longer than this are dropped (progress bars without newlines, binary noise).
pub(super) const MAX_LINE_BYTES: usize = 2048;

pub(super) struct OutputCapture {
    log: Option<tokio::fs::File>,
    log_path: PathBuf,
    stderr_tail: VecDeque<String>,
    log_tail: VecDeque<String>,
    stderr_limit: usize,
    log_limit: usize,
}

fn push_bounded(tail: &mut VecDeque<String>, line: &str, limit: usize) {
    if tail.len() == limit {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

impl OutputCapture {
    /// Opens (appends to) the log file. A log that cannot be opened only costs the
    /// `log_ref`; the job still runs.
    pub(super) async fn open(log_path: &Path, stderr_limit: usize, log_limit: usize) -> Self {
        let log = async {
            if let Some(parent) = log_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .await
        }
        .await;
        let log = match log {
            Ok(f) => Some(f),
            Err(e) => {
                tracing::warn!(path = %log_path.display(), "job log unavailable: {e}");
                None
            }
        };
        Self {
            log,
            log_path: log_path.to_path_buf(),
            stderr_tail: VecDeque::with_capacity(stderr_limit),
            log_tail: VecDeque::with_capacity(log_limit),
            stderr_limit: stderr_limit.max(1),
            log_limit: log_limit.max(1),
        }
    }

    /// Records one line; returns the trimmed line if it should be interpreted.
    pub(super) async fn record<'a>(&mut self, line: &'a str, stream: OutputStream) -> Option<&'a str> {
        if line.len() > MAX_LINE_BYTES {
            return None;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        push_bounded(&mut self.log_tail, trimmed, self.log_limit);
        if stream == OutputStream::Stderr {
            push_bounded(&mut self.stderr_tail, trimmed, self.stderr_limit);
        }

        if let Some(file) = self.log.as_mut() {
            let tag = match stream {
                OutputStream::Stdout => "out",
                OutputStream::Stderr => "err",
            };
            let entry = format!("[{tag}] {trimmed}\n");
            if let Err(e) = file.write_all(entry.as_bytes()).await {
                tracing::warn!(path = %self.log_path.display(), "job log write failed: {e}");
                self.log = None;
            }
        }
        Some(trimmed)
    }

    pub(super) fn stderr_tail(&self) -> String {
        self.stderr_tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Stderr tail, or the combined tail when the tool wrote nothing to stderr.
    pub(super) fn failure_tail(&self) -> String {
        if self.stderr_tail.is_empty() {
            self.log_tail.iter().cloned().collect::<Vec<_>>().join("\n")
        } else {
            self.stderr_tail()
        }
    }

    pub(super) fn log_ref(&self) -> Option<PathBuf> {
        self.log_path.exists().then(|| self.log_path.clone())
    }

    pub(super) async fn close(&mut self) {
        if let Some(mut file) = self.log.take() {
            let _ = file.flush().await;
        }
    }
}
