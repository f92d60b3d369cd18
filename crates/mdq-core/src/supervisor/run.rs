//! One supervised job: spawn the tool, interpret its output, gate conflicts,
//! move the result into place, and report exactly one terminal update.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;

use super::capture::{OutputCapture, MAX_LINE_BYTES};
use super::finalize::{locate_output, move_into_place, remove_staging};
use super::signal;
use super::{ControlMsg, SupervisorEvent, SupervisorSettings};
use crate::adapter::{DownloaderAdapter, LineEvent, OutputStream, ProgressSample};
use crate::conflict::ConflictDecision;
use crate::error::{EngineError, Result};
use crate::job::{
    ErrorDetail, JobConfig, JobId, JobStatus, JobUpdate, Phase, SequenceCounter, UpdateEntry,
};

const LINE_CHANNEL_CAPACITY: usize = 1000;
const SKIP_CHUNK_BYTES: u64 = 8192;

/// Short user-facing message for a failed run, from the tool's stderr.
pub(crate) fn classify_failure(exit_code: Option<i32>, stderr: &str) -> String {
    if stderr.contains("No supported JavaScript runtime") {
        "Missing compliant JS runtime".to_string()
    } else if stderr.contains("Sign in to confirm") {
        "Authentication required".to_string()
    } else {
        format!("Process failed (exit code {})", exit_code.unwrap_or(-1))
    }
}

pub(super) struct JobRun {
    pub(super) job_id: JobId,
    pub(super) url: String,
    pub(super) config: JobConfig,
    pub(super) seq: SequenceCounter,
    pub(super) staging: PathBuf,
    pub(super) log_path: PathBuf,
    pub(super) adapter: Arc<dyn DownloaderAdapter>,
    pub(super) settings: SupervisorSettings,
    pub(super) events: mpsc::UnboundedSender<SupervisorEvent>,
}

/// Per-run progress of the tool as seen from its output.
struct RunState {
    phase: Phase,
    transfer_started: bool,
    /// Set once the user chose to overwrite an existing target.
    overwrite: bool,
    reported_output: Option<PathBuf>,
    filename: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: Phase::Initializing,
            transfer_started: false,
            overwrite: false,
            reported_output: None,
            filename: None,
        }
    }
}

impl JobRun {
    fn emit(&self, update: JobUpdate) {
        let entry = UpdateEntry {
            job_id: self.job_id,
            sequence_id: self.seq.next(),
            update,
        };
        let _ = self.events.send(SupervisorEvent::Update(entry));
    }

    /// Runs the job and emits its terminal update.
    pub(super) async fn execute(self, mut control: mpsc::UnboundedReceiver<ControlMsg>) {
        let mut capture = OutputCapture::open(
            &self.log_path,
            self.settings.stderr_tail_lines,
            self.settings.log_tail_lines,
        )
        .await;
        let result = self.supervise(&mut control, &mut capture).await;
        capture.close().await;

        let update = match result {
            Ok(dest) => {
                tracing::info!(job_id = %self.job_id, output = %dest.display(), "job completed");
                JobUpdate::completed(dest)
            }
            Err(EngineError::Cancelled) => {
                tracing::info!(job_id = %self.job_id, "job cancelled");
                JobUpdate::status(JobStatus::Cancelled)
            }
            Err(EngineError::ProcessFailed { exit_code, stderr }) => {
                let message = classify_failure(exit_code, &stderr);
                tracing::warn!(job_id = %self.job_id, exit_code = ?exit_code, "{message}");
                JobUpdate::failed(ErrorDetail {
                    message,
                    exit_code,
                    stderr_tail: stderr,
                    log_ref: capture.log_ref(),
                })
            }
            Err(e) => {
                tracing::error!(job_id = %self.job_id, "job failed: {e}");
                JobUpdate::failed(ErrorDetail {
                    message: e.to_string(),
                    exit_code: None,
                    stderr_tail: capture.failure_tail(),
                    log_ref: capture.log_ref(),
                })
            }
        };
        remove_staging(&self.staging).await;
        self.emit(update);
    }

    async fn supervise(
        &self,
        control: &mut mpsc::UnboundedReceiver<ControlMsg>,
        capture: &mut OutputCapture,
    ) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.staging).await.map_err(|e| {
            io::Error::new(e.kind(), format!("cannot create staging directory: {e}"))
        })?;

        let mut cmd = self.adapter.command(&self.url, &self.config, &self.staging);
        cmd.current_dir(&self.staging)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let program = cmd.as_std().get_program().to_string_lossy().into_owned();
        tracing::debug!(job_id = %self.job_id, "spawning {:?}", cmd.as_std());
        let mut child = cmd.spawn().map_err(|e| {
            io::Error::new(e.kind(), format!("failed to spawn {program}: {e}"))
        })?;
        let pid = child.id();

        let (line_tx, mut lines) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        if let Some(out) = child.stdout.take() {
            spawn_reader(out, OutputStream::Stdout, line_tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(err, OutputStream::Stderr, line_tx.clone());
        }
        drop(line_tx);

        let mut state = RunState::default();
        loop {
            tokio::select! {
                msg = control.recv() => match msg {
                    Some(ControlMsg::Resolve(decision)) => {
                        tracing::debug!(job_id = %self.job_id, %decision, "no conflict pending, decision ignored");
                    }
                    Some(ControlMsg::Cancel) | None => {
                        self.terminate(&mut child, pid).await;
                        return Err(EngineError::Cancelled);
                    }
                },
                line = lines.recv() => match line {
                    Some((line, stream)) => {
                        let Some(line) = capture.record(&line, stream).await else {
                            continue;
                        };
                        if let Some(event) = self.adapter.parse_line(line, stream) {
                            if let Err(e) = self.on_event(event, &mut state, control, pid).await {
                                self.terminate(&mut child, pid).await;
                                return Err(e);
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        let status = self.wait_exit(&mut child, pid, control).await?;
        if !status.success() {
            return Err(EngineError::ProcessFailed {
                exit_code: status.code(),
                stderr: capture.failure_tail(),
            });
        }
        self.finish(&mut state, control).await
    }

    async fn on_event(
        &self,
        event: LineEvent,
        state: &mut RunState,
        control: &mut mpsc::UnboundedReceiver<ControlMsg>,
        pid: Option<u32>,
    ) -> Result<()> {
        match event {
            LineEvent::Progress(sample) => self.on_progress(sample, state),
            LineEvent::Phase(phase) => {
                if phase != state.phase {
                    state.phase = phase;
                    self.emit(JobUpdate {
                        phase: Some(phase),
                        ..JobUpdate::default()
                    });
                }
            }
            LineEvent::OutputPath(path) => state.reported_output = Some(path),
            LineEvent::Destination(path) => {
                if let Some(name) = path.file_name() {
                    let name = name.to_string_lossy().into_owned();
                    state.filename = Some(name.clone());
                    self.emit(JobUpdate {
                        filename: Some(name),
                        ..JobUpdate::default()
                    });
                }
                if !state.transfer_started && !state.overwrite {
                    let expected = self.adapter.final_destination(&path, &self.config);
                    if let Some(target) = expected.and_then(|p| self.target_for(&p)) {
                        if tokio::fs::symlink_metadata(&target).await.is_ok() {
                            self.await_decision(&target, pid, state.phase, control).await?;
                            state.overwrite = true;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn on_progress(&self, sample: ProgressSample, state: &mut RunState) {
        state.transfer_started = true;
        let mut update = JobUpdate {
            progress: sample.percent,
            speed: sample.speed,
            eta: sample.eta,
            filename: sample.filename.clone(),
            ..JobUpdate::default()
        };
        if !state.phase.is_post_processing() && state.phase != Phase::Transferring {
            state.phase = Phase::Transferring;
            update.phase = Some(Phase::Transferring);
        }
        if let Some(name) = sample.filename {
            state.filename = Some(name);
        }
        self.emit(update);
    }

    /// Where a staging-relative path ends up in the output directory.
    fn target_for(&self, path: &Path) -> Option<PathBuf> {
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.staging).ok()?
        } else {
            path
        };
        Some(self.config.output_dir.join(rel))
    }

    /// Pauses the job in `FileConflict` until the user decides. `pid` is the
    /// still-running tool, stopped while waiting; `None` once it has exited.
    async fn await_decision(
        &self,
        target: &Path,
        pid: Option<u32>,
        resume_phase: Phase,
        control: &mut mpsc::UnboundedReceiver<ControlMsg>,
    ) -> Result<()> {
        if let Some(pid) = pid {
            signal::stop_group(pid);
        }
        tracing::info!(job_id = %self.job_id, target = %target.display(), "file conflict, waiting for decision");
        self.emit(JobUpdate::conflict(target.to_path_buf()));

        match control.recv().await {
            Some(ControlMsg::Resolve(ConflictDecision::Overwrite)) => {
                if let Some(pid) = pid {
                    signal::continue_group(pid);
                }
                self.emit(JobUpdate::status(JobStatus::Downloading).with_phase(resume_phase));
                Ok(())
            }
            Some(ControlMsg::Resolve(ConflictDecision::Discard))
            | Some(ControlMsg::Cancel)
            | None => Err(EngineError::Cancelled),
        }
    }

    async fn wait_exit(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        control: &mut mpsc::UnboundedReceiver<ControlMsg>,
    ) -> Result<ExitStatus> {
        loop {
            tokio::select! {
                status = child.wait() => return Ok(status?),
                msg = control.recv() => match msg {
                    Some(ControlMsg::Resolve(_)) => {}
                    Some(ControlMsg::Cancel) | None => {
                        self.terminate(child, pid).await;
                        return Err(EngineError::Cancelled);
                    }
                },
            }
        }
    }

    /// Moves the produced file into the output directory.
    async fn finish(
        &self,
        state: &mut RunState,
        control: &mut mpsc::UnboundedReceiver<ControlMsg>,
    ) -> Result<PathBuf> {
        if state.phase != Phase::Finalizing {
            state.phase = Phase::Finalizing;
            self.emit(JobUpdate {
                phase: Some(Phase::Finalizing),
                ..JobUpdate::default()
            });
        }

        let src = locate_output(
            &self.staging,
            state.reported_output.as_deref(),
            state.filename.as_deref(),
        )
        .await
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                "download finished but no output file was found",
            )
        })?;
        let dest = self
            .target_for(&src)
            .or_else(|| src.file_name().map(|n| self.config.output_dir.join(n)))
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "output has no file name"))?;

        match move_into_place(&src, &dest, state.overwrite).await {
            Ok(()) => Ok(dest),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                self.await_decision(&dest, None, Phase::Finalizing, control)
                    .await?;
                move_into_place(&src, &dest, true)
                    .await
                    .map_err(|e| io::Error::new(e.kind(), format!("file move failed: {e}")))?;
                Ok(dest)
            }
            Err(e) => Err(io::Error::new(e.kind(), format!("file move failed: {e}")).into()),
        }
    }

    /// Cooperative stop, then force-kill after the grace period.
    async fn terminate(&self, child: &mut Child, pid: Option<u32>) {
        match pid {
            Some(pid) if cfg!(unix) => signal::terminate_group(pid),
            _ => {
                let _ = child.start_kill();
            }
        }
        if tokio::time::timeout(self.settings.cancel_grace, child.wait())
            .await
            .is_err()
        {
            tracing::warn!(job_id = %self.job_id, "tool ignored termination, killing");
            if let Some(pid) = pid {
                signal::kill_group(pid);
            }
            let _ = child.kill().await;
        }
    }
}

/// Forwards lines from one pipe. Invalid UTF-8 is replaced, not fatal.
fn spawn_reader<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<(String, OutputStream)>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(MAX_LINE_BYTES + 1);
        while let Ok(true) = read_bounded_line(&mut reader, &mut buf, MAX_LINE_BYTES).await {
            let line = String::from_utf8_lossy(&buf).into_owned();
            if tx.send((line, stream)).await.is_err() {
                break;
            }
        }
    });
}

/// Reads the next line of at most `limit` bytes into `buf`. Longer lines are
/// consumed in chunks and skipped, so `buf` never grows past `limit + 1`.
/// Returns false at end of stream.
async fn read_bounded_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        buf.clear();
        let n = AsyncReadExt::take(&mut *reader, limit as u64 + 1)
            .read_until(b'\n', buf)
            .await?;
        if n == 0 {
            return Ok(false);
        }
        if n <= limit || buf.ends_with(b"\n") {
            return Ok(true);
        }
        loop {
            buf.clear();
            let n = AsyncReadExt::take(&mut *reader, SKIP_CHUNK_BYTES)
                .read_until(b'\n', buf)
                .await?;
            if n == 0 {
                return Ok(false);
            }
            if buf.ends_with(b"\n") {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overlong_lines_are_skipped_without_buffering_them() {
        let mut input = b"short\n".to_vec();
        input.extend(vec![b'x'; 100_000]);
        input.extend_from_slice(b"\nnext\n");
        input.extend(vec![b'y'; 50_000]);
        let mut reader: &[u8] = &input;
        let mut buf = Vec::new();
        let mut lines = Vec::new();
        while read_bounded_line(&mut reader, &mut buf, 16).await.unwrap() {
            assert!(buf.len() <= 17);
            lines.push(String::from_utf8(buf.clone()).unwrap());
        }
        assert_eq!(lines, vec!["short\n".to_string(), "next\n".to_string()]);
    }

    #[tokio::test]
    async fn line_exactly_at_limit_is_kept() {
        let mut reader: &[u8] = b"0123456789abcdef\nend";
        let mut buf = Vec::new();
        assert!(read_bounded_line(&mut reader, &mut buf, 16).await.unwrap());
        assert_eq!(buf, b"0123456789abcdef\n");
        assert!(read_bounded_line(&mut reader, &mut buf, 16).await.unwrap());
        assert_eq!(buf, b"end");
        assert!(!read_bounded_line(&mut reader, &mut buf, 16).await.unwrap());
    }

    #[test]
    fn failure_messages_are_classified() {
        assert_eq!(
            classify_failure(Some(1), "ERROR: No supported JavaScript runtime could be found"),
            "Missing compliant JS runtime"
        );
        assert_eq!(
            classify_failure(Some(1), "ERROR: Sign in to confirm you're not a bot"),
            "Authentication required"
        );
        assert_eq!(
            classify_failure(Some(2), "ERROR: Unsupported URL"),
            "Process failed (exit code 2)"
        );
        assert_eq!(classify_failure(None, ""), "Process failed (exit code -1)");
    }
}
