//! Control socket: server (during `mdq get` / `mdq resume`) and client (for
//! `mdq cancel` / `mdq resolve`).
//! Protocol: one line per command, "cancel <id>" or "resolve <id> overwrite|discard";
//! the server answers each with "ok" or "error: <reason>".

use anyhow::{bail, Context, Result};
use mdq_core::conflict::ConflictDecision;
use mdq_core::job::JobId;
use mdq_core::EngineHandle;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Cancel(JobId),
    Resolve(JobId, ConflictDecision),
}

impl ControlRequest {
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let verb = parts.next()?;
        let id: JobId = parts.next()?.parse().ok()?;
        let req = match verb {
            "cancel" => ControlRequest::Cancel(id),
            "resolve" => ControlRequest::Resolve(id, parts.next()?.parse().ok()?),
            _ => return None,
        };
        parts.next().is_none().then_some(req)
    }

    pub fn to_line(self) -> String {
        match self {
            ControlRequest::Cancel(id) => format!("cancel {id}\n"),
            ControlRequest::Resolve(id, decision) => format!("resolve {id} {decision}\n"),
        }
    }
}

/// Spawns a task that listens on `path` and forwards each request to the engine.
pub fn spawn_control_listener(
    engine: EngineHandle,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("control socket bind {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let engine = engine.clone();
                    tokio::spawn(serve_client(engine, stream));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

async fn serve_client(engine: EngineHandle, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match ControlRequest::parse(&line) {
            Some(ControlRequest::Cancel(id)) => engine.cancel(id).await,
            Some(ControlRequest::Resolve(id, decision)) => {
                engine.resolve_conflict(id, decision).await
            }
            None => {
                tracing::debug!(line = %line.trim(), "malformed control request");
                let _ = write.write_all(b"error: malformed request\n").await;
                continue;
            }
        };
        let answer = match reply {
            Ok(()) => "ok\n".to_string(),
            Err(e) => format!("error: {e}\n"),
        };
        if write.write_all(answer.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Sends one request to the running session and returns its answer.
pub async fn send_request(socket_path: &Path, req: ControlRequest) -> Result<()> {
    if !socket_path.exists() {
        bail!("no running mdq session (no control socket at {})", socket_path.display());
    }
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("connect {}", socket_path.display()))?;
    let (read, mut write) = stream.into_split();
    write.write_all(req.to_line().as_bytes()).await?;
    let answer = BufReader::new(read)
        .lines()
        .next_line()
        .await?
        .unwrap_or_default();
    match answer.strip_prefix("error: ") {
        Some(reason) => bail!("{reason}"),
        None if answer.trim() == "ok" => Ok(()),
        None => bail!("unexpected answer from session: {answer}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cancel_and_resolve() {
        let id = JobId::new();
        assert_eq!(
            ControlRequest::parse(&format!("cancel {id}")),
            Some(ControlRequest::Cancel(id))
        );
        assert_eq!(
            ControlRequest::parse(&format!("  resolve {id} Overwrite \n")),
            Some(ControlRequest::Resolve(id, ConflictDecision::Overwrite))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        let id = JobId::new();
        for line in [
            String::new(),
            "cancel".to_string(),
            "cancel 42".to_string(),
            format!("pause {id}"),
            format!("resolve {id}"),
            format!("resolve {id} maybe"),
            format!("cancel {id} now"),
        ] {
            assert_eq!(ControlRequest::parse(&line), None, "{line:?}");
        }
    }

    #[test]
    fn request_lines_roundtrip() {
        let id = JobId::new();
        for req in [
            ControlRequest::Cancel(id),
            ControlRequest::Resolve(id, ConflictDecision::Discard),
        ] {
            assert_eq!(ControlRequest::parse(&req.to_line()), Some(req));
        }
    }
}
