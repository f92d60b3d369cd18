//! Starting and stopping the engine for one CLI invocation.

use anyhow::{Context, Result};
use mdq_core::adapter::{YtDlpAdapter, YtDlpExpander};
use mdq_core::config::MdqConfig;
use mdq_core::paths::StateLayout;
use mdq_core::store::StateDb;
use mdq_core::{EngineHandle, EngineParts};
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::control_socket;

pub struct RunningEngine {
    pub handle: EngineHandle,
    task: JoinHandle<()>,
    layout: StateLayout,
    control: Option<JoinHandle<()>>,
}

/// Opens the state database and spawns the engine. With `listen`, also serves the
/// control socket so other `mdq` invocations can cancel jobs or answer conflicts.
pub async fn start(cfg: &MdqConfig, listen: bool) -> Result<RunningEngine> {
    let settings = cfg.engine_settings().context("invalid configuration")?;
    let layout = StateLayout::default_location()?;
    let db = StateDb::open_at(layout.db_path())
        .await
        .with_context(|| format!("open state db {}", layout.db_path().display()))?;

    let (handle, task) = EngineHandle::spawn(EngineParts {
        settings,
        layout: layout.clone(),
        db,
        adapter: Arc::new(YtDlpAdapter::new(cfg.downloader.clone())),
        expander: Arc::new(YtDlpExpander::new(cfg.downloader.clone())),
    });

    let control = if listen {
        let path = layout.control_socket();
        match control_socket::spawn_control_listener(handle.clone(), &path) {
            Ok(task) => {
                tracing::debug!(path = %path.display(), "control socket listening");
                Some(task)
            }
            Err(e) => {
                tracing::warn!("control socket unavailable: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    Ok(RunningEngine {
        handle,
        task,
        layout,
        control,
    })
}

impl RunningEngine {
    /// Graceful stop: running jobs are terminated but stay resumable.
    pub async fn stop(self) -> Result<()> {
        if let Some(control) = self.control {
            control.abort();
            let _ = std::fs::remove_file(self.layout.control_socket());
        }
        self.handle.shutdown().await?;
        self.task.await.context("engine task")?;
        Ok(())
    }
}
