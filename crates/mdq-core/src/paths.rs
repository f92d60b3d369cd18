//! XDG state locations.
//!
//! Everything lives under `~/.local/state/mdq/`: the state database, per-job staging
//! directories, per-job output logs and the CLI control socket.

use anyhow::Result;
use std::path::PathBuf;

use crate::job::JobId;

/// `~/.local/state/mdq`.
pub fn state_dir() -> Result<PathBuf> {
    Ok(xdg::BaseDirectories::with_prefix("mdq")?.get_state_home())
}

/// State layout rooted at one directory, so tests can point it at a temp dir.
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn default_location() -> Result<Self> {
        Ok(Self::new(state_dir()?))
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("state.db")
    }

    pub fn staging_dir(&self, id: &JobId) -> PathBuf {
        self.root.join("staging").join(id.to_string())
    }

    pub fn log_path(&self, id: &JobId) -> PathBuf {
        self.root.join("logs").join(format!("{id}.log"))
    }

    pub fn control_socket(&self) -> PathBuf {
        self.root.join("control.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_under_root() {
        let layout = StateLayout::new("/var/tmp/mdq-test");
        let id = JobId::new();
        assert_eq!(layout.db_path(), PathBuf::from("/var/tmp/mdq-test/state.db"));
        assert!(layout.staging_dir(&id).ends_with(id.to_string()));
        assert!(layout
            .log_path(&id)
            .to_string_lossy()
            .ends_with(&format!("logs/{id}.log")));
    }
}
