//! Boundaries to the external downloader tool.
//!
//! The engine never builds tool arguments or reads tool output itself: a
//! `DownloaderAdapter` turns a job into a command and each output line into a
//! `LineEvent`, and a `CollectionExpander` turns one URL into its entry URLs.

mod format;
mod ytdlp;

pub use format::{format_eta, format_speed};
pub use ytdlp::{parse_ytdlp_line, YtDlpAdapter, YtDlpExpander};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::Result;
use crate::job::{JobConfig, Phase};

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Transfer progress parsed from one output line. Display strings are already
/// humanised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSample {
    pub percent: Option<f32>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub filename: Option<String>,
}

/// Meaning of one output line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Progress(ProgressSample),
    Phase(Phase),
    /// The tool is about to write this file (relative to the staging dir unless absolute).
    Destination(PathBuf),
    /// The final file the tool produced.
    OutputPath(PathBuf),
}

/// Launches the external tool for one job and interprets its output.
pub trait DownloaderAdapter: Send + Sync + 'static {
    /// Command for `url`. The supervisor sets the working directory to
    /// `staging_dir`, pipes, and process group.
    fn command(&self, url: &str, config: &JobConfig, staging_dir: &Path) -> Command;

    fn parse_line(&self, line: &str, stream: OutputStream) -> Option<LineEvent>;

    /// Path the finished file will have, given a `Destination` the tool announced.
    /// `None` when it cannot be known before the tool finishes.
    fn final_destination(&self, destination: &Path, _config: &JobConfig) -> Option<PathBuf> {
        Some(destination.to_path_buf())
    }
}

/// Turns a playlist/channel URL into its ordered entry URLs. A plain video URL
/// expands to itself.
#[async_trait]
pub trait CollectionExpander: Send + Sync + 'static {
    async fn expand(&self, url: &str) -> Result<Vec<String>>;
}
