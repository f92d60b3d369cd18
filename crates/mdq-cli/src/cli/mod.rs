//! CLI for the MDQ media download queue.

mod commands;
mod control_socket;
mod engine;
mod session;

use anyhow::Result;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use mdq_core::config;
use mdq_core::conflict::ConflictDecision;
use mdq_core::job::{FormatPreset, JobId};
use std::path::PathBuf;

use commands::{
    run_cancel, run_discard, run_get, run_history, run_pending, run_resolve, run_resume,
};

/// Top-level CLI for the MDQ media download queue.
#[derive(Debug, Parser)]
#[command(name = "mdq")]
#[command(about = "MDQ: media download queue driving yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

/// What to do when a download would overwrite an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConflictPolicy {
    /// Prompt on the terminal.
    #[default]
    Ask,
    Overwrite,
    Discard,
}

/// Per-submission settings; unset flags fall back to `[defaults]` in config.toml.
#[derive(Debug, Clone, Default, Args)]
pub struct JobOptions {
    /// Directory the finished files are moved into (default: current directory).
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Format preset: best, best-mp4, best-mkv, best-webm, audio-best, audio-mp3, audio-flac, audio-m4a.
    #[arg(long, value_name = "PRESET")]
    pub preset: Option<FormatPreset>,

    /// Maximum video height, e.g. 1080.
    #[arg(long, value_name = "PIXELS")]
    pub max_height: Option<u32>,

    /// yt-dlp output template, e.g. "%(uploader)s - %(title)s.%(ext)s".
    #[arg(long, value_name = "TEMPLATE")]
    pub template: Option<String>,

    #[arg(long)]
    pub embed_metadata: bool,

    #[arg(long)]
    pub embed_thumbnail: bool,

    /// ASCII-only filenames without spaces.
    #[arg(long)]
    pub restrict_filenames: bool,

    /// Record live streams from their beginning.
    #[arg(long)]
    pub live_from_start: bool,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs (videos, playlists or channels).
    Get {
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,

        /// Download even if the URL is in the history or already queued.
        #[arg(long, short = 'f')]
        force: bool,

        #[command(flatten)]
        options: JobOptions,

        #[arg(long, value_enum, default_value_t = ConflictPolicy::Ask)]
        on_conflict: ConflictPolicy,

        /// Also resume jobs interrupted in an earlier session.
        #[arg(long)]
        resume: bool,
    },

    /// Resume jobs interrupted in an earlier session.
    Resume {
        #[arg(long, value_enum, default_value_t = ConflictPolicy::Ask)]
        on_conflict: ConflictPolicy,
    },

    /// List jobs interrupted in an earlier session.
    Pending,

    /// Forget interrupted jobs and delete their partial files.
    Discard,

    /// Cancel a job in the running session.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Answer a file conflict in the running session.
    Resolve {
        /// Job identifier.
        id: JobId,
        decision: ConflictDecision,
    },

    /// Inspect or edit the download history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Print shell completions.
    Completions {
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum HistoryAction {
    /// Show downloaded URLs, newest first.
    List,
    /// Forget every downloaded URL.
    Clear,
    /// Forget one URL so it can be downloaded again.
    Remove { url: String },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        if let CliCommand::Completions { shell } = cli.command {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "mdq", &mut std::io::stdout());
            return Ok(());
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get {
                urls,
                force,
                options,
                on_conflict,
                resume,
            } => run_get(&cfg, urls, force, &options, on_conflict, resume).await?,
            CliCommand::Resume { on_conflict } => run_resume(&cfg, on_conflict).await?,
            CliCommand::Pending => run_pending(&cfg).await?,
            CliCommand::Discard => run_discard(&cfg).await?,
            CliCommand::Cancel { id } => run_cancel(id).await?,
            CliCommand::Resolve { id, decision } => run_resolve(id, decision).await?,
            CliCommand::History { action } => run_history(action).await?,
            CliCommand::Completions { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
