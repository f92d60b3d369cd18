use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::job::{FormatPreset, JobConfig, DEFAULT_FILENAME_TEMPLATE};
use crate::scheduler::ConcurrencyLimits;

/// Bounds for the progress batch interval.
pub const MIN_BATCH_INTERVAL_MS: u64 = 50;
pub const MAX_BATCH_INTERVAL_MS: u64 = 2000;

/// External downloader tool (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Executable name or path.
    pub program: String,
    /// Appended verbatim to every invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            extra_args: Vec::new(),
        }
    }
}

/// Per-submission settings used when the CLI does not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefaults {
    /// Output directory; the current directory when unset.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub format: FormatPreset,
    #[serde(default)]
    pub max_height: Option<u32>,
    #[serde(default = "default_template")]
    pub filename_template: String,
    #[serde(default)]
    pub embed_metadata: bool,
    #[serde(default)]
    pub embed_thumbnail: bool,
    #[serde(default)]
    pub restrict_filenames: bool,
    #[serde(default)]
    pub live_from_start: bool,
}

fn default_template() -> String {
    DEFAULT_FILENAME_TEMPLATE.to_string()
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            output_dir: None,
            format: FormatPreset::default(),
            max_height: None,
            filename_template: default_template(),
            embed_metadata: false,
            embed_thumbnail: false,
            restrict_filenames: false,
            live_from_start: false,
        }
    }
}

impl JobDefaults {
    /// Settings snapshot seeded from these defaults, writing into `fallback_dir`
    /// when no output directory is configured.
    pub fn job_config(&self, fallback_dir: &Path) -> JobConfig {
        JobConfig {
            output_dir: self
                .output_dir
                .clone()
                .unwrap_or_else(|| fallback_dir.to_path_buf()),
            format: self.format,
            max_height: self.max_height,
            filename_template: self.filename_template.clone(),
            embed_metadata: self.embed_metadata,
            embed_thumbnail: self.embed_thumbnail,
            restrict_filenames: self.restrict_filenames,
            live_from_start: self.live_from_start,
        }
    }
}

/// Global configuration loaded from `~/.config/mdq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdqConfig {
    /// Maximum jobs transferring at once (N).
    pub max_concurrent_transfers: usize,
    /// Maximum jobs holding a slot, post-processing included (M, >= N).
    pub max_total_busy: usize,
    /// Progress batch flush interval; clamped to 50..=2000.
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Grace period between cooperative termination and force-kill.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    /// Coalescing window for resume-store writes.
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,
    /// Lines of stderr kept for error details.
    #[serde(default = "default_stderr_tail_lines")]
    pub stderr_tail_lines: usize,
    /// Lines of combined output kept in memory per job.
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    #[serde(default)]
    pub defaults: JobDefaults,
}

fn default_batch_interval_ms() -> u64 {
    crate::pipeline::DEFAULT_BATCH_INTERVAL_MS
}

fn default_cancel_grace_secs() -> u64 {
    5
}

fn default_persist_debounce_ms() -> u64 {
    500
}

fn default_stderr_tail_lines() -> usize {
    50
}

fn default_log_tail_lines() -> usize {
    100
}

impl Default for MdqConfig {
    fn default() -> Self {
        let limits = ConcurrencyLimits::default();
        Self {
            max_concurrent_transfers: limits.max_concurrent_transfers,
            max_total_busy: limits.max_total_busy,
            batch_interval_ms: default_batch_interval_ms(),
            cancel_grace_secs: default_cancel_grace_secs(),
            persist_debounce_ms: default_persist_debounce_ms(),
            stderr_tail_lines: default_stderr_tail_lines(),
            log_tail_lines: default_log_tail_lines(),
            downloader: DownloaderConfig::default(),
            defaults: JobDefaults::default(),
        }
    }
}

/// Runtime engine settings derived from a validated `MdqConfig`.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub limits: ConcurrencyLimits,
    pub batch_interval: Duration,
    pub cancel_grace: Duration,
    pub persist_debounce: Duration,
    pub stderr_tail_lines: usize,
    pub log_tail_lines: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            limits: ConcurrencyLimits::default(),
            batch_interval: Duration::from_millis(default_batch_interval_ms()),
            cancel_grace: Duration::from_secs(default_cancel_grace_secs()),
            persist_debounce: Duration::from_millis(default_persist_debounce_ms()),
            stderr_tail_lines: default_stderr_tail_lines(),
            log_tail_lines: default_log_tail_lines(),
        }
    }
}

impl MdqConfig {
    /// Rejects N = 0 or M < N.
    pub fn validate(&self) -> crate::error::Result<()> {
        self.limits().map(|_| ())
    }

    pub fn limits(&self) -> crate::error::Result<ConcurrencyLimits> {
        ConcurrencyLimits::new(self.max_concurrent_transfers, self.max_total_busy)
    }

    pub fn engine_settings(&self) -> crate::error::Result<EngineSettings> {
        Ok(EngineSettings {
            limits: self.limits()?,
            batch_interval: Duration::from_millis(
                self.batch_interval_ms
                    .clamp(MIN_BATCH_INTERVAL_MS, MAX_BATCH_INTERVAL_MS),
            ),
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
            persist_debounce: Duration::from_millis(self.persist_debounce_ms.max(1)),
            stderr_tail_lines: self.stderr_tail_lines.max(1),
            log_tail_lines: self.log_tail_lines.max(1),
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MdqConfig> {
    let path = config_path()?;
    load_or_init_at(&path)
}

/// Same as `load_or_init` for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<MdqConfig> {
    if !path.exists() {
        let default_cfg = MdqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: MdqConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = MdqConfig::default();
        assert_eq!(cfg.max_concurrent_transfers, 4);
        assert_eq!(cfg.max_total_busy, 10);
        assert_eq!(cfg.batch_interval_ms, 250);
        assert_eq!(cfg.cancel_grace_secs, 5);
        assert_eq!(cfg.downloader.program, "yt-dlp");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = MdqConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MdqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent_transfers, cfg.max_concurrent_transfers);
        assert_eq!(parsed.max_total_busy, cfg.max_total_busy);
        assert_eq!(parsed.persist_debounce_ms, cfg.persist_debounce_ms);
        assert_eq!(
            parsed.defaults.filename_template,
            cfg.defaults.filename_template
        );
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_concurrent_transfers = 2
            max_total_busy = 3
            batch_interval_ms = 10

            [downloader]
            program = "/opt/bin/yt-dlp"
            extra_args = ["--cookies-from-browser", "firefox"]

            [defaults]
            output_dir = "/srv/media"
            format = "audio_flac"
            embed_metadata = true
        "#;
        let cfg: MdqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent_transfers, 2);
        assert_eq!(cfg.cancel_grace_secs, 5);
        assert_eq!(cfg.downloader.extra_args.len(), 2);
        assert_eq!(cfg.defaults.format, FormatPreset::AudioFlac);
        assert_eq!(cfg.defaults.filename_template, DEFAULT_FILENAME_TEMPLATE);

        let settings = cfg.engine_settings().unwrap();
        assert_eq!(settings.batch_interval, Duration::from_millis(50));
        let job = cfg.defaults.job_config(Path::new("/unused"));
        assert_eq!(job.output_dir, PathBuf::from("/srv/media"));
        assert!(job.embed_metadata);
    }

    #[test]
    fn config_rejects_busy_below_transfers() {
        let toml = r#"
            max_concurrent_transfers = 6
            max_total_busy = 4
        "#;
        let cfg: MdqConfig = toml::from_str(toml).unwrap();
        assert!(cfg.validate().is_err());

        let zero = MdqConfig {
            max_concurrent_transfers: 0,
            ..MdqConfig::default()
        };
        assert!(zero.engine_settings().is_err());
    }

    #[test]
    fn load_or_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mdq").join("config.toml");
        let first = load_or_init_at(&path).unwrap();
        assert!(path.exists());
        assert_eq!(first.max_total_busy, 10);

        fs::write(
            &path,
            "max_concurrent_transfers = 1\nmax_total_busy = 1\n",
        )
        .unwrap();
        let second = load_or_init_at(&path).unwrap();
        assert_eq!(second.max_concurrent_transfers, 1);
    }
}
