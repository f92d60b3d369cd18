//! `yt-dlp` adapter: argument construction, output grammar and playlist expansion.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::format::{format_eta, format_speed};
use super::{CollectionExpander, DownloaderAdapter, LineEvent, OutputStream, ProgressSample};
use crate::config::DownloaderConfig;
use crate::error::{EngineError, Result};
use crate::job::{FormatPreset, JobConfig, Phase};

/// Prefix-free JSON emitted per progress tick by `--progress-template download:%(progress)j`.
#[derive(Debug, Deserialize)]
struct JsonProgress {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    downloaded_bytes: Option<f64>,
    #[serde(default)]
    total_bytes: Option<f64>,
    #[serde(default)]
    total_bytes_estimate: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    eta: Option<f64>,
    #[serde(default)]
    filename: Option<String>,
}

impl JsonProgress {
    fn into_sample(self) -> ProgressSample {
        let total = self.total_bytes.or(self.total_bytes_estimate);
        let percent = match (self.downloaded_bytes, total) {
            (Some(done), Some(total)) if total > 0.0 => Some((done / total * 100.0) as f32),
            _ if self.status.as_deref() == Some("finished") => Some(100.0),
            _ => None,
        };
        ProgressSample {
            percent,
            speed: self.speed.map(format_speed),
            eta: self
                .eta
                .filter(|e| e.is_finite() && *e >= 0.0)
                .map(|e| format_eta(e as u64)),
            filename: self.filename.as_deref().and_then(|f| {
                Path::new(f)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            }),
        }
    }
}

/// Maps one `yt-dlp` output line to a `LineEvent`. Public so other adapters that
/// drive a compatible tool can share the grammar.
pub fn parse_ytdlp_line(line: &str, stream: OutputStream) -> Option<LineEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() || stream == OutputStream::Stderr {
        return None;
    }

    if trimmed.starts_with('{') {
        return serde_json::from_str::<JsonProgress>(trimmed)
            .ok()
            .map(|p| LineEvent::Progress(p.into_sample()));
    }

    if let Some(rest) = trimmed.strip_prefix("[download]") {
        let rest = rest.trim_start();
        return rest
            .strip_prefix("Destination:")
            .map(|p| LineEvent::Destination(PathBuf::from(p.trim())));
    }

    let phase = if trimmed.starts_with("[Merger]") || trimmed.starts_with("[ExtractAudio]") {
        Phase::Merging
    } else if trimmed.starts_with("[Metadata]") {
        Phase::EmbeddingMetadata
    } else if trimmed.starts_with("[EmbedThumbnail]") || trimmed.starts_with("[Thumbnails]") {
        Phase::EmbeddingThumbnail
    } else if is_fixup(trimmed) || trimmed.starts_with("[MoveFiles]") {
        Phase::Finalizing
    } else if trimmed.starts_with("[ffmpeg]") {
        Phase::Merging
    } else if trimmed.starts_with('/') {
        // `--print after_move:filepath`
        return Some(LineEvent::OutputPath(PathBuf::from(trimmed)));
    } else {
        return None;
    };
    Some(LineEvent::Phase(phase))
}

/// `[FixupM3u8]`, `[FixupStretched]`, ...
fn is_fixup(line: &str) -> bool {
    line.strip_prefix("[Fixup")
        .and_then(|rest| rest.split_once(']'))
        .is_some_and(|(name, _)| name.chars().all(|c| c.is_ascii_alphanumeric()))
}

/// Name of the finished file for an announced destination. Per-format
/// intermediates (`title.f137.mp4`) lose their format id, and presets with a fixed
/// container or codec take its extension.
pub fn final_destination(path: &Path, preset: FormatPreset) -> Option<PathBuf> {
    if preset == FormatPreset::AudioBest {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return Some(path.to_path_buf());
    };
    let (base, intermediate) = match stem.rsplit_once('.') {
        Some((base, id)) if is_format_id(id) => (base, true),
        _ => (stem, false),
    };
    let ext = match preset.output_extension() {
        Some(fixed) => fixed,
        None if intermediate => return None,
        None => ext,
    };
    Some(path.with_file_name(format!("{base}.{ext}")))
}

fn is_format_id(token: &str) -> bool {
    token.strip_prefix('f').is_some_and(|id| {
        id.starts_with(|c: char| c.is_ascii_digit())
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Format selection arguments for a preset and optional height cap.
fn format_args(preset: FormatPreset, max_height: Option<u32>) -> Vec<String> {
    let height = max_height
        .map(|h| format!("[height<={h}]"))
        .unwrap_or_default();
    let video = |container: &str| {
        vec![
            "-f".to_string(),
            format!("bestvideo{height}+bestaudio"),
            "--merge-output-format".to_string(),
            container.to_string(),
        ]
    };
    let audio = |codec: &str| {
        vec![
            "-x".to_string(),
            "--audio-format".to_string(),
            codec.to_string(),
            "--audio-quality".to_string(),
            "0".to_string(),
        ]
    };
    match preset {
        FormatPreset::Best if height.is_empty() => Vec::new(),
        FormatPreset::Best => vec![
            "-f".to_string(),
            format!("bestvideo{height}+bestaudio/best{height}"),
        ],
        FormatPreset::BestMp4 => video("mp4"),
        FormatPreset::BestMkv => video("mkv"),
        FormatPreset::BestWebm => video("webm"),
        FormatPreset::AudioBest => vec![
            "-x".to_string(),
            "-f".to_string(),
            "bestaudio/best".to_string(),
        ],
        FormatPreset::AudioMp3 => audio("mp3"),
        FormatPreset::AudioFlac => audio("flac"),
        FormatPreset::AudioM4a => audio("m4a"),
    }
}

/// Runs `yt-dlp` (or a compatible fork) per job.
#[derive(Debug, Clone, Default)]
pub struct YtDlpAdapter {
    tool: DownloaderConfig,
}

impl YtDlpAdapter {
    pub fn new(tool: DownloaderConfig) -> Self {
        Self { tool }
    }

    /// Full argument list for one job, in invocation order.
    pub fn args(&self, url: &str, config: &JobConfig) -> Vec<String> {
        let mut args: Vec<String> = vec![
            url.to_string(),
            "-o".to_string(),
            config.filename_template.clone(),
            "--no-playlist".to_string(),
            "--no-simulate".to_string(),
            "--newline".to_string(),
            "--encoding".to_string(),
            "utf-8".to_string(),
            "--progress".to_string(),
            "--progress-template".to_string(),
            "download:%(progress)j".to_string(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
        ];
        if config.restrict_filenames {
            args.extend(["--restrict-filenames", "--trim-filenames", "200"].map(String::from));
        }
        if config.embed_metadata {
            args.push("--embed-metadata".to_string());
        }
        if config.embed_thumbnail {
            args.push("--embed-thumbnail".to_string());
        }
        if config.live_from_start {
            args.push("--live-from-start".to_string());
        }
        args.extend(format_args(config.format, config.max_height));
        args.extend(self.tool.extra_args.iter().cloned());
        args
    }
}

impl DownloaderAdapter for YtDlpAdapter {
    fn command(&self, url: &str, config: &JobConfig, staging_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.tool.program);
        cmd.args(self.args(url, config)).current_dir(staging_dir);
        cmd
    }

    fn parse_line(&self, line: &str, stream: OutputStream) -> Option<LineEvent> {
        parse_ytdlp_line(line, stream)
    }

    fn final_destination(&self, destination: &Path, config: &JobConfig) -> Option<PathBuf> {
        final_destination(destination, config.format)
    }
}

/// Expands playlists and channels with `--flat-playlist --dump-single-json`.
#[derive(Debug, Clone, Default)]
pub struct YtDlpExpander {
    tool: DownloaderConfig,
}

impl YtDlpExpander {
    pub fn new(tool: DownloaderConfig) -> Self {
        Self { tool }
    }
}

/// Entry URLs from a `--dump-single-json` document; a document without entries
/// is a single item.
fn entries_from_json(url: &str, doc: &serde_json::Value) -> Vec<String> {
    match doc.get("entries").and_then(|e| e.as_array()) {
        Some(entries) => entries
            .iter()
            .filter_map(|e| {
                e.get("url")
                    .or_else(|| e.get("webpage_url"))
                    .and_then(|u| u.as_str())
                    .map(str::to_string)
            })
            .collect(),
        None => vec![doc
            .get("webpage_url")
            .and_then(|u| u.as_str())
            .unwrap_or(url)
            .to_string()],
    }
}

#[async_trait]
impl CollectionExpander for YtDlpExpander {
    async fn expand(&self, url: &str) -> Result<Vec<String>> {
        let output = Command::new(&self.tool.program)
            .args(["--flat-playlist", "--dump-single-json", "--no-warnings"])
            .args(&self.tool.extra_args)
            .arg(url)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(EngineError::ProcessFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let doc: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::validation(format!("unreadable expansion output for {url}: {e}")))?;
        let entries = entries_from_json(url, &doc);
        tracing::debug!(url, entries = entries.len(), "expanded collection");
        Ok(entries)
    }
}
