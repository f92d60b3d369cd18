//! Per-job settings snapshot, captured at submission and never mutated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{EngineError, Result};

/// Default output template when none is given.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Format/quality selection handed to the downloader adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatPreset {
    #[default]
    Best,
    BestMp4,
    BestMkv,
    BestWebm,
    AudioBest,
    AudioMp3,
    AudioFlac,
    AudioM4a,
}

impl FormatPreset {
    pub const ALL: [FormatPreset; 8] = [
        FormatPreset::Best,
        FormatPreset::BestMp4,
        FormatPreset::BestMkv,
        FormatPreset::BestWebm,
        FormatPreset::AudioBest,
        FormatPreset::AudioMp3,
        FormatPreset::AudioFlac,
        FormatPreset::AudioM4a,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FormatPreset::Best => "best",
            FormatPreset::BestMp4 => "best_mp4",
            FormatPreset::BestMkv => "best_mkv",
            FormatPreset::BestWebm => "best_webm",
            FormatPreset::AudioBest => "audio_best",
            FormatPreset::AudioMp3 => "audio_mp3",
            FormatPreset::AudioFlac => "audio_flac",
            FormatPreset::AudioM4a => "audio_m4a",
        }
    }

    pub fn is_audio(self) -> bool {
        matches!(
            self,
            FormatPreset::AudioBest
                | FormatPreset::AudioMp3
                | FormatPreset::AudioFlac
                | FormatPreset::AudioM4a
        )
    }

    /// Extension of the finished file when the preset fixes it (merge container or
    /// extraction codec).
    pub fn output_extension(self) -> Option<&'static str> {
        match self {
            FormatPreset::BestMp4 => Some("mp4"),
            FormatPreset::BestMkv => Some("mkv"),
            FormatPreset::BestWebm => Some("webm"),
            FormatPreset::AudioMp3 => Some("mp3"),
            FormatPreset::AudioFlac => Some("flac"),
            FormatPreset::AudioM4a => Some("m4a"),
            FormatPreset::Best | FormatPreset::AudioBest => None,
        }
    }
}

impl fmt::Display for FormatPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatPreset {
    type Err = String;

    /// Accepts `best_mp4` as well as `best-mp4`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        FormatPreset::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| format!("unknown format preset: {s}"))
    }
}

/// Immutable copy of the settings a job was submitted with, so retries and
/// resumed jobs reproduce identical behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub format: FormatPreset,
    /// Maximum video height (e.g. 1080); `None` means best available.
    #[serde(default)]
    pub max_height: Option<u32>,
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

impl JobConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            format: FormatPreset::default(),
            max_height: None,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            embed_metadata: false,
            embed_thumbnail: false,
            restrict_filenames: false,
            live_from_start: false,
        }
    }

    /// Checks the snapshot and fills the default template if it is blank.
    pub fn validated(mut self) -> Result<Self> {
        let template = self.filename_template.trim();
        if template.is_empty() {
            self.filename_template = DEFAULT_FILENAME_TEMPLATE.to_string();
        } else if template.contains("..") || template.starts_with('/') || template.starts_with('\\')
        {
            return Err(EngineError::validation(format!(
                "invalid filename template: {}",
                self.filename_template
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(EngineError::validation("output directory is empty"));
        }
        if self.max_height == Some(0) {
            return Err(EngineError::validation("max height must be positive"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_template_gets_default() {
        let mut cfg = JobConfig::new("/tmp/out");
        cfg.filename_template = "   ".to_string();
        let cfg = cfg.validated().unwrap();
        assert_eq!(cfg.filename_template, DEFAULT_FILENAME_TEMPLATE);
    }

    #[test]
    fn traversal_and_absolute_templates_rejected() {
        for bad in ["../%(title)s.%(ext)s", "/etc/%(title)s", "\\share\\x"] {
            let mut cfg = JobConfig::new("/tmp/out");
            cfg.filename_template = bad.to_string();
            assert!(matches!(
                cfg.validated(),
                Err(EngineError::ValidationFailed(_))
            ));
        }
    }

    #[test]
    fn json_roundtrip_keeps_snapshot() {
        let mut cfg = JobConfig::new("/data/videos");
        cfg.format = FormatPreset::AudioMp3;
        cfg.max_height = Some(720);
        cfg.embed_thumbnail = true;
        cfg.live_from_start = true;
        let json = serde_json::to_string(&cfg).unwrap();
        let back: JobConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
        assert!(json.contains("\"audio_mp3\""));
    }

    #[test]
    fn preset_names_parse_both_spellings() {
        assert_eq!("best-mp4".parse::<FormatPreset>(), Ok(FormatPreset::BestMp4));
        assert_eq!("AUDIO_FLAC".parse::<FormatPreset>(), Ok(FormatPreset::AudioFlac));
        assert!("vhs".parse::<FormatPreset>().is_err());
        for p in FormatPreset::ALL {
            assert_eq!(p.to_string().parse::<FormatPreset>(), Ok(p));
        }
    }
}
