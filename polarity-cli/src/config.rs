use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::cli::VerboseLevel;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("config file unparseable: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config file unserializable: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("verbose level `{0}` out of range")]
    BadVerboseLevel(String),
    #[error("missing credential: {0}")]
    MissingCredential(String),
    #[error("bad filter expression: {0}")]
    BadFilter(String),
    #[error("engine init failed: {0}")]
    Engine(String),
}

/// Top-level configuration document. Missing keys are merged from the
/// defaults on load and the file is rewritten, so the schema migrates in
/// place.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub verbose: String,
    pub verbose_logs: String,
    pub language: String,
    pub check_for_updates: bool,
    pub download: DownloadSection,
    pub extractor: ExtractorSection,
    pub search: SearchSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            verbose: "info".to_string(),
            verbose_logs: "debug".to_string(),
            language: "enUS".to_string(),
            check_for_updates: true,
            download: DownloadSection::default(),
            extractor: ExtractorSection::default(),
            search: SearchSection::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DownloadSection {
    pub active_downloads: usize,
    pub series_directory: String,
    pub movies_directory: String,
    pub generic_directory: String,
    pub episode_format: String,
    pub movie_format: String,
    pub generic_format: String,
    pub resolution: u32,
    pub redownload: bool,
    pub penguin: PenguinSection,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            active_downloads: 3,
            series_directory: default_media_dir("Series"),
            movies_directory: default_media_dir("Movies"),
            generic_directory: default_media_dir("Downloads"),
            episode_format: "{S} ({y})/Season {Sn}/{S} {sn}x{en} - {E}.{ext}".to_string(),
            movie_format: "{E} ({Y}).{ext}".to_string(),
            generic_format: "{E}.{ext}".to_string(),
            resolution: 1080,
            redownload: false,
            penguin: PenguinSection::default(),
        }
    }
}

fn default_media_dir(kind: &str) -> String {
    dirs::video_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_default()
        .join(kind)
        .to_string_lossy()
        .into_owned()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PenguinSection {
    pub attempts: u32,
    pub threads: usize,
    pub ffmpeg: FfmpegSection,
    pub tweaks: TweaksSection,
}

impl Default for PenguinSection {
    fn default() -> Self {
        Self {
            attempts: 5,
            threads: 5,
            ffmpeg: FfmpegSection::default(),
            tweaks: TweaksSection::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FfmpegSection {
    pub codecs: CodecsSection,
    /// `ext → kind:codec` overrides, e.g. `".vtt" → "subtitles:srt"`.
    pub codec_rules: Vec<CodecRuleSection>,
}

impl Default for FfmpegSection {
    fn default() -> Self {
        Self {
            codecs: CodecsSection::default(),
            codec_rules: vec![CodecRuleSection {
                ext: ".vtt".to_string(),
                kind: "subtitles".to_string(),
                codec: "srt".to_string(),
            }],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CodecsSection {
    pub video: String,
    pub audio: String,
    pub subtitles: String,
}

impl Default for CodecsSection {
    fn default() -> Self {
        Self {
            video: "copy".to_string(),
            audio: "copy".to_string(),
            subtitles: "copy".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CodecRuleSection {
    pub ext: String,
    pub kind: String,
    pub codec: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct TweaksSection {
    /// Keep the per-content temp directory after a failed mux for
    /// inspection.
    pub keep_temp_on_failure: bool,
    /// Write the assembled multiplexer command next to the state files.
    pub dump_commands: bool,
}

impl Default for TweaksSection {
    fn default() -> Self {
        Self {
            keep_temp_on_failure: true,
            dump_commands: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ExtractorSection {
    pub active_extractions: usize,
    pub crunchyroll: SiteSection,
    pub atresplayer: SiteSection,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            active_extractions: 3,
            crunchyroll: SiteSection {
                dub_languages: vec!["ja-JP".to_string()],
                ..SiteSection::default()
            },
            atresplayer: SiteSection::default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SiteSection {
    pub email: String,
    pub password: String,
    pub dub_languages: Vec<String>,
    pub sub_languages: Vec<String>,
    pub hardsub_language: String,
    pub prefer_hevc: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SearchSection {
    pub results: usize,
    pub results_per_extractor: usize,
    pub results_per_type: usize,
    pub trim_names: bool,
    pub result_format: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            results: 20,
            results_per_extractor: 10,
            results_per_type: 10,
            trim_names: true,
            result_format: "{n} ({y}) - {i}".to_string(),
        }
    }
}

impl AppConfig {
    /// Load the config file, merging missing keys from the defaults and
    /// rewriting the file in place. A missing file is created whole.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let defaults = toml::Value::try_from(AppConfig::default())?;

        let merged = match fs::read_to_string(path) {
            Ok(raw) => {
                let mut user: toml::Value = raw.parse()?;
                dict_merge(&mut user, &defaults, false);
                user
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => defaults,
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(&merged)?)?;
        debug!(path = %path.display(), "configuration written back");

        let config: AppConfig = merged.try_into()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for level in [&self.verbose, &self.verbose_logs] {
            if VerboseLevel::parse_config_value(level).is_none() {
                return Err(ConfigError::BadVerboseLevel(level.clone()));
            }
        }
        Ok(())
    }

    pub fn console_level(&self) -> VerboseLevel {
        VerboseLevel::parse_config_value(&self.verbose).unwrap_or(VerboseLevel::Info)
    }

    pub fn log_file_level(&self) -> VerboseLevel {
        VerboseLevel::parse_config_value(&self.verbose_logs).unwrap_or(VerboseLevel::Debug)
    }
}

/// Recursive table merge. With `overwrite`, values from `other` replace
/// existing scalars; without it, `other` only fills holes. Idempotent
/// either way.
pub fn dict_merge(base: &mut toml::Value, other: &toml::Value, overwrite: bool) {
    match (base, other) {
        (toml::Value::Table(base_table), toml::Value::Table(other_table)) => {
            for (key, other_value) in other_table {
                match base_table.get_mut(key) {
                    Some(base_value) => {
                        if base_value.is_table() && other_value.is_table() {
                            dict_merge(base_value, other_value, overwrite);
                        } else if overwrite {
                            *base_value = other_value.clone();
                        }
                    }
                    None => {
                        base_table.insert(key.clone(), other_value.clone());
                    }
                }
            }
        }
        (base, other) => {
            if overwrite {
                *base = other.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(raw: &str) -> toml::Value {
        raw.parse().unwrap()
    }

    #[test]
    fn merge_fills_missing_keys_only() {
        let mut base = table("a = 1\n[nested]\nx = 10");
        let other = table("a = 2\nb = 3\n[nested]\nx = 20\ny = 30");
        dict_merge(&mut base, &other, false);
        assert_eq!(base["a"].as_integer(), Some(1));
        assert_eq!(base["b"].as_integer(), Some(3));
        assert_eq!(base["nested"]["x"].as_integer(), Some(10));
        assert_eq!(base["nested"]["y"].as_integer(), Some(30));
    }

    #[test]
    fn merge_with_overwrite_is_idempotent() {
        let mut first = table("a = 1\n[nested]\nx = 10");
        let other = table("a = 2\n[nested]\nx = 20\ny = 30");
        dict_merge(&mut first, &other, true);
        let mut second = first.clone();
        dict_merge(&mut second, &other, true);
        assert_eq!(first, second);
    }

    #[test]
    fn load_creates_and_migrates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        // First load creates a complete file.
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.download.active_downloads, 3);
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("active_downloads"));

        // A sparse file keeps its values and regains missing keys.
        fs::write(&path, "verbose = \"debug\"\n[download]\nresolution = 720\n").unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.verbose, "debug");
        assert_eq!(config.download.resolution, 720);
        assert_eq!(config.download.penguin.threads, 5);
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.contains("threads"));
    }

    #[test]
    fn bad_verbose_level_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "verbose = \"shout\"\n").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::BadVerboseLevel(level)) if level == "shout"
        ));
    }

    #[test]
    fn defaults_carry_the_vtt_rule() {
        let config = AppConfig::default();
        assert_eq!(
            config.download.penguin.ffmpeg.codec_rules,
            vec![CodecRuleSection {
                ext: ".vtt".into(),
                kind: "subtitles".into(),
                codec: "srt".into(),
            }]
        );
    }
}
