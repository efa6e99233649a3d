use std::path::PathBuf;
use std::time::Duration;

use polarity_content::TrackKind;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Per-extension codec override applied when an input of that extension is
/// wired into the multiplexer command. Rules are keyed per input, so two
/// subtitle inputs with different extensions never collide.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CodecRule {
    /// Extension with the dot, e.g. `.vtt`.
    pub ext: String,
    pub kind: TrackKind,
    pub codec: String,
}

/// Multiplexer-related settings.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FfmpegConfig {
    /// Binary name or path; resolved via `PATH` (the binaries directory
    /// is prepended by the CLI at startup).
    pub binary: String,
    /// Default codec per track kind; `copy` unless configured otherwise.
    pub codecs: FxHashMap<TrackKind, String>,
    pub codec_rules: Vec<CodecRule>,
    /// Final container extension.
    pub output_ext: String,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        let mut codecs = FxHashMap::default();
        for kind in TrackKind::ALL {
            codecs.insert(kind, "copy".to_string());
        }
        Self {
            binary: "ffmpeg".to_string(),
            codecs,
            codec_rules: vec![CodecRule {
                ext: ".vtt".to_string(),
                kind: TrackKind::Subtitles,
                codec: "srt".to_string(),
            }],
            output_ext: "mkv".to_string(),
        }
    }
}

/// Configuration for one engine instance.
#[derive(Debug, Clone)]
pub struct PenguinConfig {
    /// Attempts per segment (initial try included).
    pub attempts: u32,
    /// Concurrent segment downloaders per content.
    pub threads: usize,
    /// Fixed delay between retries of one segment.
    pub retry_delay: Duration,
    /// Per-segment GET timeout.
    pub segment_timeout: Duration,
    /// Preferred video height for variant ranking.
    pub resolution: u32,
    pub ffmpeg: FfmpegConfig,
    /// External Widevine decryption tool, e.g. `mp4decrypt`.
    pub decrypt_binary: String,
    /// Root of the per-content working directories.
    pub temp_dir: PathBuf,
    pub user_agent: String,
    /// Keep the temp directory after a failed mux for inspection.
    pub keep_temp_on_failure: bool,
    /// Write the assembled multiplexer command next to the state files.
    pub dump_commands: bool,
}

impl Default for PenguinConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            threads: 5,
            retry_delay: Duration::from_millis(500),
            segment_timeout: Duration::from_secs(15),
            resolution: 1080,
            ffmpeg: FfmpegConfig::default(),
            decrypt_binary: "mp4decrypt".to_string(),
            temp_dir: std::env::temp_dir(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            keep_temp_on_failure: true,
            dump_commands: false,
        }
    }
}

impl PenguinConfig {
    /// HTTP client for manifest and segment fetches.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(Duration::from_secs(30))
            .build()
    }
}
