//! # Penguin
//!
//! Segment download engine: given a leaf content with streams attached,
//! materialize it to a single local file. Manifest parsing, resumable
//! bounded-parallel segment fetching, playlist rewriting, the binary
//! concat and decryption hand-off phases, and the multiplexer invocation
//! all live here.

pub mod concat;
pub mod config;
pub mod decrypt;
pub mod downloader;
pub mod error;
pub mod ffmpeg;
pub mod playlist;
pub mod protocol;
pub mod retry;
pub mod segment;
pub mod state;
pub mod subtitles;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use polarity_content::{KeyMethod, Media, MediaKind, TargetOs, sanitize};

pub use config::{CodecRule, FfmpegConfig, PenguinConfig};
pub use error::PenguinError;
pub use retry::{RetryAction, RetryPolicy, retry_with_backoff};
pub use segment::{ByteRange, PoolFormat, Segment, SegmentPool};
pub use state::{DownloadStats, PoolsSnapshot, StatePaths};

use downloader::DownloadContext;
use segment::PoolIdGenerator;
use state::StatePaths as Paths;

/// One engine instance, shared by the download workers.
pub struct Penguin {
    config: Arc<PenguinConfig>,
    client: reqwest::Client,
}

impl Penguin {
    pub fn new(config: PenguinConfig) -> Result<Self, PenguinError> {
        let client = config.build_client()?;
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    /// Sanitized per-content directory name.
    pub fn content_name(media: &Media) -> String {
        let raw = match media.kind {
            MediaKind::Episode => format!(
                "{} {}",
                media.lineage.series_title,
                media.short_name()
            ),
            MediaKind::Movie => media.title.clone(),
        };
        sanitize::sanitize_filename(raw.trim(), TargetOs::current())
    }

    /// Fully materialize one leaf: manifests → segments → post phases →
    /// multiplex → move to the templated output path.
    pub async fn download(
        &self,
        media: &Media,
        token: &CancellationToken,
    ) -> Result<PathBuf, PenguinError> {
        let output = media.output.clone().ok_or_else(|| PenguinError::Internal {
            reason: "leaf has no output path".to_string(),
        })?;

        let content_name = Self::content_name(media);
        let paths = Paths::new(&self.config.temp_dir, &content_name);
        tokio::fs::create_dir_all(&paths.temp_dir).await?;

        // Boot: reuse the parsed pools from a previous run or invoke the
        // protocol handlers now.
        let snapshot = match PoolsSnapshot::load(&paths) {
            Some(snapshot) => {
                info!(content = %content_name, "resuming from pool snapshot");
                snapshot
            }
            None => {
                let snapshot = self.build_snapshot(media, &paths).await?;
                snapshot.save(&paths)?;
                snapshot
            }
        };

        // Rewritten playlists exist before any segment does, so the mux
        // inputs are stable across resumes.
        for (pool, input) in snapshot.pools.iter().zip(&snapshot.inputs) {
            if input.hls_playlist {
                playlist::write_local_playlist(pool, &paths.temp_dir)?;
            }
        }

        let stats = DownloadStats::load(&paths)
            .unwrap_or_else(|| DownloadStats::regenerate(&paths));

        let mut key_files: FxHashMap<String, PathBuf> = FxHashMap::default();
        for pool in &snapshot.pools {
            for (key, path) in playlist::key_files(pool, &paths.temp_dir) {
                if let Some(url) = key.url {
                    key_files.insert(url, path);
                }
            }
        }

        let total_segments: usize = snapshot.pools.iter().map(|p| p.total_segments()).sum();
        let ctx = Arc::new(DownloadContext {
            paths: paths.clone(),
            pools: snapshot
                .pools
                .iter()
                .cloned()
                .map(|pool| Arc::new(Mutex::new(pool)))
                .collect(),
            stats: Arc::new(Mutex::new(stats)),
            key_files,
            total_segments,
        });

        info!(
            content = %content_name,
            pools = snapshot.pools.len(),
            segments = total_segments,
            "download started"
        );
        downloader::run_segment_downloaders(
            Arc::clone(&ctx),
            self.client.clone(),
            Arc::clone(&self.config),
            token.clone(),
        )
        .await;
        if token.is_cancelled() {
            return Err(PenguinError::Cancelled);
        }

        // Post phases, strictly sequential.
        if snapshot.concat {
            concat::run_concat(&snapshot.pools, &paths, &ctx.stats).await?;
        }
        if let Some(key) = &snapshot.key
            && key.method == KeyMethod::Widevine
        {
            let raw = key.raw.as_deref().ok_or_else(|| PenguinError::Internal {
                reason: "widevine key without raw bytes".to_string(),
            })?;
            decrypt::run_decrypt(
                &self.config.decrypt_binary,
                raw,
                &snapshot.pools,
                &paths,
                token,
            )
            .await?;
        }

        let mux_target = self
            .config
            .temp_dir
            .join(format!("{content_name}.{}", self.config.ffmpeg.output_ext));
        if self.config.dump_commands {
            let command = ffmpeg::build_mux_command(&snapshot.inputs, &mux_target).join(" ");
            let _ = tokio::fs::write(paths.temp_dir.join("command.txt"), command).await;
        }
        if let Err(e) = ffmpeg::run_mux(
            &self.config.ffmpeg.binary,
            &snapshot.inputs,
            &mux_target,
            &paths.progress,
            token,
        )
        .await
        {
            if !self.config.keep_temp_on_failure {
                paths.cleanup();
            }
            return Err(e);
        }

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        move_file(&mux_target, &output).await?;
        paths.cleanup();

        info!(content = %content_name, output = %output.display(), "download complete");
        Ok(output)
    }

    /// Run the protocol handlers over every stream of the leaf.
    ///
    /// The preferred stream is essential; a failing extra stream is
    /// dropped with a warning and the rest of the leaf continues.
    async fn build_snapshot(
        &self,
        media: &Media,
        paths: &StatePaths,
    ) -> Result<PoolsSnapshot, PenguinError> {
        let mut ids = PoolIdGenerator::default();
        let mut snapshot = PoolsSnapshot {
            pools: Vec::new(),
            inputs: Vec::new(),
            concat: false,
            key: media.preferred_stream().and_then(|s| s.key.clone()),
        };

        for stream in &media.streams {
            let extraction = match protocol::extract_stream(
                &self.client,
                &self.config,
                stream,
                &paths.temp_dir,
                &mut ids,
            )
            .await
            {
                Ok(extraction) => extraction,
                Err(e) if !stream.preferred => {
                    warn!(stream = %stream.id, error = %e, "extra stream dropped");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if stream.preferred {
                snapshot.concat = extraction.concat;
            }
            snapshot.pools.extend(extraction.pools);
            snapshot.inputs.extend(extraction.inputs);
        }

        if snapshot.pools.is_empty() {
            return Err(PenguinError::IncompatibleStream {
                url: media
                    .preferred_stream()
                    .map(|s| s.url.clone())
                    .unwrap_or_default(),
            });
        }
        Ok(snapshot)
    }
}

/// Rename with a copy fallback for cross-device moves.
async fn move_file(from: &PathBuf, to: &PathBuf) -> Result<(), PenguinError> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polarity_content::Stream;

    #[test]
    fn content_names_are_sanitized() {
        let mut ep = Media::episode("Who? What", "e1", 5);
        ep.lineage.series_title = "Spice: and Wolf".into();
        ep.lineage.season_number = 1;
        let name = Penguin::content_name(&ep);
        assert!(!name.contains(':'));
        assert!(!name.contains('?'));
        assert!(name.contains("S01E05"));

        let movie = Media::movie("Big Film?", "m1");
        assert!(!Penguin::content_name(&movie).contains('?'));
    }

    #[tokio::test]
    async fn snapshot_for_plain_file_stream() {
        let dir = tempfile::tempdir().unwrap();
        let config = PenguinConfig {
            temp_dir: dir.path().to_path_buf(),
            ..PenguinConfig::default()
        };
        let penguin = Penguin::new(config).unwrap();

        let mut movie = Media::movie("Clip", "m1");
        movie
            .streams
            .push(Stream::new("http://example/clip.mp4", "main").preferred());
        let paths = StatePaths::new(dir.path(), "Clip");

        let snapshot = penguin.build_snapshot(&movie, &paths).await.unwrap();
        assert_eq!(snapshot.pools.len(), 1);
        assert_eq!(snapshot.pools[0].id, "unified0");
        assert!(!snapshot.concat);
        assert!(snapshot.key.is_none());

        // The snapshot round-trips through disk.
        std::fs::create_dir_all(&paths.temp_dir).unwrap();
        snapshot.save(&paths).unwrap();
        let reloaded = PoolsSnapshot::load(&paths).unwrap();
        assert_eq!(reloaded.pools[0].id, "unified0");
        assert_eq!(reloaded.inputs.len(), 1);
    }
}
