//! Per-content resume state: the parsed pool snapshot and the rolling
//! download statistics, both persisted next to the temp directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use polarity_content::ContentKey;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PenguinError;
use crate::ffmpeg::FfmpegInput;
use crate::segment::SegmentPool;

/// File layout for one content:
/// `{temp_root}/{content}/` plus `{temp_root}/{content}_pools.json`,
/// `_stats.json`, `_stats.json.old` and `_ffmpeg.txt`.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub temp_dir: PathBuf,
    pub pools: PathBuf,
    pub stats: PathBuf,
    pub stats_old: PathBuf,
    pub progress: PathBuf,
}

impl StatePaths {
    pub fn new(temp_root: &Path, content_name: &str) -> Self {
        Self {
            temp_dir: temp_root.join(content_name),
            pools: temp_root.join(format!("{content_name}_pools.json")),
            stats: temp_root.join(format!("{content_name}_stats.json")),
            stats_old: temp_root.join(format!("{content_name}_stats.json.old")),
            progress: temp_root.join(format!("{content_name}_ffmpeg.txt")),
        }
    }

    /// Remove the state files and the temp directory after a successful
    /// mux.
    pub fn cleanup(&self) {
        for path in [&self.pools, &self.stats, &self.stats_old, &self.progress] {
            let _ = std::fs::remove_file(path);
        }
        let _ = std::fs::remove_dir_all(&self.temp_dir);
    }
}

/// Everything manifest parsing produced, serialized so a resumed run can
/// skip re-parsing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolsSnapshot {
    pub pools: Vec<SegmentPool>,
    pub inputs: Vec<FfmpegInput>,
    /// The first stream's protocol asked for the binary-concat pass.
    pub concat: bool,
    /// Key of the first stream, consulted for the decryption hand-off.
    pub key: Option<ContentKey>,
}

impl PoolsSnapshot {
    /// Load the snapshot if present; a corrupt file is deleted so the
    /// caller re-parses the manifests.
    pub fn load(paths: &StatePaths) -> Option<Self> {
        let raw = std::fs::read_to_string(&paths.pools).ok()?;
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(path = %paths.pools.display(), error = %e, "corrupt pool snapshot; reparsing");
                let _ = std::fs::remove_file(&paths.pools);
                None
            }
        }
    }

    pub fn save(&self, paths: &StatePaths) -> Result<(), PenguinError> {
        let raw = serde_json::to_string(self).map_err(|e| PenguinError::State {
            reason: e.to_string(),
        })?;
        std::fs::write(&paths.pools, raw)?;
        Ok(())
    }
}

/// Rolling download statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DownloadStats {
    pub downloaded_bytes: u64,
    pub estimated_total_bytes: u64,
    /// Pool-qualified segment ids (`{pool}_{number}`) already on disk.
    pub segments_downloaded: HashSet<String>,
    /// Concat high-water mark per pool: the highest segment number whose
    /// bytes were already appended to the init file. A resumed concat
    /// continues after it instead of appending twice.
    pub appended: FxHashMap<String, i64>,
}

impl DownloadStats {
    /// Load with backup fallback; `None` means neither file is usable and
    /// the caller should regenerate from the temp directory.
    pub fn load(paths: &StatePaths) -> Option<Self> {
        for (path, label) in [(&paths.stats, "current"), (&paths.stats_old, "backup")] {
            match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<Self>(&raw) {
                    Ok(stats) => {
                        debug!(file = label, segments = stats.segments_downloaded.len(), "stats loaded");
                        return Some(stats);
                    }
                    Err(e) => warn!(file = label, error = %e, "unreadable stats file"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = label, error = %e, "stats read failed"),
            }
        }
        None
    }

    /// Fresh stats for a content with no usable state file: if the temp
    /// directory has segment files already, reconstruct the downloaded
    /// set and byte counter from them.
    pub fn regenerate(paths: &StatePaths) -> Self {
        let mut stats = Self::default();
        let Ok(entries) = std::fs::read_dir(&paths.temp_dir) else {
            return stats;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = Path::new(&name);
            // Key files share the `{pool}_{k}` stem shape but are not
            // segments.
            if name.extension().is_some_and(|e| e == "key") {
                continue;
            }
            let Some(stem) = name.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !segment_stem_pattern(stem) {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                stats.downloaded_bytes += meta.len();
            }
            stats.segments_downloaded.insert(stem.to_string());
        }
        if !stats.segments_downloaded.is_empty() {
            debug!(
                segments = stats.segments_downloaded.len(),
                bytes = stats.downloaded_bytes,
                "stats regenerated from temp directory"
            );
        }
        stats
    }

    /// Rolling save: the previous file is kept as `.old` for one tick.
    pub fn save(&self, paths: &StatePaths) -> Result<(), PenguinError> {
        if paths.stats.exists() {
            let _ = std::fs::rename(&paths.stats, &paths.stats_old);
        }
        let raw = serde_json::to_string(self).map_err(|e| PenguinError::State {
            reason: e.to_string(),
        })?;
        std::fs::write(&paths.stats, raw)?;
        Ok(())
    }

    pub fn record_segment(&mut self, qualified_id: &str, bytes: u64) {
        if self.segments_downloaded.insert(qualified_id.to_string()) {
            self.downloaded_bytes += bytes;
        }
    }

    pub fn is_downloaded(&self, qualified_id: &str) -> bool {
        self.segments_downloaded.contains(qualified_id)
    }

    /// Cheap total estimate: average downloaded segment size times the
    /// total segment count. Improves monotonically as segments land.
    pub fn update_estimate(&mut self, total_segments: usize) {
        let done = self.segments_downloaded.len();
        if done == 0 {
            return;
        }
        self.estimated_total_bytes = self.downloaded_bytes / done as u64 * total_segments as u64;
    }
}

/// Does a file stem look like `{pool}_{number}`?
fn segment_stem_pattern(stem: &str) -> bool {
    static STEM: LazyLock<regex::Regex> =
        LazyLock::new(|| regex::Regex::new(r"^[a-z]+\d+_-?\d+$").unwrap());
    STEM.is_match(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::PoolFormat;

    fn paths_in(dir: &Path) -> StatePaths {
        let paths = StatePaths::new(dir, "Show S01E01");
        std::fs::create_dir_all(&paths.temp_dir).unwrap();
        paths
    }

    #[test]
    fn stats_round_trip_with_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let mut stats = DownloadStats::default();
        stats.record_segment("unified0_0", 1000);
        stats.save(&paths).unwrap();

        stats.record_segment("unified0_1", 1200);
        stats.save(&paths).unwrap();

        // Current holds both; the backup still holds only the first.
        let current = DownloadStats::load(&paths).unwrap();
        assert_eq!(current.segments_downloaded.len(), 2);
        assert_eq!(current.downloaded_bytes, 2200);
        let backup: DownloadStats =
            serde_json::from_str(&std::fs::read_to_string(&paths.stats_old).unwrap()).unwrap();
        assert_eq!(backup.segments_downloaded.len(), 1);
    }

    #[test]
    fn corrupt_current_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let mut stats = DownloadStats::default();
        stats.record_segment("video0_0", 500);
        stats.save(&paths).unwrap();
        stats.record_segment("video0_1", 500);
        stats.save(&paths).unwrap();

        std::fs::write(&paths.stats, "{broken").unwrap();
        let loaded = DownloadStats::load(&paths).unwrap();
        assert_eq!(loaded.segments_downloaded.len(), 1);
    }

    #[test]
    fn both_corrupt_regenerates_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        std::fs::write(&paths.stats, "{broken").unwrap();
        std::fs::write(&paths.stats_old, "also broken").unwrap();
        std::fs::write(paths.temp_dir.join("unified0_0.ts"), vec![0u8; 100]).unwrap();
        std::fs::write(paths.temp_dir.join("unified0_1.ts"), vec![0u8; 150]).unwrap();
        // Non-segment files are ignored, key files included even though
        // their stems look like segment ids.
        std::fs::write(paths.temp_dir.join("unified0.m3u8"), "#EXTM3U").unwrap();
        std::fs::write(paths.temp_dir.join("unified0_0.key"), vec![0u8; 16]).unwrap();

        assert!(DownloadStats::load(&paths).is_none());
        let stats = DownloadStats::regenerate(&paths);
        assert_eq!(stats.segments_downloaded.len(), 2);
        assert_eq!(stats.downloaded_bytes, 250);
        assert!(stats.is_downloaded("unified0_0"));
        assert!(stats.is_downloaded("unified0_1"));
    }

    #[test]
    fn estimate_scales_with_remaining_segments() {
        let mut stats = DownloadStats::default();
        stats.record_segment("unified0_0", 1000);
        stats.record_segment("unified0_1", 3000);
        stats.update_estimate(10);
        assert_eq!(stats.estimated_total_bytes, 20_000);
    }

    #[test]
    fn pool_snapshot_survives_corruption_by_reparsing() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let snapshot = PoolsSnapshot {
            pools: vec![SegmentPool::new(PoolFormat::Unified, "unified0".into(), 0)],
            inputs: vec![],
            concat: false,
            key: None,
        };
        snapshot.save(&paths).unwrap();
        assert!(PoolsSnapshot::load(&paths).is_some());

        std::fs::write(&paths.pools, "garbage").unwrap();
        assert!(PoolsSnapshot::load(&paths).is_none());
        // The corrupt file is gone so the next run re-parses cleanly.
        assert!(!paths.pools.exists());
    }

    #[test]
    fn record_is_idempotent_per_segment() {
        let mut stats = DownloadStats::default();
        stats.record_segment("audio0_4", 700);
        stats.record_segment("audio0_4", 700);
        assert_eq!(stats.downloaded_bytes, 700);
        assert_eq!(stats.segments_downloaded.len(), 1);
    }
}
