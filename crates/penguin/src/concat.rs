//! Binary concat phase (DASH pattern): append each media segment's bytes
//! to the pool's init file, deleting segments as they are consumed. The
//! init file becomes the playable track file.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::PenguinError;
use crate::segment::{INIT_SEGMENT_NUMBER, PoolFormat, SegmentPool};
use crate::state::{DownloadStats, StatePaths};

/// Append all non-subtitle pools' segments into their init files.
///
/// Progress is recorded in the stats' `appended` high-water map after
/// every segment, so an interrupted run resumes after the last appended
/// segment instead of appending the same bytes twice.
pub async fn run_concat(
    pools: &[SegmentPool],
    paths: &StatePaths,
    stats: &Arc<Mutex<DownloadStats>>,
) -> Result<(), PenguinError> {
    for pool in pools {
        if pool.format == PoolFormat::Subtitles {
            continue;
        }
        let Some(init_path) = pool.init_segment_path(&paths.temp_dir) else {
            continue;
        };

        let high_water = stats
            .lock()
            .appended
            .get(&pool.id)
            .copied()
            .unwrap_or(INIT_SEGMENT_NUMBER);

        let mut init_file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&init_path)
            .await?;

        let mut media_segments: Vec<_> = pool.segments.iter().filter(|s| !s.init).collect();
        media_segments.sort_by_key(|s| s.number);

        for segment in media_segments {
            if segment.number <= high_water {
                debug!(segment = %segment.qualified_id(), "already appended; skipping");
                continue;
            }
            let path = segment.file_path(&paths.temp_dir);
            let bytes = tokio::fs::read(&path).await?;
            init_file.write_all(&bytes).await?;
            init_file.flush().await?;
            tokio::fs::remove_file(&path).await?;

            let mut guard = stats.lock();
            guard.appended.insert(pool.id.clone(), segment.number);
            guard.save(paths)?;
        }

        info!(pool = %pool.id, target = %init_path.display(), "concat complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{PoolIdGenerator, Segment};
    use polarity_content::TrackKind;

    fn pool_on_disk(dir: &std::path::Path, segment_count: i64) -> (SegmentPool, StatePaths) {
        let paths = StatePaths::new(dir, "Show S01E01");
        std::fs::create_dir_all(&paths.temp_dir).unwrap();

        let mut ids = PoolIdGenerator::default();
        let mut pool = SegmentPool::new(PoolFormat::Video, ids.next_id(PoolFormat::Video), 0);
        pool.push(Segment {
            url: "https://cdn/init.mp4".into(),
            number: INIT_SEGMENT_NUMBER,
            kind: TrackKind::Video,
            key: None,
            group: pool.id.clone(),
            duration: 0.0,
            init: true,
            ext: ".mp4".into(),
            byte_range: None,
            finished: false,
        });
        std::fs::write(paths.temp_dir.join("video0_-1.mp4"), b"INIT").unwrap();

        for n in 0..segment_count {
            pool.push(Segment {
                url: format!("https://cdn/{n}.m4s"),
                number: n,
                kind: TrackKind::Video,
                key: None,
                group: pool.id.clone(),
                duration: 4.0,
                init: false,
                ext: ".m4s".into(),
                byte_range: None,
                finished: false,
            });
            std::fs::write(
                paths.temp_dir.join(format!("video0_{n}.m4s")),
                format!("SEG{n}"),
            )
            .unwrap();
        }
        (pool, paths)
    }

    #[tokio::test]
    async fn appends_in_order_and_deletes_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, paths) = pool_on_disk(dir.path(), 3);
        let stats = Arc::new(Mutex::new(DownloadStats::default()));

        run_concat(&[pool], &paths, &stats).await.unwrap();

        let merged = std::fs::read_to_string(paths.temp_dir.join("video0_-1.mp4")).unwrap();
        assert_eq!(merged, "INITSEG0SEG1SEG2");
        for n in 0..3 {
            assert!(!paths.temp_dir.join(format!("video0_{n}.m4s")).exists());
        }
        assert_eq!(stats.lock().appended.get("video0"), Some(&2));
    }

    #[tokio::test]
    async fn resume_skips_already_appended_segments() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, paths) = pool_on_disk(dir.path(), 3);

        // Pretend a previous run appended segment 0 and crashed: the init
        // file already holds its bytes and the marker says so.
        std::fs::write(paths.temp_dir.join("video0_-1.mp4"), b"INITSEG0").unwrap();
        std::fs::remove_file(paths.temp_dir.join("video0_0.m4s")).unwrap();
        let mut resumed = DownloadStats::default();
        resumed.appended.insert("video0".into(), 0);
        let stats = Arc::new(Mutex::new(resumed));

        run_concat(&[pool], &paths, &stats).await.unwrap();

        let merged = std::fs::read_to_string(paths.temp_dir.join("video0_-1.mp4")).unwrap();
        assert_eq!(merged, "INITSEG0SEG1SEG2");
    }

    #[tokio::test]
    async fn subtitle_pools_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::new(dir.path(), "X");
        std::fs::create_dir_all(&paths.temp_dir).unwrap();
        let mut pool = SegmentPool::new(PoolFormat::Subtitles, "subtitles0".into(), 0);
        pool.push(Segment {
            url: "https://cdn/s.vtt".into(),
            number: 0,
            kind: TrackKind::Subtitles,
            key: None,
            group: "subtitles0".into(),
            duration: 0.0,
            init: false,
            ext: ".vtt".into(),
            byte_range: None,
            finished: false,
        });
        std::fs::write(paths.temp_dir.join("subtitles0_0.vtt"), "WEBVTT").unwrap();
        let stats = Arc::new(Mutex::new(DownloadStats::default()));

        run_concat(&[pool], &paths, &stats).await.unwrap();
        assert!(paths.temp_dir.join("subtitles0_0.vtt").exists());
    }
}
