use std::path::{Path, PathBuf};

use polarity_content::{ContentKey, TrackKind};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Media kind of a whole pool. `Unified` carries muxed audio+video (single
/// HLS media playlist, plain files).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PoolFormat {
    Video,
    Audio,
    Subtitles,
    Unified,
}

impl PoolFormat {
    pub fn prefix(&self) -> &'static str {
        match self {
            PoolFormat::Video => "video",
            PoolFormat::Audio => "audio",
            PoolFormat::Subtitles => "subtitles",
            PoolFormat::Unified => "unified",
        }
    }

    /// Track kind the multiplexer maps this pool to. `Unified` is mapped
    /// as video; its audio rides along in the same input.
    pub fn track_kind(&self) -> TrackKind {
        match self {
            PoolFormat::Video | PoolFormat::Unified => TrackKind::Video,
            PoolFormat::Audio => TrackKind::Audio,
            PoolFormat::Subtitles => TrackKind::Subtitles,
        }
    }
}

/// Optional byte range of a segment.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    /// `Range` header value for the request.
    pub fn header_value(&self) -> String {
        match self.length {
            Some(length) => format!("bytes={}-{}", self.offset, self.offset + length - 1),
            None => format!("bytes={}-", self.offset),
        }
    }
}

/// Reserved sequence number of initialization segments.
pub const INIT_SEGMENT_NUMBER: i64 = -1;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Segment {
    pub url: String,
    /// Sequence number; −1 for the initialization segment.
    pub number: i64,
    pub kind: TrackKind,
    pub key: Option<ContentKey>,
    /// Owning pool id.
    pub group: String,
    pub duration: f64,
    pub init: bool,
    /// Extension with the dot, e.g. `.ts`.
    pub ext: String,
    pub byte_range: Option<ByteRange>,
    pub finished: bool,
}

impl Segment {
    /// `{group}_{number}`, the id recorded in the resume state.
    pub fn qualified_id(&self) -> String {
        format!("{}_{}", self.group, self.number)
    }

    /// Canonical on-disk path inside the content's temp directory.
    pub fn file_path(&self, temp_dir: &Path) -> PathBuf {
        temp_dir.join(format!("{}_{}{}", self.group, self.number, self.ext))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SegmentPool {
    /// All segments, in sequence order (init segment first if present).
    pub segments: Vec<Segment>,
    pub format: PoolFormat,
    /// `{format}{counter}`, unique per content.
    pub id: String,
    /// Track index the pool belongs to (extra audio/subtitle ordinal).
    pub track_id: u32,
    pub finished: bool,
    /// Worker currently owning the pool; assists do not change it.
    /// Reservation is monotonic within a run.
    #[serde(skip)]
    pub reserved_by: Option<usize>,
    /// Download cursor: index of the next segment to hand out. Not
    /// persisted; on resume the downloaded-set skips finished segments.
    #[serde(skip)]
    cursor: usize,
    /// Segments handed out but not yet completed. `finished` may only be
    /// flipped when the pool is drained and this hits zero.
    #[serde(skip)]
    pub in_flight: usize,
}

impl SegmentPool {
    pub fn new(format: PoolFormat, id: String, track_id: u32) -> Self {
        Self {
            segments: Vec::new(),
            format,
            id,
            track_id,
            finished: false,
            reserved_by: None,
            cursor: 0,
            in_flight: 0,
        }
    }

    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Hand out the next segment in sequence order. Callers hold the pool
    /// lock; the full segment list stays intact for the post phases.
    pub fn pop(&mut self) -> Option<Segment> {
        let segment = self.segments.get(self.cursor).cloned();
        if segment.is_some() {
            self.cursor += 1;
        }
        segment
    }

    pub fn is_drained(&self) -> bool {
        self.cursor >= self.segments.len()
    }

    pub fn total_segments(&self) -> usize {
        self.segments.len()
    }

    /// The init segment file doubles as the concat target.
    pub fn init_segment_path(&self, temp_dir: &Path) -> Option<PathBuf> {
        self.segments
            .iter()
            .find(|s| s.init)
            .map(|s| s.file_path(temp_dir))
    }

    /// Distinct keys carried by this pool's segments, in first-seen order.
    pub fn keys(&self) -> Vec<ContentKey> {
        let mut seen = Vec::new();
        for segment in &self.segments {
            if let Some(key) = &segment.key
                && !seen.contains(key)
            {
                seen.push(key.clone());
            }
        }
        seen
    }
}

/// Generates `{format}{counter}` pool ids, counters per-format monotonic.
#[derive(Debug, Default)]
pub struct PoolIdGenerator {
    counters: FxHashMap<PoolFormat, u32>,
}

impl PoolIdGenerator {
    pub fn next_id(&mut self, format: PoolFormat) -> String {
        let counter = self.counters.entry(format).or_insert(0);
        let id = format!("{}{}", format.prefix(), *counter);
        *counter += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn segment(group: &str, number: i64) -> Segment {
        Segment {
            url: format!("https://cdn/{number}.ts"),
            number,
            kind: TrackKind::Video,
            key: None,
            group: group.to_string(),
            duration: 4.0,
            init: number == INIT_SEGMENT_NUMBER,
            ext: ".ts".to_string(),
            byte_range: None,
            finished: false,
        }
    }

    #[test]
    fn pool_id_counters_are_per_format() {
        let mut generator = PoolIdGenerator::default();
        assert_eq!(generator.next_id(PoolFormat::Unified), "unified0");
        assert_eq!(generator.next_id(PoolFormat::Audio), "audio0");
        assert_eq!(generator.next_id(PoolFormat::Unified), "unified1");
        assert_eq!(generator.next_id(PoolFormat::Subtitles), "subtitles0");
        assert_eq!(generator.next_id(PoolFormat::Audio), "audio1");
    }

    #[test]
    fn qualified_ids_and_paths() {
        let s = segment("video0", 3);
        assert_eq!(s.qualified_id(), "video0_3");
        assert_eq!(
            s.file_path(Path::new("/tmp/Show S01E01")),
            PathBuf::from("/tmp/Show S01E01/video0_3.ts")
        );

        let init = segment("video0", INIT_SEGMENT_NUMBER);
        assert_eq!(init.qualified_id(), "video0_-1");
    }

    #[test]
    fn byte_range_header() {
        let full = ByteRange {
            offset: 100,
            length: Some(50),
        };
        assert_eq!(full.header_value(), "bytes=100-149");
        let open = ByteRange {
            offset: 7,
            length: None,
        };
        assert_eq!(open.header_value(), "bytes=7-");
    }

    #[test]
    fn pop_preserves_the_segment_list() {
        let mut pool = SegmentPool::new(PoolFormat::Video, "video0".into(), 0);
        for n in 0..3 {
            pool.push(segment("video0", n));
        }
        while pool.pop().is_some() {}
        assert!(pool.is_drained());
        assert_eq!(pool.total_segments(), 3);
        assert_eq!(pool.segments.len(), 3);
    }

    #[test]
    fn serialized_pool_resets_its_cursor() {
        let mut pool = SegmentPool::new(PoolFormat::Video, "video0".into(), 0);
        pool.push(segment("video0", 0));
        pool.push(segment("video0", 1));
        pool.pop();

        let raw = serde_json::to_string(&pool).unwrap();
        let mut reloaded: SegmentPool = serde_json::from_str(&raw).unwrap();
        assert_eq!(reloaded.pop().unwrap().number, 0);
    }

    /// Any number of workers popping concurrently must drain the pool
    /// exactly once and leave it finished.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pops_drain_exactly_once() {
        let mut pool = SegmentPool::new(PoolFormat::Video, "video0".into(), 0);
        for n in 0..100 {
            pool.push(segment("video0", n));
        }
        let pool = Arc::new(Mutex::new(pool));
        let seen = Arc::new(Mutex::new(HashSet::new()));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let pool = Arc::clone(&pool);
            let seen = Arc::clone(&seen);
            tasks.push(tokio::spawn(async move {
                loop {
                    let segment = {
                        let mut guard = pool.lock();
                        match guard.pop() {
                            Some(s) => s,
                            None => {
                                guard.finished = true;
                                break;
                            }
                        }
                    };
                    assert!(seen.lock().insert(segment.qualified_id()));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.lock().finished);
        assert_eq!(seen.lock().len(), 100);
    }
}
