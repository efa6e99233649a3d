//! Local playlist rewriting: the multiplexer never sees the CDN. Segment
//! URIs point at the downloaded files, key URIs at locally stored key
//! files. Both are absolute paths, so the multiplexer's working directory
//! is irrelevant.

use std::path::{Path, PathBuf};

use polarity_content::ContentKey;

use crate::error::PenguinError;
use crate::protocol::subtitle_output_ext;
use crate::segment::{Segment, SegmentPool};

/// Local key file for the `k`-th distinct key of a pool:
/// `{temp_dir}/{pool.id}_{k}.key`.
pub fn key_file_path(temp_dir: &Path, pool_id: &str, index: usize) -> PathBuf {
    temp_dir.join(format!("{pool_id}_{index}.key"))
}

/// Map every distinct key of the pool to its local file, in first-seen
/// order. The downloader fetches each file lazily on first encounter.
pub fn key_files(pool: &SegmentPool, temp_dir: &Path) -> Vec<(ContentKey, PathBuf)> {
    pool.keys()
        .into_iter()
        .enumerate()
        .map(|(index, key)| {
            let path = key_file_path(temp_dir, &pool.id, index);
            (key, path)
        })
        .collect()
}

/// Render the rewritten playlist for one multi-segment pool.
pub fn build_local_playlist(pool: &SegmentPool, temp_dir: &Path) -> String {
    let keys = key_files(pool, temp_dir);
    let target_duration = pool
        .segments
        .iter()
        .map(|s| s.duration)
        .fold(0.0f64, f64::max)
        .ceil() as u64;

    let mut out = String::new();
    out.push_str("#EXTM3U\n");
    out.push_str("#EXT-X-VERSION:6\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n");

    let mut current_key: Option<&ContentKey> = None;
    for segment in &pool.segments {
        if segment.init {
            out.push_str(&format!(
                "#EXT-X-MAP:URI=\"{}\"\n",
                segment.file_path(temp_dir).display()
            ));
            continue;
        }

        if segment.key.as_ref() != current_key {
            match &segment.key {
                Some(key) => {
                    let local = keys
                        .iter()
                        .find(|(k, _)| k == key)
                        .map(|(_, path)| path.clone())
                        .unwrap_or_else(|| key_file_path(temp_dir, &pool.id, 0));
                    out.push_str(&format!(
                        "#EXT-X-KEY:METHOD=AES-128,URI=\"{}\"\n",
                        local.display()
                    ));
                }
                None => out.push_str("#EXT-X-KEY:METHOD=NONE\n"),
            }
            current_key = segment.key.as_ref();
        }

        out.push_str(&format!("#EXTINF:{:.5},\n", segment.duration));
        out.push_str(&format!("{}\n", output_path(segment, temp_dir).display()));
    }

    out.push_str("#EXT-X-ENDLIST\n");
    out
}

/// Where the segment's bytes actually land: converted subtitle formats
/// are written under their converted extension at download time.
fn output_path(segment: &Segment, temp_dir: &Path) -> PathBuf {
    let converted = subtitle_output_ext(&segment.ext);
    if converted == segment.ext {
        segment.file_path(temp_dir)
    } else {
        temp_dir.join(format!("{}_{}{converted}", segment.group, segment.number))
    }
}

/// Write the rewritten playlist to `{temp_dir}/{pool.id}.m3u8`.
pub fn write_local_playlist(pool: &SegmentPool, temp_dir: &Path) -> Result<PathBuf, PenguinError> {
    let path = temp_dir.join(format!("{}.m3u8", pool.id));
    std::fs::write(&path, build_local_playlist(pool, temp_dir))?;
    Ok(path)
}
