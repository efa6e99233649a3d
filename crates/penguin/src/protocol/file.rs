//! File pseudo-protocol: the whole remote file is one segment in one
//! unified pool.

use std::path::Path;

use polarity_content::{Stream, TrackKind};

use crate::config::PenguinConfig;
use crate::ffmpeg::FfmpegInput;
use crate::segment::{PoolFormat, PoolIdGenerator, Segment, SegmentPool};

use super::{Extraction, apply_codecs, apply_metadata, subtitle_output_ext, url_extension};

pub fn extract(
    config: &PenguinConfig,
    stream: &Stream,
    temp_dir: &Path,
    ids: &mut PoolIdGenerator,
) -> Extraction {
    let format = if stream.extra_sub {
        PoolFormat::Subtitles
    } else if stream.extra_audio {
        PoolFormat::Audio
    } else {
        PoolFormat::Unified
    };

    let raw_ext = match url_extension(&stream.url) {
        ext if ext.is_empty() => ".bin".to_string(),
        ext => ext,
    };
    let ext = if format == PoolFormat::Subtitles {
        subtitle_output_ext(&raw_ext).to_string()
    } else {
        raw_ext.clone()
    };

    let mut pool = SegmentPool::new(format, ids.next_id(format), 0);
    pool.push(Segment {
        url: stream.url.clone(),
        number: 0,
        kind: format.track_kind(),
        key: stream.key.clone(),
        group: pool.id.clone(),
        duration: 0.0,
        init: false,
        ext: raw_ext,
        byte_range: None,
        finished: false,
    });

    let kinds: &[TrackKind] = match format {
        PoolFormat::Unified => &TrackKind::ALL,
        PoolFormat::Audio => &[TrackKind::Audio],
        PoolFormat::Subtitles => &[TrackKind::Subtitles],
        PoolFormat::Video => &[TrackKind::Video],
    };

    let mut input = FfmpegInput::new(temp_dir.join(format!("{}_0{ext}", pool.id)));
    // Rules key on the downloaded file's extension, e.g. `.vtt → srt`.
    apply_codecs(&mut input, config, kinds, &ext);
    apply_metadata(&mut input, stream, kinds);

    Extraction {
        inputs: vec![input],
        pools: vec![pool],
        concat: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PenguinConfig;

    #[test]
    fn whole_file_becomes_one_unified_segment() {
        let config = PenguinConfig::default();
        let stream = Stream::new("http://example/clip.mp4", "main").preferred();
        let mut ids = PoolIdGenerator::default();
        let out = extract(&config, &stream, Path::new("/tmp/Movie"), &mut ids);

        assert_eq!(out.pools.len(), 1);
        let pool = &out.pools[0];
        assert_eq!(pool.id, "unified0");
        assert_eq!(pool.format, PoolFormat::Unified);
        assert_eq!(pool.total_segments(), 1);
        assert_eq!(pool.segments[0].number, 0);
        assert_eq!(pool.segments[0].ext, ".mp4");
        assert!(!out.concat);

        assert_eq!(
            out.inputs[0].path,
            Path::new("/tmp/Movie/unified0_0.mp4")
        );
        assert!(!out.inputs[0].hls_playlist);
    }

    #[test]
    fn subtitle_file_pool_converts_extension() {
        let config = PenguinConfig::default();
        let stream = Stream::new("https://cdn/sub.ttml2", "sub").extra_sub();
        let mut ids = PoolIdGenerator::default();
        let out = extract(&config, &stream, Path::new("/tmp/E01"), &mut ids);

        let pool = &out.pools[0];
        assert_eq!(pool.format, PoolFormat::Subtitles);
        // Download target keeps the source extension; the input points at
        // the converted file.
        assert_eq!(pool.segments[0].ext, ".ttml2");
        assert_eq!(out.inputs[0].path, Path::new("/tmp/E01/subtitles0_0.srt"));
    }

    #[test]
    fn vtt_codec_rule_applies() {
        let config = PenguinConfig::default();
        let stream = Stream::new("https://cdn/sub.vtt", "sub").extra_sub();
        let mut ids = PoolIdGenerator::default();
        let out = extract(&config, &stream, Path::new("/tmp/E01"), &mut ids);
        assert_eq!(out.inputs[0].codecs[&TrackKind::Subtitles], "srt");
    }
}
