//! Stream protocol handlers: each turns a manifest URL into segment pools
//! plus the matching multiplexer inputs. Dispatch is by URL extension.

pub mod dash;
pub mod file;
pub mod hls;

use std::path::Path;

use polarity_content::{Stream, TrackKind};

use crate::config::PenguinConfig;
use crate::error::PenguinError;
use crate::ffmpeg::FfmpegInput;
use crate::segment::{PoolIdGenerator, SegmentPool};

/// What one protocol handler produced for one stream.
#[derive(Debug, Default)]
pub struct Extraction {
    pub pools: Vec<SegmentPool>,
    pub inputs: Vec<FfmpegInput>,
    /// The downloader must run the binary-concat pass (DASH pattern).
    pub concat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    Hls,
    Dash,
    File,
}

/// Extension of a URL's path, query stripped, lowercased, with the dot.
pub fn url_extension(url: &str) -> String {
    let path = url
        .split_once(['?', '#'])
        .map(|(path, _)| path)
        .unwrap_or(url);
    let name = path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path);
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => format!(".{}", ext.to_ascii_lowercase()),
        _ => String::new(),
    }
}

/// Protocol for a stream URL. Anything that is not an HLS playlist or a
/// DASH manifest is fetched as a plain file.
pub fn protocol_for_url(url: &str) -> ProtocolKind {
    match url_extension(url).as_str() {
        ".m3u" | ".m3u8" => ProtocolKind::Hls,
        ".mpd" => ProtocolKind::Dash,
        _ => ProtocolKind::File,
    }
}

/// Run the matching protocol handler for one stream.
pub async fn extract_stream(
    client: &reqwest::Client,
    config: &PenguinConfig,
    stream: &Stream,
    temp_dir: &Path,
    ids: &mut PoolIdGenerator,
) -> Result<Extraction, PenguinError> {
    match protocol_for_url(&stream.url) {
        ProtocolKind::Hls => hls::extract(client, config, stream, temp_dir, ids).await,
        ProtocolKind::Dash => dash::extract(client, config, stream, temp_dir, ids).await,
        ProtocolKind::File => Ok(file::extract(config, stream, temp_dir, ids)),
    }
}

/// Subtitle extensions are converted at download time; the input path must
/// point at the converted file.
pub fn subtitle_output_ext(ext: &str) -> &str {
    if ext.eq_ignore_ascii_case(".ttml2") {
        ".srt"
    } else {
        ext
    }
}

/// Apply default codecs and per-extension rules for one pool's input.
///
/// Rules are keyed per input: the extension considered is this pool's, so
/// two subtitle pools with different extensions get independent codecs.
pub fn apply_codecs(
    input: &mut FfmpegInput,
    config: &PenguinConfig,
    kinds: &[TrackKind],
    pool_ext: &str,
) {
    for kind in kinds {
        let codec = config
            .ffmpeg
            .codec_rules
            .iter()
            .find(|rule| rule.kind == *kind && rule.ext.eq_ignore_ascii_case(pool_ext))
            .map(|rule| rule.codec.clone())
            .or_else(|| config.ffmpeg.codecs.get(kind).cloned())
            .unwrap_or_else(|| "copy".to_string());
        input.set_codec(*kind, codec);
    }
}

/// Copy stream-level language/title metadata for the given kinds.
pub fn apply_metadata(input: &mut FfmpegInput, stream: &Stream, kinds: &[TrackKind]) {
    for kind in kinds {
        if let Some(language) = stream.language.get(kind) {
            input.add_metadata(*kind, "language", language.clone());
        }
        if let Some(name) = stream.name.get(kind) {
            input.add_metadata(*kind, "title", name.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_extraction() {
        assert_eq!(url_extension("https://cdn/v/master.m3u8?token=x"), ".m3u8");
        assert_eq!(url_extension("https://cdn/v/manifest.mpd"), ".mpd");
        assert_eq!(url_extension("https://cdn/clip.MP4"), ".mp4");
        assert_eq!(url_extension("https://cdn/path/"), "");
        assert_eq!(url_extension("https://cdn/noext"), "");
        assert_eq!(url_extension("https://cdn/sub.es.vtt#frag"), ".vtt");
    }

    #[test]
    fn dispatch_by_extension() {
        assert_eq!(protocol_for_url("https://cdn/a.m3u8"), ProtocolKind::Hls);
        assert_eq!(protocol_for_url("https://cdn/a.m3u"), ProtocolKind::Hls);
        assert_eq!(protocol_for_url("https://cdn/a.mpd"), ProtocolKind::Dash);
        assert_eq!(protocol_for_url("https://cdn/a.mp4"), ProtocolKind::File);
        assert_eq!(protocol_for_url("https://cdn/a"), ProtocolKind::File);
    }

    #[test]
    fn ttml2_maps_to_srt() {
        assert_eq!(subtitle_output_ext(".ttml2"), ".srt");
        assert_eq!(subtitle_output_ext(".vtt"), ".vtt");
    }

    #[test]
    fn codec_rules_override_defaults_by_extension() {
        let config = PenguinConfig::default();
        let mut input = FfmpegInput::new("/tmp/subtitles0_0.vtt".into());
        apply_codecs(&mut input, &config, &[TrackKind::Subtitles], ".vtt");
        assert_eq!(input.codecs[&TrackKind::Subtitles], "srt");

        let mut input = FfmpegInput::new("/tmp/subtitles1_0.ass".into());
        apply_codecs(&mut input, &config, &[TrackKind::Subtitles], ".ass");
        assert_eq!(input.codecs[&TrackKind::Subtitles], "copy");
    }
}
