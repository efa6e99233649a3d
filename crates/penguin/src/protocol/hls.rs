//! HLS protocol handler: master playlist variant selection, media
//! playlist segmentation, AES-128 key tracking, external audio and
//! subtitle media entries.

use std::path::Path;

use m3u8_rs::{
    AlternativeMedia, AlternativeMediaType, MasterPlaylist, MediaPlaylist, Playlist,
    VariantStream,
};
use polarity_content::{ContentKey, Stream, TrackKind};
use tracing::{debug, warn};
use url::Url;

use crate::config::PenguinConfig;
use crate::error::PenguinError;
use crate::ffmpeg::FfmpegInput;
use crate::segment::{
    ByteRange, INIT_SEGMENT_NUMBER, PoolFormat, PoolIdGenerator, Segment, SegmentPool,
};

use super::{Extraction, apply_codecs, apply_metadata, subtitle_output_ext, url_extension};

pub async fn extract(
    client: &reqwest::Client,
    config: &PenguinConfig,
    stream: &Stream,
    temp_dir: &Path,
    ids: &mut PoolIdGenerator,
) -> Result<Extraction, PenguinError> {
    let base = Url::parse(&stream.url)
        .map_err(|e| PenguinError::playlist(format!("bad playlist url: {e}")))?;
    let body = fetch_bytes(client, &stream.url).await?;

    match m3u8_rs::parse_playlist_res(&body) {
        Ok(Playlist::MasterPlaylist(master)) => {
            extract_master(client, config, stream, &master, &base, temp_dir, ids).await
        }
        Ok(Playlist::MediaPlaylist(media)) => {
            let format = if stream.extra_sub {
                PoolFormat::Subtitles
            } else if stream.extra_audio {
                PoolFormat::Audio
            } else {
                PoolFormat::Unified
            };
            let pool = build_media_pool(&media, &base, format, ids.next_id(format), stream)?;
            let input = playlist_input(&pool, stream, config, temp_dir);
            Ok(Extraction {
                pools: vec![pool],
                inputs: vec![input],
                concat: false,
            })
        }
        Err(e) => Err(PenguinError::playlist(format!(
            "unparseable playlist {}: {e}",
            stream.url
        ))),
    }
}

async fn extract_master(
    client: &reqwest::Client,
    config: &PenguinConfig,
    stream: &Stream,
    master: &MasterPlaylist,
    base: &Url,
    temp_dir: &Path,
    ids: &mut PoolIdGenerator,
) -> Result<Extraction, PenguinError> {
    let variant = pick_variant(&master.variants, config.resolution)
        .ok_or_else(|| PenguinError::playlist("master playlist has no variants"))?;
    debug!(
        uri = %variant.uri,
        bandwidth = variant.bandwidth,
        "variant selected"
    );

    let audio_alternatives: Vec<&AlternativeMedia> = master
        .alternatives
        .iter()
        .filter(|alt| {
            alt.media_type == AlternativeMediaType::Audio
                && alt.uri.is_some()
                && variant
                    .audio
                    .as_ref()
                    .is_none_or(|group| *group == alt.group_id)
        })
        .collect();

    // With separate audio media the variant carries video only.
    let main_format = if audio_alternatives.is_empty() {
        PoolFormat::Unified
    } else {
        PoolFormat::Video
    };

    let mut extraction = Extraction::default();

    let variant_url = join(base, &variant.uri)?;
    let media = fetch_media_playlist(client, &variant_url).await?;
    let pool = build_media_pool(
        &media,
        &variant_url,
        main_format,
        ids.next_id(main_format),
        stream,
    )?;
    extraction.inputs.push(playlist_input(&pool, stream, config, temp_dir));
    extraction.pools.push(pool);

    for alt in audio_alternatives {
        let alt_url = join(base, alt.uri.as_deref().unwrap_or_default())?;
        let media = fetch_media_playlist(client, &alt_url).await?;
        let mut pool = build_media_pool(
            &media,
            &alt_url,
            PoolFormat::Audio,
            ids.next_id(PoolFormat::Audio),
            stream,
        )?;
        pool.track_id = extraction
            .pools
            .iter()
            .filter(|p| p.format == PoolFormat::Audio)
            .count() as u32;
        let mut input = playlist_input(&pool, stream, config, temp_dir);
        if let Some(language) = &alt.language {
            input.add_metadata(TrackKind::Audio, "language", language.clone());
        }
        input.add_metadata(TrackKind::Audio, "title", alt.name.clone());
        extraction.inputs.push(input);
        extraction.pools.push(pool);
    }

    for alt in master
        .alternatives
        .iter()
        .filter(|alt| alt.media_type == AlternativeMediaType::Subtitles && alt.uri.is_some())
    {
        match subtitle_extraction(client, config, stream, alt, base, temp_dir, ids).await {
            Ok((pool, input)) => {
                extraction.pools.push(pool);
                extraction.inputs.push(input);
            }
            Err(e) => warn!(name = %alt.name, error = %e, "subtitle media dropped"),
        }
    }

    Ok(extraction)
}

/// External SUBTITLES entries are either a sub-playlist (URI ends `.m3u*`
/// or the body opens with `#EXTM3U`) or a single degenerate one-segment
/// pool pointing at the subtitle file itself.
async fn subtitle_extraction(
    client: &reqwest::Client,
    config: &PenguinConfig,
    stream: &Stream,
    alt: &AlternativeMedia,
    base: &Url,
    temp_dir: &Path,
    ids: &mut PoolIdGenerator,
) -> Result<(SegmentPool, FfmpegInput), PenguinError> {
    let uri = alt.uri.as_deref().unwrap_or_default();
    let sub_url = join(base, uri)?;
    let ext = url_extension(sub_url.as_str());

    let is_playlist = if ext == ".m3u" || ext == ".m3u8" {
        true
    } else if ext.is_empty() {
        let body = fetch_bytes(client, sub_url.as_str()).await?;
        body.starts_with(b"#EXTM3U")
    } else {
        false
    };

    let pool = if is_playlist {
        let media = fetch_media_playlist(client, &sub_url).await?;
        build_media_pool(
            &media,
            &sub_url,
            PoolFormat::Subtitles,
            ids.next_id(PoolFormat::Subtitles),
            stream,
        )?
    } else {
        degenerate_subtitle_pool(sub_url.as_str(), ids)
    };

    let mut input = playlist_input(&pool, stream, config, temp_dir);
    if let Some(language) = &alt.language {
        input.add_metadata(TrackKind::Subtitles, "language", language.clone());
    }
    input.add_metadata(TrackKind::Subtitles, "title", alt.name.clone());
    Ok((pool, input))
}

/// A one-segment pool for a plain subtitle file referenced from a master
/// playlist.
pub(crate) fn degenerate_subtitle_pool(url: &str, ids: &mut PoolIdGenerator) -> SegmentPool {
    let ext = match url_extension(url) {
        ext if ext.is_empty() => ".vtt".to_string(),
        ext => ext,
    };
    let mut pool = SegmentPool::new(
        PoolFormat::Subtitles,
        ids.next_id(PoolFormat::Subtitles),
        0,
    );
    pool.push(Segment {
        url: url.to_string(),
        number: 0,
        kind: TrackKind::Subtitles,
        key: None,
        group: pool.id.clone(),
        duration: 0.0,
        init: false,
        ext,
        byte_range: None,
        finished: false,
    });
    pool
}

/// Rank variants by `|height − preferred|`; ties pick the higher
/// bandwidth. Variants without a declared resolution rank last.
pub(crate) fn pick_variant(
    variants: &[VariantStream],
    preferred_height: u32,
) -> Option<&VariantStream> {
    variants.iter().min_by_key(|variant| {
        let distance = variant
            .resolution
            .map(|r| (r.height as i64 - preferred_height as i64).unsigned_abs())
            .unwrap_or(u64::MAX);
        (distance, std::cmp::Reverse(variant.bandwidth))
    })
}

/// Turn one media playlist into a pool: `#EXT-X-MAP` becomes the init
/// segment (number −1), `#EXT-X-KEY` attaches an AES-128 key to every
/// following segment until the next key tag, `#EXTINF` entries become
/// numbered segments.
pub(crate) fn build_media_pool(
    playlist: &MediaPlaylist,
    base: &Url,
    format: PoolFormat,
    id: String,
    stream: &Stream,
) -> Result<SegmentPool, PenguinError> {
    let mut pool = SegmentPool::new(format, id, 0);
    let kind = format.track_kind();
    let mut current_key: Option<ContentKey> = stream
        .key
        .as_ref()
        .filter(|k| k.method == polarity_content::KeyMethod::Widevine)
        .cloned();

    for (index, segment) in playlist.segments.iter().enumerate() {
        if let Some(key) = &segment.key {
            current_key = match key.method {
                m3u8_rs::KeyMethod::AES128 => {
                    let uri = key.uri.as_deref().ok_or_else(|| {
                        PenguinError::playlist("AES-128 key without URI")
                    })?;
                    Some(ContentKey::aes128(join(base, uri)?.to_string()))
                }
                m3u8_rs::KeyMethod::None => None,
                ref other => {
                    return Err(PenguinError::playlist(format!(
                        "unsupported key method {other:?}"
                    )));
                }
            };
        }

        if index == 0
            && let Some(map) = &segment.map
        {
            let map_url = join(base, &map.uri)?;
            let ext = match url_extension(map_url.as_str()) {
                ext if ext.is_empty() => ".mp4".to_string(),
                ext => ext,
            };
            pool.push(Segment {
                url: map_url.to_string(),
                number: INIT_SEGMENT_NUMBER,
                kind,
                key: current_key.clone(),
                group: pool.id.clone(),
                duration: 0.0,
                init: true,
                ext,
                byte_range: map.byte_range.as_ref().map(convert_byte_range),
                finished: false,
            });
        }

        let seg_url = join(base, &segment.uri)?;
        let ext = match url_extension(seg_url.as_str()) {
            ext if ext.is_empty() => ".ts".to_string(),
            ext => ext,
        };
        pool.push(Segment {
            url: seg_url.to_string(),
            number: index as i64,
            kind,
            key: current_key.clone(),
            group: pool.id.clone(),
            duration: segment.duration as f64,
            init: false,
            ext,
            byte_range: segment.byte_range.as_ref().map(convert_byte_range),
            finished: false,
        });
    }

    if pool.segments.is_empty() {
        return Err(PenguinError::playlist("media playlist has no segments"));
    }
    Ok(pool)
}

fn convert_byte_range(range: &m3u8_rs::ByteRange) -> ByteRange {
    ByteRange {
        offset: range.offset.unwrap_or(0),
        length: Some(range.length),
    }
}

/// Input for a playlist-backed pool: the locally rewritten playlist for
/// multi-segment pools, the (converted) segment file for degenerate ones.
fn playlist_input(
    pool: &SegmentPool,
    stream: &Stream,
    config: &PenguinConfig,
    temp_dir: &Path,
) -> FfmpegInput {
    let kinds: &[TrackKind] = match pool.format {
        PoolFormat::Unified => &TrackKind::ALL,
        PoolFormat::Video => &[TrackKind::Video],
        PoolFormat::Audio => &[TrackKind::Audio],
        PoolFormat::Subtitles => &[TrackKind::Subtitles],
    };

    let segment_ext = pool
        .segments
        .first()
        .map(|s| s.ext.clone())
        .unwrap_or_default();

    let mut input = if pool.total_segments() == 1 && pool.format == PoolFormat::Subtitles {
        let ext = subtitle_output_ext(&segment_ext).to_string();
        FfmpegInput::new(temp_dir.join(format!("{}_0{ext}", pool.id)))
    } else {
        let mut input = FfmpegInput::new(temp_dir.join(format!("{}.m3u8", pool.id)));
        input.hls_playlist = true;
        input
    };

    let rule_ext = subtitle_output_ext(&segment_ext).to_string();
    apply_codecs(&mut input, config, kinds, &rule_ext);
    apply_metadata(&mut input, stream, kinds);
    input
}

async fn fetch_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, PenguinError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PenguinError::http_status(status, url));
    }
    Ok(response.bytes().await?.to_vec())
}

async fn fetch_media_playlist(
    client: &reqwest::Client,
    url: &Url,
) -> Result<MediaPlaylist, PenguinError> {
    let body = fetch_bytes(client, url.as_str()).await?;
    match m3u8_rs::parse_playlist_res(&body) {
        Ok(Playlist::MediaPlaylist(media)) => Ok(media),
        Ok(Playlist::MasterPlaylist(_)) => Err(PenguinError::playlist(format!(
            "expected media playlist at {url}"
        ))),
        Err(e) => Err(PenguinError::playlist(format!(
            "unparseable media playlist {url}: {e}"
        ))),
    }
}

fn join(base: &Url, uri: &str) -> Result<Url, PenguinError> {
    base.join(uri)
        .map_err(|e| PenguinError::playlist(format!("bad segment uri `{uri}`: {e}")))
}
