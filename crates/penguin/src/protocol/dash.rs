//! DASH protocol handler: one pool per adaptation set, init segment at
//! number −1, `SegmentTemplate` expansion with `$Number$`/`$Time$`
//! substitution. DASH contents always run the binary-concat pass.

use std::path::Path;

use polarity_content::{Stream, TrackKind};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::PenguinConfig;
use crate::error::PenguinError;
use crate::ffmpeg::FfmpegInput;
use crate::segment::{
    INIT_SEGMENT_NUMBER, PoolFormat, PoolIdGenerator, Segment, SegmentPool,
};

use super::{Extraction, apply_codecs, apply_metadata, url_extension};

#[derive(Deserialize, Debug)]
#[serde(rename = "MPD")]
struct Mpd {
    #[serde(rename = "@mediaPresentationDuration")]
    media_presentation_duration: Option<String>,
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Deserialize, Debug)]
struct Period {
    #[serde(rename = "AdaptationSet", default)]
    adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Deserialize, Debug)]
struct AdaptationSet {
    #[serde(rename = "@contentType")]
    content_type: Option<String>,
    #[serde(rename = "@mimeType")]
    mime_type: Option<String>,
    #[serde(rename = "@lang")]
    lang: Option<String>,
    #[serde(rename = "SegmentTemplate")]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "Representation", default)]
    representations: Vec<Representation>,
}

#[derive(Deserialize, Debug)]
struct Representation {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@bandwidth")]
    bandwidth: Option<u64>,
    #[serde(rename = "@height")]
    height: Option<u32>,
    #[serde(rename = "@mimeType")]
    mime_type: Option<String>,
    #[serde(rename = "SegmentTemplate")]
    segment_template: Option<SegmentTemplate>,
}

#[derive(Deserialize, Debug, Clone)]
struct SegmentTemplate {
    #[serde(rename = "@media")]
    media: Option<String>,
    #[serde(rename = "@initialization")]
    initialization: Option<String>,
    #[serde(rename = "@startNumber")]
    start_number: Option<u64>,
    #[serde(rename = "@duration")]
    duration: Option<u64>,
    #[serde(rename = "@timescale")]
    timescale: Option<u64>,
    #[serde(rename = "SegmentTimeline")]
    timeline: Option<SegmentTimeline>,
}

#[derive(Deserialize, Debug, Clone)]
struct SegmentTimeline {
    #[serde(rename = "S", default)]
    entries: Vec<TimelineEntry>,
}

#[derive(Deserialize, Debug, Clone)]
struct TimelineEntry {
    #[serde(rename = "@t")]
    t: Option<u64>,
    #[serde(rename = "@d")]
    d: u64,
    #[serde(rename = "@r")]
    r: Option<i64>,
}

pub async fn extract(
    client: &reqwest::Client,
    config: &PenguinConfig,
    stream: &Stream,
    temp_dir: &Path,
    ids: &mut PoolIdGenerator,
) -> Result<Extraction, PenguinError> {
    let base = Url::parse(&stream.url)
        .map_err(|e| PenguinError::manifest(format!("bad manifest url: {e}")))?;
    let response = client.get(&stream.url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(PenguinError::http_status(status, stream.url.clone()));
    }
    let body = response.text().await?;

    build_extraction(&body, &base, config, stream, temp_dir, ids)
}

/// Parse the MPD document and produce pools + inputs. Split from the
/// fetch so manifests can be processed from fixtures.
pub(crate) fn build_extraction(
    manifest: &str,
    base: &Url,
    config: &PenguinConfig,
    stream: &Stream,
    temp_dir: &Path,
    ids: &mut PoolIdGenerator,
) -> Result<Extraction, PenguinError> {
    let mpd: Mpd = quick_xml::de::from_str(manifest)
        .map_err(|e| PenguinError::manifest(format!("unparseable MPD: {e}")))?;
    let presentation_secs = mpd
        .media_presentation_duration
        .as_deref()
        .and_then(parse_iso8601_duration);

    let mut extraction = Extraction {
        concat: true,
        ..Extraction::default()
    };

    let period = mpd
        .periods
        .first()
        .ok_or_else(|| PenguinError::manifest("MPD has no Period"))?;

    for set in &period.adaptation_sets {
        let format = match adaptation_format(set) {
            Some(format) => format,
            None => {
                debug!(content_type = ?set.content_type, "adaptation set skipped");
                continue;
            }
        };

        let representation = pick_representation(&set.representations, config.resolution)
            .ok_or_else(|| PenguinError::manifest("adaptation set has no representations"))?;
        let template = representation
            .segment_template
            .as_ref()
            .or(set.segment_template.as_ref())
            .ok_or_else(|| PenguinError::manifest("representation has no SegmentTemplate"))?;

        let mut pool = SegmentPool::new(format, ids.next_id(format), 0);
        expand_template(
            &mut pool,
            template,
            &representation.id,
            base,
            presentation_secs,
            stream,
        )?;
        if pool.segments.is_empty() {
            return Err(PenguinError::manifest("SegmentTemplate expanded to nothing"));
        }

        let kinds: &[TrackKind] = match format {
            PoolFormat::Video | PoolFormat::Unified => &[TrackKind::Video],
            PoolFormat::Audio => &[TrackKind::Audio],
            PoolFormat::Subtitles => &[TrackKind::Subtitles],
        };

        // After the concat pass the init file is the playable track.
        let init_path = pool
            .init_segment_path(temp_dir)
            .ok_or_else(|| PenguinError::manifest("SegmentTemplate has no initialization"))?;
        let mut input = FfmpegInput::new(init_path);
        apply_codecs(&mut input, config, kinds, ".mp4");
        apply_metadata(&mut input, stream, kinds);
        if let Some(lang) = &set.lang {
            input.add_metadata(format.track_kind(), "language", lang.clone());
        }

        extraction.inputs.push(input);
        extraction.pools.push(pool);
    }

    if extraction.pools.is_empty() {
        return Err(PenguinError::manifest("MPD has no usable adaptation sets"));
    }
    Ok(extraction)
}

fn adaptation_format(set: &AdaptationSet) -> Option<PoolFormat> {
    let tag = set
        .content_type
        .clone()
        .or_else(|| {
            set.mime_type
                .as_ref()
                .or_else(|| {
                    set.representations
                        .first()
                        .and_then(|r| r.mime_type.as_ref())
                })
                .and_then(|m| m.split('/').next())
                .map(str::to_string)
        })?
        .to_ascii_lowercase();
    match tag.as_str() {
        "video" => Some(PoolFormat::Video),
        "audio" => Some(PoolFormat::Audio),
        "text" | "application" => Some(PoolFormat::Subtitles),
        _ => None,
    }
}

fn pick_representation(
    representations: &[Representation],
    preferred_height: u32,
) -> Option<&Representation> {
    representations.iter().min_by_key(|rep| {
        let distance = rep
            .height
            .map(|h| (h as i64 - preferred_height as i64).unsigned_abs())
            .unwrap_or(u64::MAX);
        (distance, std::cmp::Reverse(rep.bandwidth.unwrap_or(0)))
    })
}

fn expand_template(
    pool: &mut SegmentPool,
    template: &SegmentTemplate,
    representation_id: &str,
    base: &Url,
    presentation_secs: Option<f64>,
    _stream: &Stream,
) -> Result<(), PenguinError> {
    let media = template
        .media
        .as_deref()
        .ok_or_else(|| PenguinError::manifest("SegmentTemplate has no media attribute"))?;
    let init = template
        .initialization
        .as_deref()
        .ok_or_else(|| PenguinError::manifest("SegmentTemplate has no initialization"))?;
    let timescale = template.timescale.unwrap_or(1).max(1);
    let kind = pool.format.track_kind();

    let init_uri = substitute(init, representation_id, None, None);
    let init_url = base
        .join(&init_uri)
        .map_err(|e| PenguinError::manifest(format!("bad init uri: {e}")))?;
    pool.push(Segment {
        url: init_url.to_string(),
        number: INIT_SEGMENT_NUMBER,
        kind,
        key: None,
        group: pool.id.clone(),
        duration: 0.0,
        init: true,
        ext: ext_or(init_url.as_str(), ".mp4"),
        byte_range: None,
        finished: false,
    });

    let start_number = template.start_number.unwrap_or(1);

    if let Some(timeline) = &template.timeline {
        let mut time = 0u64;
        let mut number = start_number;
        let mut index = 0i64;
        for entry in &timeline.entries {
            if let Some(t) = entry.t {
                time = t;
            }
            let repeats = entry.r.unwrap_or(0).max(0) as u64 + 1;
            for _ in 0..repeats {
                push_media_segment(
                    pool, media, representation_id, base, number, time, index, timescale,
                    entry.d, kind,
                )?;
                time += entry.d;
                number += 1;
                index += 1;
            }
        }
    } else {
        let duration = template
            .duration
            .ok_or_else(|| PenguinError::manifest("SegmentTemplate has neither timeline nor duration"))?;
        let segment_secs = duration as f64 / timescale as f64;
        let total_secs = presentation_secs
            .ok_or_else(|| PenguinError::manifest("MPD has no mediaPresentationDuration"))?;
        let count = (total_secs / segment_secs).ceil() as u64;
        let mut time = 0u64;
        for offset in 0..count {
            push_media_segment(
                pool,
                media,
                representation_id,
                base,
                start_number + offset,
                time,
                offset as i64,
                timescale,
                duration,
                kind,
            )?;
            time += duration;
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn push_media_segment(
    pool: &mut SegmentPool,
    media: &str,
    representation_id: &str,
    base: &Url,
    number: u64,
    time: u64,
    index: i64,
    timescale: u64,
    duration_units: u64,
    kind: TrackKind,
) -> Result<(), PenguinError> {
    let uri = substitute(media, representation_id, Some(number), Some(time));
    let url = base
        .join(&uri)
        .map_err(|e| PenguinError::manifest(format!("bad media uri: {e}")))?;
    pool.push(Segment {
        url: url.to_string(),
        number: index,
        kind,
        key: None,
        group: pool.id.clone(),
        duration: duration_units as f64 / timescale as f64,
        init: false,
        ext: ext_or(url.as_str(), ".m4s"),
        byte_range: None,
        finished: false,
    });
    Ok(())
}

/// `$RepresentationID$`, `$Number$` (with optional `%0Nd` width) and
/// `$Time$` substitution.
pub(crate) fn substitute(
    template: &str,
    representation_id: &str,
    number: Option<u64>,
    time: Option<u64>,
) -> String {
    let mut out = template.replace("$RepresentationID$", representation_id);
    if let Some(time) = time {
        out = out.replace("$Time$", &time.to_string());
    }
    if let Some(number) = number {
        // Width-formatted form first: $Number%05d$.
        while let Some(start) = out.find("$Number%0") {
            let rest = &out[start..];
            let Some(end) = rest.find("d$") else { break };
            let width: usize = rest[9..end].parse().unwrap_or(0);
            let formatted = format!("{number:0width$}");
            out = format!("{}{}{}", &out[..start], formatted, &out[start + end + 2..]);
        }
        out = out.replace("$Number$", &number.to_string());
    }
    out.replace("$$", "$")
}

fn ext_or(url: &str, fallback: &str) -> String {
    match url_extension(url) {
        ext if ext.is_empty() => fallback.to_string(),
        ext => ext,
    }
}

/// Parse `PT1H2M3.5S`-style durations into seconds.
pub(crate) fn parse_iso8601_duration(raw: &str) -> Option<f64> {
    let rest = raw.strip_prefix("PT").or_else(|| raw.strip_prefix("pt"))?;
    let mut seconds = 0.0;
    let mut current = String::new();
    for c in rest.chars() {
        match c {
            '0'..='9' | '.' => current.push(c),
            'H' | 'h' => {
                seconds += current.parse::<f64>().ok()? * 3600.0;
                current.clear();
            }
            'M' | 'm' => {
                seconds += current.parse::<f64>().ok()? * 60.0;
                current.clear();
            }
            'S' | 's' => {
                seconds += current.parse::<f64>().ok()?;
                current.clear();
            }
            _ => return None,
        }
    }
    Some(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT20S">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="v/$RepresentationID$/$Number$.m4s" initialization="v/$RepresentationID$/init.mp4" startNumber="1" duration="4" timescale="1"/>
      <Representation id="v720" bandwidth="2500000" height="720"/>
      <Representation id="v1080" bandwidth="5000000" height="1080"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4" lang="ja">
      <SegmentTemplate media="a/$RepresentationID$/$Time$.m4s" initialization="a/$RepresentationID$/init.mp4" timescale="48000">
        <SegmentTimeline>
          <S t="0" d="192000" r="1"/>
          <S d="96000"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="a0" bandwidth="128000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    fn extraction() -> Extraction {
        let config = PenguinConfig {
            resolution: 1080,
            ..PenguinConfig::default()
        };
        let stream = Stream::new("https://cdn.example/dash/manifest.mpd", "main");
        let base = Url::parse("https://cdn.example/dash/manifest.mpd").unwrap();
        let mut ids = PoolIdGenerator::default();
        build_extraction(
            MPD,
            &base,
            &config,
            &stream,
            Path::new("/tmp/E01"),
            &mut ids,
        )
        .unwrap()
    }

    #[test]
    fn pools_per_adaptation_set_with_init_segments() {
        let out = extraction();
        assert!(out.concat);
        assert_eq!(out.pools.len(), 2);

        let video = &out.pools[0];
        assert_eq!(video.id, "video0");
        // 20s / 4s segments = 5 media segments + init.
        assert_eq!(video.total_segments(), 6);
        assert_eq!(video.segments[0].number, INIT_SEGMENT_NUMBER);
        assert!(video.segments[0].init);
        assert_eq!(
            video.segments[0].url,
            "https://cdn.example/dash/v/v1080/init.mp4"
        );
        assert_eq!(video.segments[1].url, "https://cdn.example/dash/v/v1080/1.m4s");
        assert_eq!(video.segments[5].url, "https://cdn.example/dash/v/v1080/5.m4s");

        let audio = &out.pools[1];
        assert_eq!(audio.id, "audio0");
        // Timeline: two 4s entries (r=1) + one 2s entry + init.
        assert_eq!(audio.total_segments(), 4);
        assert_eq!(audio.segments[1].url, "https://cdn.example/dash/a/a0/0.m4s");
        assert_eq!(
            audio.segments[2].url,
            "https://cdn.example/dash/a/a0/192000.m4s"
        );
        assert!((audio.segments[1].duration - 4.0).abs() < 1e-9);
        assert!((audio.segments[3].duration - 2.0).abs() < 1e-9);
    }

    #[test]
    fn representation_ranking_prefers_configured_height() {
        let out = extraction();
        // resolution = 1080 picked v1080 above.
        assert!(out.pools[0].segments[1].url.contains("v1080"));
    }

    #[test]
    fn inputs_point_at_init_files() {
        let out = extraction();
        assert_eq!(out.inputs[0].path, Path::new("/tmp/E01/video0_-1.mp4"));
        assert_eq!(out.inputs[1].path, Path::new("/tmp/E01/audio0_-1.mp4"));
        // Audio language flows from the adaptation set.
        let audio_meta = &out.inputs[1].metadata[&TrackKind::Audio];
        assert!(audio_meta.contains(&("language".to_string(), "ja".to_string())));
    }

    #[test]
    fn number_width_substitution() {
        assert_eq!(
            substitute("seg-$Number%05d$.m4s", "v0", Some(7), None),
            "seg-00007.m4s"
        );
        assert_eq!(
            substitute("$RepresentationID$/$Number$.m4s", "v0", Some(12), None),
            "v0/12.m4s"
        );
        assert_eq!(substitute("t/$Time$.m4s", "v0", None, Some(96000)), "t/96000.m4s");
    }

    #[test]
    fn iso_duration_parsing() {
        assert_eq!(parse_iso8601_duration("PT20S"), Some(20.0));
        assert_eq!(parse_iso8601_duration("PT1H2M3.5S"), Some(3723.5));
        assert_eq!(parse_iso8601_duration("P1D"), None);
    }
}
