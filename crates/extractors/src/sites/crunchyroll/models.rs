//! Response models for the token-bucket catalog API.

use rustc_hash::FxHashMap;
use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Deserialize, Debug)]
pub struct IndexResponse {
    pub cms: CmsInfo,
}

/// Signed bucket every catalog request is scoped by. The bucket path
/// encodes country and maturity rating, e.g. `/us/M3`.
#[derive(Deserialize, Debug, Clone)]
pub struct CmsInfo {
    pub bucket: String,
    pub policy: String,
    pub signature: String,
    pub key_pair_id: String,
}

#[derive(Deserialize, Debug)]
pub struct SeriesResponse {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub season_count: u32,
    #[serde(default)]
    pub episode_count: u32,
    #[serde(default)]
    pub series_launch_year: Option<u32>,
    #[serde(default)]
    pub images: ImageSet,
}

#[derive(Deserialize, Debug, Default)]
pub struct ImageSet {
    #[serde(default)]
    pub poster_tall: Vec<Vec<Image>>,
    #[serde(default)]
    pub poster_wide: Vec<Vec<Image>>,
    #[serde(default)]
    pub thumbnail: Vec<Vec<Image>>,
}

impl ImageSet {
    /// Largest rendition of every image family, flattened.
    pub fn sources(&self) -> Vec<String> {
        [&self.poster_tall, &self.poster_wide, &self.thumbnail]
            .into_iter()
            .filter_map(|family| family.first())
            .filter_map(|sizes| sizes.last())
            .map(|img| img.source.clone())
            .collect()
    }
}

#[derive(Deserialize, Debug)]
pub struct Image {
    pub source: String,
}

#[derive(Deserialize, Debug)]
pub struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u32,
}

#[derive(Deserialize, Debug)]
pub struct SeasonItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub season_number: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub number_of_episodes: u32,
}

#[derive(Deserialize, Debug)]
pub struct EpisodeItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub episode_number: Option<u32>,
    #[serde(default)]
    pub season_number: u32,
    #[serde(default)]
    pub season_title: String,
    #[serde(default)]
    pub series_title: String,
    #[serde(default)]
    pub images: ImageSet,
    /// Absent when the episode is not playable for the current account
    /// (premium-only, region-locked...).
    #[serde(default)]
    pub playback: Option<String>,
    #[serde(default)]
    pub is_premium_only: bool,
}

#[derive(Deserialize, Debug)]
pub struct StreamsResponse {
    #[serde(default)]
    pub audio_locale: String,
    pub streams: StreamKinds,
    #[serde(default)]
    pub subtitles: FxHashMap<String, SubtitleEntry>,
}

#[derive(Deserialize, Debug, Default)]
pub struct StreamKinds {
    #[serde(default)]
    pub adaptive_hls: FxHashMap<String, VariantEntry>,
    #[serde(default)]
    pub adaptive_dash: FxHashMap<String, VariantEntry>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct VariantEntry {
    #[serde(default)]
    pub hardsub_locale: String,
    pub url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SubtitleEntry {
    pub locale: String,
    pub url: String,
    #[serde(default)]
    pub format: String,
}

#[derive(Deserialize, Debug)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<SearchBucket>,
}

#[derive(Deserialize, Debug)]
pub struct SearchBucket {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

#[derive(Deserialize, Debug)]
pub struct SearchItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub series_launch_year: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streams_payload_parses() {
        let raw = r#"{
            "audio_locale": "ja-JP",
            "streams": {
                "adaptive_hls": {
                    "": {"hardsub_locale": "", "url": "https://cdn/raw.m3u8"},
                    "en-US": {"hardsub_locale": "en-US", "url": "https://cdn/en.m3u8"}
                }
            },
            "subtitles": {
                "es-ES": {"locale": "es-ES", "url": "https://cdn/es.vtt", "format": "vtt"}
            }
        }"#;
        let parsed: StreamsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.audio_locale, "ja-JP");
        assert_eq!(parsed.streams.adaptive_hls.len(), 2);
        assert_eq!(parsed.subtitles["es-ES"].format, "vtt");
    }

    #[test]
    fn index_payload_parses() {
        let raw = r#"{"cms": {"bucket": "/us/M2", "policy": "p", "signature": "s", "key_pair_id": "k", "expires": "2026-01-01T00:00:00Z"}}"#;
        let parsed: IndexResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.cms.bucket, "/us/M2");
    }

    #[test]
    fn episode_collection_parses_with_gaps() {
        let raw = r#"{"total": 2, "items": [
            {"id": "E1", "title": "One", "episode_number": 1, "season_number": 1},
            {"id": "E2", "title": "Recap", "episode_number": null, "is_premium_only": true}
        ]}"#;
        let parsed: Collection<EpisodeItem> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].episode_number, Some(1));
        assert_eq!(parsed.items[1].episode_number, None);
        assert!(parsed.items[1].is_premium_only);
    }
}
