//! Response models for the page + JSON-LD hybrid API.

use serde::Deserialize;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FormatPage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image: Option<PageImage>,
    #[serde(default)]
    pub seasons: Vec<SeasonRef>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PageImage {
    #[serde(default)]
    pub path_horizontal: Option<String>,
    #[serde(default)]
    pub path_vertical: Option<String>,
}

impl PageImage {
    pub fn sources(&self) -> Vec<String> {
        [&self.path_horizontal, &self.path_vertical]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SeasonRef {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Season number and episode count live only in the JSON-LD document;
/// the page payload carries the display info. The upstream API splits
/// these deliberately.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SeasonJsonLd {
    #[serde(default)]
    pub season_number: Option<u32>,
    #[serde(default)]
    pub number_of_episodes: Option<u32>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RowSearchPage {
    #[serde(default)]
    pub item_rows: Vec<RowItem>,
    pub page_info: PageInfo,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RowItem {
    pub content_id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub last: bool,
    #[serde(default)]
    pub page_number: u32,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EpisodePage {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub number_of_episode: Option<u32>,
    #[serde(default)]
    pub image: Option<PageImage>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    #[serde(default)]
    pub sources: Vec<PlayerSource>,
    #[serde(default)]
    pub subtitles: Vec<PlayerSubtitle>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSource {
    pub src: String,
    /// MIME type, e.g. `application/vnd.apple.mpegurl` or
    /// `application/dash+xml`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Video codec tag when the site distinguishes HEVC ladders.
    #[serde(default)]
    pub codec: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSubtitle {
    pub src: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_search_page_parses() {
        let raw = r#"{
            "itemRows": [
                {"contentId": "5f9e3b2a1c4d6e7f8a9b0c1d", "title": "Capítulo 1"},
                {"contentId": "5f9e3b2a1c4d6e7f8a9b0c1e", "title": "Capítulo 2"}
            ],
            "pageInfo": {"last": false, "pageNumber": 0}
        }"#;
        let page: RowSearchPage = serde_json::from_str(raw).unwrap();
        assert_eq!(page.item_rows.len(), 2);
        assert!(!page.page_info.last);
    }

    #[test]
    fn player_response_parses() {
        let raw = r#"{
            "sources": [
                {"src": "https://cdn/main.mpd", "type": "application/dash+xml"},
                {"src": "https://cdn/main.m3u8", "type": "application/vnd.apple.mpegurl", "codec": "avc"},
                {"src": "https://cdn/hevc.m3u8", "type": "application/vnd.apple.mpegurl", "codec": "hevc"}
            ],
            "subtitles": [{"src": "https://cdn/es.vtt", "language": "es", "name": "Español"}]
        }"#;
        let player: PlayerResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(player.sources.len(), 3);
        assert_eq!(player.sources[2].codec.as_deref(), Some("hevc"));
        assert_eq!(player.subtitles[0].language, "es");
    }

    #[test]
    fn jsonld_season_parses() {
        let raw = r#"{"seasonNumber": 3, "numberOfEpisodes": 13}"#;
        let season: SeasonJsonLd = serde_json::from_str(raw).unwrap();
        assert_eq!(season.season_number, Some(3));
        assert_eq!(season.number_of_episodes, Some(13));
    }
}
