use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::stream::Stream;

/// A show as the site presents it: seasons below, leaves below those.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Series {
    pub title: String,
    pub id: String,
    pub synopsis: String,
    pub genres: Vec<String>,
    pub images: Vec<String>,
    pub year: Option<u32>,
    pub season_count: u32,
    pub episode_count: u32,
    pub seasons: Vec<Season>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Season {
    pub title: String,
    pub id: String,
    pub number: u32,
    pub year: Option<u32>,
    pub episode_count: u32,
    pub synopsis: String,
    pub episodes: Vec<Media>,
}

/// Whether a leaf is an episode of something or a standalone movie.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Episode,
    Movie,
}

/// Ancestry a leaf carries with it instead of parent back-pointers.
///
/// The tree is owned by the root `Series` for the duration of extraction;
/// leaves that travel to the download queue only need these display values.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Lineage {
    pub extractor: String,
    pub series_title: String,
    pub series_year: Option<u32>,
    pub season_title: String,
    pub season_number: u32,
}

/// A leaf content item: the unit that yields exactly one final file.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Media {
    pub kind: MediaKind,
    pub title: String,
    pub id: String,
    pub synopsis: String,
    /// Episode number; 0 for movies.
    pub number: u32,
    pub images: Vec<String>,
    pub streams: Vec<Stream>,
    /// Present iff the leaf must not be downloaded; carries the reason
    /// shown in logs and the run summary.
    pub skip_reason: Option<String>,
    pub lineage: Lineage,
    /// Final templated output path, computed once when the leaf is
    /// enqueued for download.
    pub output: Option<PathBuf>,
}

impl Media {
    pub fn episode(title: impl Into<String>, id: impl Into<String>, number: u32) -> Self {
        Self {
            kind: MediaKind::Episode,
            title: title.into(),
            id: id.into(),
            synopsis: String::new(),
            number,
            images: Vec::new(),
            streams: Vec::new(),
            skip_reason: None,
            lineage: Lineage::default(),
            output: None,
        }
    }

    pub fn movie(title: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Movie,
            number: 0,
            ..Self::episode(title, id, 0)
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.skip_reason = Some(reason.into());
    }

    pub fn downloadable(&self) -> bool {
        self.skip_reason.is_none()
    }

    /// `S01E05` for episodes, the title for movies.
    pub fn short_name(&self) -> String {
        match self.kind {
            MediaKind::Episode => format!(
                "S{:02}E{:02}",
                self.lineage.season_number, self.number
            ),
            MediaKind::Movie => self.title.clone(),
        }
    }

    /// The single preferred video stream, if the extractor attached one.
    pub fn preferred_stream(&self) -> Option<&Stream> {
        self.streams.iter().find(|s| s.preferred)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_name_for_episodes_and_movies() {
        let mut ep = Media::episode("The One", "ep1", 5);
        ep.lineage.season_number = 1;
        assert_eq!(ep.short_name(), "S01E05");

        let movie = Media::movie("Big Film", "m1");
        assert_eq!(movie.short_name(), "Big Film");
        assert_eq!(movie.number, 0);
    }

    #[test]
    fn skip_reason_blocks_download() {
        let mut ep = Media::episode("E", "e", 1);
        assert!(ep.downloadable());
        ep.skip("premium only");
        assert!(!ep.downloadable());
        assert_eq!(ep.skip_reason.as_deref(), Some("premium only"));
    }

    #[test]
    fn preferred_stream_lookup() {
        let mut ep = Media::episode("E", "e", 1);
        ep.streams.push(Stream::new("https://a", "a"));
        ep.streams.push(Stream::new("https://b", "b").preferred());
        assert_eq!(ep.preferred_stream().unwrap().id, "b");
    }
}
