//! Extractor for the Atresplayer catalog.
//!
//! Identification is a page-scraping + JSON-LD hybrid: episode pages embed
//! a 24-hex content id, series pages a format id and optionally a season
//! id. Season display info and season numbering are served by two separate
//! endpoints; episode listings are paginated rows resolved one by one.

pub(crate) mod models;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info};

use polarity_content::{
    ContentKind, Lineage, Media, MediaKind, Season, Series, Stream, TrackKind,
};

use crate::cookies::{CookieJar, CookieRecord};
use crate::driver::MediaSink;
use crate::error::ExtractorError;
use crate::extractor::{Capabilities, Extractor, SiteOptions, VideoExtractor};
use crate::filters::FilterSet;
use crate::utils::first_capture;

use models::*;

pub const NAME: &str = "atresplayer";

pub const CAPABILITIES: Capabilities = Capabilities::video().with_account();

pub static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?://)?(?:www\.)?atresplayer\.com/").unwrap());

/// Ids embedded in page URLs, e.g. `..._5f9e3b2a1c4d6e7f8a9b0c1d/`.
static URL_EMBEDDED_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([0-9a-f]{24})").unwrap());

static PAGE_EPISODE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""episodeId"\s*:\s*"([0-9a-f]{24})""#).unwrap());
static PAGE_FORMAT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""formatId"\s*:\s*"([0-9a-f]{24})""#).unwrap());
static PAGE_SEASON_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""seasonId"\s*:\s*"([0-9a-f]{24})""#).unwrap());

const API_BASE: &str = "https://api.atresplayer.com";
const ACCOUNT_BASE: &str = "https://account.atresplayer.com";
/// Session cookie issued on login; the logged-in predicate and the only
/// cookie persisted to the jar.
const SESSION_COOKIE: &str = "A3PSID";

const HLS_MIME: &str = "application/vnd.apple.mpegurl";

const PAGE_SIZE: u32 = 100;

/// Pick the playback source: HEVC-HLS when configured and present, else
/// the first AVC/untagged HLS source, else whatever leads the list.
pub(crate) fn pick_source<'a>(
    sources: &'a [PlayerSource],
    prefer_hevc: bool,
) -> Option<&'a PlayerSource> {
    let hls = |s: &&PlayerSource| s.kind.eq_ignore_ascii_case(HLS_MIME);
    if prefer_hevc
        && let Some(source) = sources
            .iter()
            .filter(hls)
            .find(|s| s.codec.as_deref().is_some_and(|c| c.eq_ignore_ascii_case("hevc")))
    {
        return Some(source);
    }
    sources
        .iter()
        .filter(hls)
        .find(|s| !s.codec.as_deref().is_some_and(|c| c.eq_ignore_ascii_case("hevc")))
        .or_else(|| sources.first())
}

/// Composite season reference carrying the series context a bare season id
/// lacks: `{series_id}.{season_id}`.
pub(crate) fn split_season_ref(id: &str) -> (&str, &str) {
    match id.split_once('.') {
        Some((series, season)) => (series, season),
        None => ("", id),
    }
}

pub struct Atresplayer {
    base: Extractor,
    options: SiteOptions,
    jar: CookieJar,
}

impl Atresplayer {
    pub fn new(client: Client, options: SiteOptions) -> Result<Self, ExtractorError> {
        let jar = CookieJar::open(&options.accounts_dir, NAME)?;
        let base = Extractor::new(NAME, client);
        if let Some(value) = jar.get(SESSION_COOKIE) {
            base.set_cookie(SESSION_COOKIE, value);
        }
        Ok(Self { base, options, jar })
    }

    async fn fetch_page_body(&self, url: &str) -> Result<String, ExtractorError> {
        let response = self.base.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ExtractorError> {
        let response = self.base.get(url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExtractorError::ContentUnavailable(url.to_string()));
        }
        Ok(response.error_for_status()?.json::<T>().await?)
    }

    async fn get_season_number(
        &self,
        series_id: &str,
        season_id: &str,
    ) -> Result<SeasonJsonLd, ExtractorError> {
        self.api_get(&format!(
            "{API_BASE}/client/v1/jsonld/format/{series_id}?seasonId={season_id}"
        ))
        .await
    }

    fn leaf_from_episode_page(&self, id: &str, page: EpisodePage) -> Media {
        let number = page.number_of_episode.unwrap_or(0);
        let kind = if number == 0 {
            MediaKind::Movie
        } else {
            MediaKind::Episode
        };
        Media {
            kind,
            title: page.title,
            id: id.to_string(),
            synopsis: page.description,
            number,
            images: page.image.map(|i| i.sources()).unwrap_or_default(),
            streams: Vec::new(),
            skip_reason: None,
            lineage: Lineage {
                extractor: NAME.to_string(),
                ..Lineage::default()
            },
            output: None,
        }
    }
}

#[async_trait]
impl VideoExtractor for Atresplayer {
    fn base(&self) -> &Extractor {
        &self.base
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    async fn identify_url(&self, url: &str) -> Result<(ContentKind, String), ExtractorError> {
        // Episode pages usually carry the id in the URL itself; fall back
        // to scraping the player page.
        let body = self.fetch_page_body(url).await?;

        if let Some(id) = first_capture(&PAGE_EPISODE_ID, &body)
            .or_else(|| first_capture(&URL_EMBEDDED_ID, url))
        {
            return Ok((ContentKind::Episode, id));
        }

        let series_id = first_capture(&PAGE_FORMAT_ID, &body)
            .ok_or_else(|| ExtractorError::InvalidUrl(url.to_string()))?;
        match first_capture(&PAGE_SEASON_ID, &body) {
            Some(season_id) => Ok((ContentKind::Season, format!("{series_id}.{season_id}"))),
            None => Ok((ContentKind::Series, series_id)),
        }
    }

    async fn login(&self, email: &str, password: &str) -> Result<(), ExtractorError> {
        let response = self
            .base
            .post(&format!("{ACCOUNT_BASE}/auth/v1/login"))
            .form(&[("username", email), ("password", password)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExtractorError::LoginFailed(format!(
                "login endpoint returned {}",
                response.status()
            )));
        }

        self.base.store_response_cookies(response.headers());
        match self.base.cookie(SESSION_COOKIE) {
            Some(value) => {
                self.jar.set(CookieRecord {
                    name: SESSION_COOKIE.to_string(),
                    value,
                    domain: ".atresplayer.com".to_string(),
                    path: "/".to_string(),
                    expires: None,
                    discard: false,
                });
                self.jar.save()?;
                info!(extractor = NAME, "login succeeded");
                Ok(())
            }
            None => Err(ExtractorError::LoginFailed(
                "no session cookie in login response".to_string(),
            )),
        }
    }

    fn is_logged_in(&self) -> bool {
        self.jar.has(SESSION_COOKIE)
    }

    async fn open_session(&self) -> Result<(), ExtractorError> {
        if !self.is_logged_in()
            && let (Some(email), Some(password)) =
                (self.options.email.clone(), self.options.password.clone())
        {
            self.login(&email, &password).await?;
        }
        Ok(())
    }

    async fn get_series_info(&self, series_id: &str) -> Result<Series, ExtractorError> {
        let page: FormatPage = self
            .api_get(&format!("{API_BASE}/client/v1/page/format/{series_id}"))
            .await?;
        Ok(Series {
            title: page.title,
            id: series_id.to_string(),
            synopsis: page.description,
            genres: Vec::new(),
            images: page.image.map(|i| i.sources()).unwrap_or_default(),
            year: None,
            season_count: page.seasons.len() as u32,
            episode_count: 0,
            seasons: Vec::new(),
        })
    }

    async fn get_seasons(&self, series_id: &str) -> Result<Vec<Season>, ExtractorError> {
        let page: FormatPage = self
            .api_get(&format!("{API_BASE}/client/v1/page/format/{series_id}"))
            .await?;
        Ok(page
            .seasons
            .into_iter()
            .map(|s| Season {
                title: s.title,
                // Season number is unknown until the JSON-LD fetch; the
                // driver treats 0 as "must fetch".
                id: format!("{series_id}.{}", s.id),
                number: 0,
                ..Season::default()
            })
            .collect())
    }

    async fn get_season_info(
        &self,
        series_id: &str,
        season: &Season,
    ) -> Result<Season, ExtractorError> {
        let (embedded_series, season_id) = split_season_ref(&season.id);
        let series_id = if embedded_series.is_empty() {
            series_id
        } else {
            embedded_series
        };

        let page: FormatPage = self
            .api_get(&format!(
                "{API_BASE}/client/v1/page/format/{series_id}?seasonId={season_id}"
            ))
            .await?;
        let jsonld = self.get_season_number(series_id, season_id).await?;

        Ok(Season {
            title: if page.title.is_empty() {
                season.title.clone()
            } else {
                page.title
            },
            id: format!("{series_id}.{season_id}"),
            number: jsonld.season_number.unwrap_or(0),
            year: None,
            episode_count: jsonld.number_of_episodes.unwrap_or(0),
            synopsis: page.description,
            episodes: Vec::new(),
        })
    }

    async fn get_episodes_from_season(
        &self,
        series: &Series,
        season: &Season,
        filters: &FilterSet,
        sink: &MediaSink,
    ) -> Result<(), ExtractorError> {
        let (series_id, season_id) = split_season_ref(&season.id);

        let mut page_number = 0u32;
        loop {
            let page: RowSearchPage = self
                .api_get(&format!(
                    "{API_BASE}/client/v1/row/search?entityType=ATPEpisode&formatId={series_id}&seasonId={season_id}&size={PAGE_SIZE}&page={page_number}"
                ))
                .await?;

            for row in &page.item_rows {
                // Title filters rule rows out before their detail fetch;
                // number filters apply once the episode page is known.
                if !row.title.is_empty() && !filters.passes_title(&row.title) {
                    continue;
                }
                let mut media = match self.get_episode_info(&row.content_id).await {
                    Ok(media) => media,
                    Err(e) => {
                        debug!(id = %row.content_id, error = %e, "episode page failed");
                        let mut media = Media::episode(row.title.clone(), row.content_id.clone(), 0);
                        media.skip(e.skip_reason());
                        media
                    }
                };
                media.lineage.series_title = series.title.clone();
                media.lineage.season_title = season.title.clone();
                media.lineage.season_number = season.number;

                if !filters.wants_episode(season.number, media.number, &media.title) {
                    continue;
                }
                crate::driver::attach_streams(self, &mut media).await;
                sink.publish(media);
            }

            if page.page_info.last {
                break;
            }
            page_number += 1;
        }
        Ok(())
    }

    async fn get_episode_info(&self, episode_id: &str) -> Result<Media, ExtractorError> {
        let page: EpisodePage = self
            .api_get(&format!("{API_BASE}/client/v1/page/episode/{episode_id}"))
            .await?;
        Ok(self.leaf_from_episode_page(episode_id, page))
    }

    async fn get_streams(&self, media: &mut Media) -> Result<(), ExtractorError> {
        let player: PlayerResponse = self
            .api_get(&format!("{API_BASE}/player/v1/episode/{}", media.id))
            .await?;

        let source =
            pick_source(&player.sources, self.options.prefer_hevc).ok_or(ExtractorError::NoStreamsFound)?;
        media.streams.push(
            Stream::new(source.src.clone(), format!("{}-main", media.id))
                .preferred()
                .language(TrackKind::Video, "es-ES")
                .language(TrackKind::Audio, "es-ES"),
        );

        for subtitle in &player.subtitles {
            let wanted = self.options.sub_languages.is_empty()
                || self
                    .options
                    .sub_languages
                    .iter()
                    .any(|l| l.eq_ignore_ascii_case(&subtitle.language));
            if !wanted {
                continue;
            }
            media.streams.push(
                Stream::new(
                    subtitle.src.clone(),
                    format!("{}-sub-{}", media.id, subtitle.language),
                )
                .extra_sub()
                .language(TrackKind::Subtitles, subtitle.language.clone())
                .name(
                    TrackKind::Subtitles,
                    if subtitle.name.is_empty() {
                        subtitle.language.clone()
                    } else {
                        subtitle.name.clone()
                    },
                ),
            );
        }
        Ok(())
    }
}
