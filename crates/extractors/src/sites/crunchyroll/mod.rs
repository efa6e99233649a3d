//! Extractor for the Crunchyroll catalog API.
//!
//! The session is built in stages: an anonymous token request (or one
//! riding the persisted `etp_rt` session cookie), then the signed CMS
//! bucket from `/index/v2` whose policy/signature/key-pair parameters are
//! carried on every catalog request. Seasons are dub-scoped: each season
//! title is matched against a fixed language table and seasons outside the
//! configured dub set are dropped before any episode fetch.

pub(crate) mod models;

use std::sync::LazyLock;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, warn};

use polarity_content::{
    ContentKind, Lineage, Media, MediaKind, Season, Series, Stream, TrackKind,
};

use crate::cookies::{CookieJar, CookieRecord};
use crate::driver::{MediaSink, SearchResult};
use crate::error::ExtractorError;
use crate::extractor::{Capabilities, Extractor, SiteOptions, VideoExtractor};
use crate::filters::FilterSet;
use crate::utils::first_capture;

use models::*;

pub const NAME: &str = "crunchyroll";

pub const CAPABILITIES: Capabilities = Capabilities::video().with_account().with_search();

pub static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|beta\.)?crunchyroll\.com/").unwrap()
});

static SERIES_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"crunchyroll\.com/(?:[a-z]{2}(?:-[a-zA-Z]{2})?/)?series/([A-Z0-9]+)").unwrap()
});

static WATCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"crunchyroll\.com/(?:[a-z]{2}(?:-[a-zA-Z]{2})?/)?watch/([A-Z0-9]+)").unwrap()
});

const API_BASE: &str = "https://www.crunchyroll.com";
/// Public client credentials, base64(`{id}:{secret}`), sent as Basic auth
/// on token requests.
const CLIENT_AUTH: &str = "Y3Jfd2ViOg==";
/// The session cookie the site issues on login; its presence in the jar is
/// the logged-in predicate, and it is the only cookie persisted.
const SESSION_COOKIE: &str = "etp_rt";

/// Season-title marker per dub locale. Titles matching no entry are the
/// original Japanese audio.
static DUB_TABLE: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("en-US", r"(?i)\(English(?: Dub)?\)"),
        ("es-419", r"(?i)\(Spanish(?: Dub)?\)"),
        ("es-ES", r"(?i)\(Castilian(?: Dub)?\)"),
        ("pt-BR", r"(?i)\(Portuguese(?: Dub)?\)"),
        ("fr-FR", r"(?i)\(French(?: Dub)?\)"),
        ("de-DE", r"(?i)\(German(?: Dub)?\)"),
        ("it-IT", r"(?i)\(Italian(?: Dub)?\)"),
        ("ru-RU", r"(?i)\(Russian(?: Dub)?\)"),
        ("hi-IN", r"(?i)\(Hindi(?: Dub)?\)"),
    ]
    .into_iter()
    .map(|(locale, pattern)| (locale, Regex::new(pattern).unwrap()))
    .collect()
});

const ORIGINAL_LOCALE: &str = "ja-JP";

/// Dub locale a season title advertises.
pub(crate) fn detect_dub(season_title: &str) -> &'static str {
    DUB_TABLE
        .iter()
        .find(|(_, regex)| regex.is_match(season_title))
        .map(|(locale, _)| *locale)
        .unwrap_or(ORIGINAL_LOCALE)
}

/// Pick the adaptive variant for the configured hardsub locale, falling
/// back to the clean (no-hardsub) stream.
pub(crate) fn pick_variant<'a>(
    variants: &'a rustc_hash::FxHashMap<String, VariantEntry>,
    hardsub: Option<&str>,
) -> Option<&'a VariantEntry> {
    if let Some(locale) = hardsub
        && let Some(entry) = variants
            .values()
            .find(|v| v.hardsub_locale.eq_ignore_ascii_case(locale))
    {
        return Some(entry);
    }
    variants
        .values()
        .find(|v| v.hardsub_locale.is_empty())
        .or_else(|| variants.values().next())
}

#[derive(Default)]
struct SessionState {
    bearer: Option<String>,
    cms: Option<CmsInfo>,
}

pub struct Crunchyroll {
    base: Extractor,
    options: SiteOptions,
    jar: CookieJar,
    session: RwLock<SessionState>,
}

impl Crunchyroll {
    pub fn new(client: Client, options: SiteOptions) -> Result<Self, ExtractorError> {
        let jar = CookieJar::open(&options.accounts_dir, NAME)?;
        let base = Extractor::new(NAME, client);
        if let Some(value) = jar.get(SESSION_COOKIE) {
            base.set_cookie(SESSION_COOKIE, value);
        }
        Ok(Self {
            base,
            options,
            jar,
            session: RwLock::new(SessionState::default()),
        })
    }

    /// The session cookie was rejected: clear and persist the jar, then
    /// continue anonymously. Surfaced to the user as a login-expired
    /// event rather than an error.
    fn handle_session_rejection(&self) -> Result<(), ExtractorError> {
        warn!(extractor = NAME, "stored session rejected; login expired");
        self.jar.clear_and_save()?;
        self.base.clear_cookies();
        Ok(())
    }

    async fn request_token(&self, use_cookie_grant: bool) -> Result<TokenResponse, ExtractorError> {
        let device_id = format!("polarity-{}", chrono::Utc::now().timestamp_millis());
        let mut form = vec![
            ("device_id", device_id),
            ("device_type", "polarity".to_string()),
        ];
        if use_cookie_grant {
            form.push(("grant_type", "etp_rt_cookie".to_string()));
        } else {
            form.push(("grant_type", "client_id".to_string()));
        }

        let response = self
            .base
            .post(&format!("{API_BASE}/auth/v1/token"))
            .header(reqwest::header::AUTHORIZATION, format!("Basic {CLIENT_AUTH}"))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExtractorError::UnexpectedSchema(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }
        Ok(response.json::<TokenResponse>().await?)
    }

    async fn acquire_bearer(&self) -> Result<String, ExtractorError> {
        if let Some(bearer) = self.session.read().bearer.clone() {
            return Ok(bearer);
        }

        let use_cookie_grant = self.jar.has(SESSION_COOKIE);
        let token = match self.request_token(use_cookie_grant).await {
            Ok(token) => token,
            Err(e) if use_cookie_grant => {
                debug!(error = %e, "cookie-grant token request failed");
                self.handle_session_rejection()?;
                self.request_token(false).await?
            }
            Err(e) => return Err(e),
        };

        self.session.write().bearer = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn acquire_cms(&self) -> Result<CmsInfo, ExtractorError> {
        if let Some(cms) = self.session.read().cms.clone() {
            return Ok(cms);
        }
        let bearer = self.acquire_bearer().await?;
        let response = self
            .base
            .get(&format!("{API_BASE}/index/v2"))
            .bearer_auth(&bearer)
            .send()
            .await?
            .error_for_status()?;
        let index: IndexResponse = response.json().await?;
        info!(extractor = NAME, bucket = %index.cms.bucket, "cms bucket acquired");
        self.session.write().cms = Some(index.cms.clone());
        Ok(index.cms)
    }

    /// Catalog GET scoped by the signed bucket.
    async fn cms_get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, &str)],
    ) -> Result<T, ExtractorError> {
        let cms = self.acquire_cms().await?;
        let bearer = self.acquire_bearer().await?;
        let url = format!("{API_BASE}/cms/v2{}{}", cms.bucket, path);
        let mut request = self
            .base
            .get(&url)
            .bearer_auth(&bearer)
            .query(&[
                ("Policy", cms.policy.as_str()),
                ("Signature", cms.signature.as_str()),
                ("Key-Pair-Id", cms.key_pair_id.as_str()),
            ]);
        if !extra.is_empty() {
            request = request.query(extra);
        }
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ExtractorError::ContentUnavailable(url));
        }
        Ok(response.error_for_status()?.json::<T>().await?)
    }

    fn episode_to_media(&self, item: EpisodeItem) -> Media {
        let mut media = Media {
            kind: MediaKind::Episode,
            title: item.title,
            id: item.id,
            synopsis: item.description,
            number: item.episode_number.unwrap_or(0),
            images: item.images.sources(),
            streams: Vec::new(),
            skip_reason: None,
            lineage: Lineage {
                extractor: NAME.to_string(),
                series_title: item.series_title,
                series_year: None,
                season_title: item.season_title,
                season_number: item.season_number,
            },
            output: None,
        };
        if item.is_premium_only && item.playback.is_none() {
            media.skip("premium only");
        }
        media
    }
}

#[async_trait]
impl VideoExtractor for Crunchyroll {
    fn base(&self) -> &Extractor {
        &self.base
    }

    fn capabilities(&self) -> Capabilities {
        CAPABILITIES
    }

    async fn identify_url(&self, url: &str) -> Result<(ContentKind, String), ExtractorError> {
        if let Some(id) = first_capture(&SERIES_URL, url) {
            return Ok((ContentKind::Series, id));
        }
        if let Some(id) = first_capture(&WATCH_URL, url) {
            return Ok((ContentKind::Episode, id));
        }
        Err(ExtractorError::InvalidUrl(url.to_string()))
    }

    async fn open_session(&self) -> Result<(), ExtractorError> {
        // Credentials from options take precedence over a stored session.
        if !self.is_logged_in()
            && let (Some(email), Some(password)) =
                (self.options.email.clone(), self.options.password.clone())
        {
            self.login(&email, &password).await?;
        }
        self.acquire_cms().await?;
        Ok(())
    }

    async fn login(&self, email: &str, password: &str) -> Result<(), ExtractorError> {
        let device_id = format!("polarity-{}", chrono::Utc::now().timestamp_millis());
        let response = self
            .base
            .post(&format!("{API_BASE}/auth/v1/token"))
            .header(reqwest::header::AUTHORIZATION, format!("Basic {CLIENT_AUTH}"))
            .form(&[
                ("grant_type", "password"),
                ("username", email),
                ("password", password),
                ("scope", "offline_access"),
                ("device_id", &device_id),
                ("device_type", "polarity"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExtractorError::LoginFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        // The session cookie arrives alongside the token payload.
        self.base.store_response_cookies(response.headers());
        match self.base.cookie(SESSION_COOKIE) {
            Some(value) => {
                self.jar.set(CookieRecord {
                    name: SESSION_COOKIE.to_string(),
                    value,
                    domain: ".crunchyroll.com".to_string(),
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

    async fn get_series_info(&self, series_id: &str) -> Result<Series, ExtractorError> {
        let raw: SeriesResponse = self
            .cms_get(&format!("/series/{series_id}"), &[])
            .await?;
        Ok(Series {
            title: raw.title,
            id: raw.id,
            synopsis: raw.description,
            genres: raw.keywords,
            images: raw.images.sources(),
            year: raw.series_launch_year,
            season_count: raw.season_count,
            episode_count: raw.episode_count,
            seasons: Vec::new(),
        })
    }

    async fn get_seasons(&self, series_id: &str) -> Result<Vec<Season>, ExtractorError> {
        let raw: Collection<SeasonItem> = self
            .cms_get("/seasons", &[("series_id", series_id)])
            .await?;
        Ok(raw
            .items
            .into_iter()
            .map(|item| Season {
                title: item.title,
                id: item.id,
                number: item.season_number,
                year: None,
                episode_count: item.number_of_episodes,
                synopsis: item.description,
                episodes: Vec::new(),
            })
            .collect())
    }

    fn season_admitted(&self, season: &Season) -> bool {
        if self.options.dub_languages.is_empty() {
            return true;
        }
        let dub = detect_dub(&season.title);
        let admitted = self
            .options
            .dub_languages
            .iter()
            .any(|wanted| wanted.eq_ignore_ascii_case(dub));
        if !admitted {
            debug!(season = %season.title, dub, "season dropped: dub not configured");
        }
        admitted
    }

    async fn get_season_info(
        &self,
        _series_id: &str,
        season: &Season,
    ) -> Result<Season, ExtractorError> {
        let raw: SeasonItem = self
            .cms_get(&format!("/seasons/{}", season.id), &[])
            .await?;
        Ok(Season {
            title: raw.title,
            id: raw.id,
            number: if raw.season_number != 0 {
                raw.season_number
            } else {
                season.number
            },
            year: season.year,
            episode_count: raw.number_of_episodes,
            synopsis: raw.description,
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
        let raw: Collection<EpisodeItem> = self
            .cms_get("/episodes", &[("season_id", season.id.as_str())])
            .await?;

        for item in raw.items {
            let number = item.episode_number.unwrap_or(0);
            if !filters.wants_episode(season.number, number, &item.title) {
                continue;
            }
            let mut media = self.episode_to_media(item);
            media.lineage.series_year = series.year;
            if media.lineage.series_title.is_empty() {
                media.lineage.series_title = series.title.clone();
            }
            if media.lineage.season_number == 0 {
                media.lineage.season_number = season.number;
            }
            crate::driver::attach_streams(self, &mut media).await;
            sink.publish(media);
        }
        Ok(())
    }

    async fn get_episode_info(&self, episode_id: &str) -> Result<Media, ExtractorError> {
        let raw: EpisodeItem = self
            .cms_get(&format!("/episodes/{episode_id}"), &[])
            .await?;
        Ok(self.episode_to_media(raw))
    }

    async fn get_streams(&self, media: &mut Media) -> Result<(), ExtractorError> {
        let raw: StreamsResponse = self
            .cms_get(&format!("/videos/{}/streams", media.id), &[])
            .await?;

        let variants = if raw.streams.adaptive_hls.is_empty() {
            &raw.streams.adaptive_dash
        } else {
            &raw.streams.adaptive_hls
        };
        let variant = pick_variant(variants, self.options.hardsub_language.as_deref())
            .ok_or(ExtractorError::NoStreamsFound)?;

        let mut main = Stream::new(variant.url.clone(), format!("{}-main", media.id))
            .preferred()
            .language(TrackKind::Video, raw.audio_locale.clone())
            .language(TrackKind::Audio, raw.audio_locale.clone());
        if !variant.hardsub_locale.is_empty() {
            main = main.name(
                TrackKind::Video,
                format!("hardsub {}", variant.hardsub_locale),
            );
        }
        media.streams.push(main);

        for (locale, subtitle) in &raw.subtitles {
            let wanted = self.options.sub_languages.is_empty()
                || self
                    .options
                    .sub_languages
                    .iter()
                    .any(|l| l.eq_ignore_ascii_case(locale));
            if !wanted {
                continue;
            }
            media.streams.push(
                Stream::new(subtitle.url.clone(), format!("{}-sub-{locale}", media.id))
                    .extra_sub()
                    .language(TrackKind::Subtitles, subtitle.locale.clone())
                    .name(TrackKind::Subtitles, subtitle.locale.clone()),
            );
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, ExtractorError> {
        let bearer = self.acquire_bearer().await?;
        let n = limit.to_string();
        let response = self
            .base
            .get(&format!("{API_BASE}/content/v2/discover/search"))
            .bearer_auth(&bearer)
            .query(&[("q", query), ("n", n.as_str()), ("type", "series")])
            .send()
            .await?
            .error_for_status()?;
        let raw: SearchResponse = response.json().await?;

        Ok(raw
            .data
            .into_iter()
            .filter(|bucket| bucket.kind == "series" || bucket.kind.is_empty())
            .flat_map(|bucket| bucket.items)
            .take(limit)
            .map(|item| SearchResult {
                title: item.title,
                ident: polarity_content::ContentIdent::new(NAME, ContentKind::Series, item.id),
                year: item.series_launch_year,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashMap;

    fn options_with(dubs: &[&str]) -> SiteOptions {
        SiteOptions {
            accounts_dir: tempfile::tempdir().unwrap().keep(),
            dub_languages: dubs.iter().map(|s| s.to_string()).collect(),
            ..SiteOptions::default()
        }
    }

    #[test]
    fn dub_detection_table() {
        assert_eq!(detect_dub("Spice and Wolf"), "ja-JP");
        assert_eq!(detect_dub("Spice and Wolf (English Dub)"), "en-US");
        assert_eq!(detect_dub("Spice and Wolf (english dub)"), "en-US");
        assert_eq!(detect_dub("Overlord IV (Spanish Dub)"), "es-419");
        assert_eq!(detect_dub("Overlord IV (German Dub)"), "de-DE");
    }

    #[test]
    fn season_admission_follows_dub_set() {
        let cr = Crunchyroll::new(Client::new(), options_with(&["ja-JP", "en-US"])).unwrap();
        let japanese = Season {
            title: "Season 1".into(),
            ..Season::default()
        };
        let english = Season {
            title: "Season 1 (English Dub)".into(),
            ..Season::default()
        };
        let spanish = Season {
            title: "Season 1 (Spanish Dub)".into(),
            ..Season::default()
        };
        assert!(cr.season_admitted(&japanese));
        assert!(cr.season_admitted(&english));
        assert!(!cr.season_admitted(&spanish));

        // No configured dub set admits everything.
        let all = Crunchyroll::new(Client::new(), options_with(&[])).unwrap();
        assert!(all.season_admitted(&spanish));
    }

    #[test]
    fn variant_pick_prefers_hardsub_then_clean() {
        let mut variants: FxHashMap<String, VariantEntry> = FxHashMap::default();
        variants.insert(
            "".into(),
            VariantEntry {
                hardsub_locale: "".into(),
                url: "https://cdn/raw.m3u8".into(),
            },
        );
        variants.insert(
            "en-US".into(),
            VariantEntry {
                hardsub_locale: "en-US".into(),
                url: "https://cdn/en.m3u8".into(),
            },
        );

        let hit = pick_variant(&variants, Some("en-US")).unwrap();
        assert_eq!(hit.url, "https://cdn/en.m3u8");

        // Unconfigured or unavailable hardsub falls back to the clean stream.
        let fallback = pick_variant(&variants, Some("de-DE")).unwrap();
        assert_eq!(fallback.url, "https://cdn/raw.m3u8");
        let none = pick_variant(&variants, None).unwrap();
        assert_eq!(none.url, "https://cdn/raw.m3u8");
    }

    #[tokio::test]
    async fn url_identification() {
        let cr = Crunchyroll::new(Client::new(), options_with(&[])).unwrap();
        let (kind, id) = cr
            .identify_url("https://www.crunchyroll.com/series/GRMG8ZQZR/spice-and-wolf")
            .await
            .unwrap();
        assert_eq!(kind, ContentKind::Series);
        assert_eq!(id, "GRMG8ZQZR");

        let (kind, id) = cr
            .identify_url("https://www.crunchyroll.com/de/watch/GRE50KV36/the-beginning")
            .await
            .unwrap();
        assert_eq!(kind, ContentKind::Episode);
        assert_eq!(id, "GRE50KV36");

        assert!(cr
            .identify_url("https://www.crunchyroll.com/news")
            .await
            .is_err());
    }

    #[test]
    fn session_rejection_clears_the_jar() {
        let dir = tempfile::tempdir().unwrap();
        let options = SiteOptions {
            accounts_dir: dir.path().to_path_buf(),
            ..SiteOptions::default()
        };
        let cr = Crunchyroll::new(Client::new(), options.clone()).unwrap();
        cr.jar.set(CookieRecord {
            name: SESSION_COOKIE.to_string(),
            value: "stale".to_string(),
            domain: ".crunchyroll.com".to_string(),
            path: "/".to_string(),
            expires: None,
            discard: false,
        });
        cr.jar.save().unwrap();
        assert!(cr.is_logged_in());

        cr.handle_session_rejection().unwrap();
        assert!(!cr.is_logged_in());

        // The cleared jar was persisted: a fresh extractor sees it empty.
        let reopened = Crunchyroll::new(Client::new(), options).unwrap();
        assert!(!reopened.is_logged_in());
    }
}
