use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use rustc_hash::FxHashMap;
use tracing::debug;

use polarity_content::{ContentKind, Media, Season, Series};

use crate::driver::MediaSink;
use crate::error::ExtractorError;
use crate::filters::FilterSet;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// What a site extractor is able to do. Consulted by the registry and the
/// mode dispatch; `video` extractors must implement the full
/// [`VideoExtractor`] contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Site keeps persistent cookies between runs.
    pub account: bool,
    /// Cookies must be populated before extraction begins.
    pub login_required: bool,
    pub search: bool,
    pub live_tv: bool,
    pub video: bool,
}

impl Capabilities {
    pub const fn video() -> Self {
        Self {
            account: false,
            login_required: false,
            search: false,
            live_tv: false,
            video: true,
        }
    }

    pub const fn with_account(mut self) -> Self {
        self.account = true;
        self
    }

    pub const fn with_search(mut self) -> Self {
        self.search = true;
        self
    }
}

/// Per-site options resolved from configuration and CLI flags before an
/// extractor is constructed.
#[derive(Debug, Clone, Default)]
pub struct SiteOptions {
    /// Directory holding `{extractor}.cjar` cookie jars.
    pub accounts_dir: PathBuf,
    pub email: Option<String>,
    pub password: Option<String>,
    /// Dub languages the user wants; seasons in other dubs are skipped.
    pub dub_languages: Vec<String>,
    /// Subtitle languages to attach as extra streams.
    pub sub_languages: Vec<String>,
    /// Hardsub locale for variant selection, if any.
    pub hardsub_language: Option<String>,
    /// Prefer an HEVC stream over AVC when the site offers both.
    pub prefer_hevc: bool,
    /// Bound on per-site internal fan-out (season sub-extractions).
    pub active_extractions: usize,
}

/// Shared HTTP handle every site extractor embeds.
///
/// Owns the site name, the `reqwest` client, default headers, query params
/// and an in-memory cookie store assembled into a `Cookie` header on each
/// request. The store has interior mutability so extractors can refresh
/// session cookies mid-extraction behind `&self`.
#[derive(Debug)]
pub struct Extractor {
    pub name: &'static str,
    pub client: Client,
    headers: HeaderMap,
    params: FxHashMap<String, String>,
    cookies: RwLock<FxHashMap<String, String>>,
}

impl Extractor {
    pub fn new(name: &'static str, client: Client) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(DEFAULT_UA));
        headers.insert(
            reqwest::header::ACCEPT,
            HeaderValue::from_static("application/json, text/html;q=0.9, */*;q=0.8"),
        );
        Self {
            name,
            client,
            headers,
            params: FxHashMap::default(),
            cookies: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn add_header<K: AsRef<str>, V: AsRef<str>>(&mut self, key: K, value: V) {
        match (
            HeaderName::from_str(key.as_ref()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => debug!(key = key.as_ref(), "invalid header; skipping"),
        }
    }

    pub fn add_param<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.params.insert(key.into(), value.into());
    }

    pub fn set_cookie<N: Into<String>, V: Into<String>>(&self, name: N, value: V) {
        self.cookies.write().insert(name.into(), value.into());
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.read().get(name).cloned()
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        self.cookies.read().contains_key(name)
    }

    pub fn clear_cookies(&self) {
        self.cookies.write().clear();
    }

    /// Capture `Set-Cookie` headers from a response into the store.
    pub fn store_response_cookies(&self, headers: &HeaderMap) {
        let mut cookies = self.cookies.write();
        for value in headers.get_all(reqwest::header::SET_COOKIE).iter() {
            if let Ok(cookie_str) = value.to_str()
                && let Some(cookie_part) = cookie_str.split(';').next()
                && let Some((name, value)) = cookie_part.split_once('=')
            {
                let (name, value) = (name.trim(), value.trim());
                if !name.is_empty() && !value.is_empty() {
                    cookies.insert(name.to_owned(), value.to_owned());
                }
            }
        }
    }

    fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookies.read();
        if cookies.is_empty() {
            return None;
        }
        let mut header = String::new();
        for (name, value) in cookies.iter() {
            if !header.is_empty() {
                header.push_str("; ");
            }
            header.push_str(name);
            header.push('=');
            header.push_str(value);
        }
        Some(header)
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let mut headers = self.headers.clone();
        if let Some(cookie_header) = self.cookie_header() {
            match HeaderValue::from_str(&cookie_header) {
                Ok(value) => {
                    headers.insert(reqwest::header::COOKIE, value);
                }
                Err(e) => debug!(error = %e, "malformed cookie header; skipping"),
            }
        }
        self.client
            .request(method, url)
            .headers(headers)
            .query(&self.params)
    }
}

/// The contract every video-capable site extractor implements.
///
/// The generic walk over series → seasons → episodes lives in
/// [`crate::driver::ExtractionDriver`]; implementations only answer the
/// site-specific questions below. Methods take `&self`; session state is
/// kept behind interior mutability inside the implementor.
#[async_trait]
pub trait VideoExtractor: Send + Sync {
    fn base(&self) -> &Extractor;

    fn capabilities(&self) -> Capabilities;

    /// Classify a site URL into a content kind plus its stable id.
    ///
    /// May issue requests: some sites only expose ids inside the page
    /// body. Content-identifier references never reach this method.
    async fn identify_url(&self, url: &str) -> Result<(ContentKind, String), ExtractorError>;

    /// Populate the session (tokens, policies) so catalog requests can be
    /// made. Called once by the driver before any catalog method.
    async fn open_session(&self) -> Result<(), ExtractorError> {
        Ok(())
    }

    async fn login(&self, _email: &str, _password: &str) -> Result<(), ExtractorError> {
        Err(ExtractorError::Other(
            "extractor has no account support".into(),
        ))
    }

    fn is_logged_in(&self) -> bool {
        false
    }

    async fn get_series_info(&self, series_id: &str) -> Result<Series, ExtractorError>;

    /// Partial seasons: title, id, number where the listing provides it.
    async fn get_seasons(&self, series_id: &str) -> Result<Vec<Season>, ExtractorError>;

    /// Site-level season gate, consulted before the detail fetch. Lets a
    /// site drop whole seasons (e.g. unwanted dubs) from the walk.
    fn season_admitted(&self, _season: &Season) -> bool {
        true
    }

    /// Detailed season fetch. Only called for seasons the filters want.
    async fn get_season_info(
        &self,
        series_id: &str,
        season: &Season,
    ) -> Result<Season, ExtractorError>;

    /// Enumerate a season's episodes, attaching streams, and publish each
    /// wanted leaf through the sink as soon as it is complete. Unwanted
    /// episodes must be skipped *before* their detail fetch wherever the
    /// listing carries enough to decide.
    async fn get_episodes_from_season(
        &self,
        series: &Series,
        season: &Season,
        filters: &FilterSet,
        sink: &MediaSink,
    ) -> Result<(), ExtractorError>;

    async fn get_episode_info(&self, episode_id: &str) -> Result<Media, ExtractorError>;

    /// Attach all streams to a leaf. Exactly one stream ends up
    /// `preferred` unless the leaf gets a skip reason instead.
    async fn get_streams(&self, media: &mut Media) -> Result<(), ExtractorError>;

    /// Free-text catalog search; only meaningful when
    /// `capabilities().search` is set.
    async fn search(
        &self,
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<crate::driver::SearchResult>, ExtractorError> {
        Err(ExtractorError::SearchNotSupported)
    }
}
