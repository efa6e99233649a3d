use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;

use crate::error::ExtractorError;
use crate::extractor::{Capabilities, SiteOptions, VideoExtractor};
use crate::sites::{atresplayer, crunchyroll};

/// A thread-safe constructor for one site extractor.
type Constructor = fn(Client, SiteOptions) -> Result<Box<dyn VideoExtractor>, ExtractorError>;

/// One registered site: name (also the content-identifier prefix), host
/// pattern, capabilities, and constructor.
pub struct SiteEntry {
    pub name: &'static str,
    pub regex: &'static LazyLock<Regex>,
    pub capabilities: Capabilities,
    pub constructor: Constructor,
}

impl SiteEntry {
    pub fn build(
        &self,
        client: Client,
        options: SiteOptions,
    ) -> Result<Box<dyn VideoExtractor>, ExtractorError> {
        (self.constructor)(client, options)
    }
}

/// Static site registry, scanned in order.
static SITES: &[SiteEntry] = &[
    SiteEntry {
        name: crunchyroll::NAME,
        regex: &crunchyroll::URL_REGEX,
        capabilities: crunchyroll::CAPABILITIES,
        constructor: |client, options| {
            Ok(Box::new(crunchyroll::Crunchyroll::new(client, options)?))
        },
    },
    SiteEntry {
        name: atresplayer::NAME,
        regex: &atresplayer::URL_REGEX,
        capabilities: atresplayer::CAPABILITIES,
        constructor: |client, options| {
            Ok(Box::new(atresplayer::Atresplayer::new(client, options)?))
        },
    },
];

/// Find the site whose host pattern matches the URL.
pub fn find_for_url(url: &str) -> Option<&'static SiteEntry> {
    SITES.iter().find(|site| site.regex.is_match(url))
}

/// Exact lookup by the extractor name parsed from a content identifier.
pub fn find_by_name(name: &str) -> Option<&'static SiteEntry> {
    SITES.iter().find(|site| site.name.eq_ignore_ascii_case(name))
}

pub fn registered_sites() -> impl Iterator<Item = &'static SiteEntry> {
    SITES.iter()
}
