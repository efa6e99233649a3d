use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `{extractor}/{type}-{id}`, accepted anywhere a URL is.
static IDENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w]+)/([\w]+)-([\S]+)$").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentError {
    #[error("not a content identifier: {0}")]
    Malformed(String),
    #[error("unknown content type `{0}`")]
    UnknownKind(String),
}

/// Level of the content tree a reference points at.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Series,
    Season,
    Episode,
    Movie,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Series => "series",
            ContentKind::Season => "season",
            ContentKind::Episode => "episode",
            ContentKind::Movie => "movie",
        }
    }
}

impl FromStr for ContentKind {
    type Err = IdentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "series" => Ok(ContentKind::Series),
            "season" => Ok(ContentKind::Season),
            "episode" => Ok(ContentKind::Episode),
            "movie" => Ok(ContentKind::Movie),
            other => Err(IdentError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed stable content identifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentIdent {
    pub extractor: String,
    pub kind: ContentKind,
    pub id: String,
}

impl ContentIdent {
    pub fn new(extractor: impl Into<String>, kind: ContentKind, id: impl Into<String>) -> Self {
        Self {
            extractor: extractor.into(),
            kind,
            id: id.into(),
        }
    }

    /// Parse a `{extractor}/{type}-{id}` string. Returns `None`-like errors
    /// for anything else, so callers can fall back to URL matching.
    pub fn parse(input: &str) -> Result<Self, IdentError> {
        let caps = IDENT_REGEX
            .captures(input)
            .ok_or_else(|| IdentError::Malformed(input.to_string()))?;
        let kind = caps[2].parse::<ContentKind>()?;
        Ok(Self {
            extractor: caps[1].to_string(),
            kind,
            id: caps[3].to_string(),
        })
    }

    pub fn is_ident(input: &str) -> bool {
        IDENT_REGEX
            .captures(input)
            .is_some_and(|caps| caps[2].parse::<ContentKind>().is_ok())
    }
}

impl fmt::Display for ContentIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{}", self.extractor, self.kind, self.id)
    }
}
