use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FilterParseError {
    #[error("bad season/episode token `{0}`")]
    BadNumberToken(String),
    #[error("bad regex `{0}`: {1}")]
    BadRegex(String, String),
    #[error("dangling parameter `{0}` (filters come in pairs)")]
    DanglingParam(String),
    #[error("bad index token `{0}`")]
    BadIndex(String),
}

/// Episodes wanted within one season.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeSet {
    All,
    Numbers(BTreeSet<u32>),
}

/// `S01E07`-style number filter after merging all contributing tokens.
///
/// Keys are season numbers; `None` is the season-independent bucket fed by
/// bare `E03` tokens. `S01` widens season 1 to [`EpisodeSet::All`],
/// overriding any narrower prior contribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumberFilter {
    wanted: FxHashMap<Option<u32>, EpisodeSet>,
}

static NUMBER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?i)(?:S(\d+)(?:-(\d+))?)?(?:E(\d+))?$").unwrap());

impl NumberFilter {
    /// Merge one token (`S01`, `S01E07`, `E03`, `S01-04`) into the map.
    pub fn add_token(&mut self, token: &str) -> Result<(), FilterParseError> {
        let caps = NUMBER_TOKEN
            .captures(token)
            .filter(|c| c.get(1).is_some() || c.get(3).is_some())
            .ok_or_else(|| FilterParseError::BadNumberToken(token.to_string()))?;

        // Digits are guaranteed by the pattern; overflow is not.
        let parse = |m: Option<regex::Match<'_>>| -> Result<Option<u32>, FilterParseError> {
            m.map(|m| {
                m.as_str()
                    .parse::<u32>()
                    .map_err(|_| FilterParseError::BadNumberToken(token.to_string()))
            })
            .transpose()
        };
        let season_start = parse(caps.get(1))?;
        let season_end = parse(caps.get(2))?;
        let episode = parse(caps.get(3))?;

        let seasons: Vec<Option<u32>> = match (season_start, season_end) {
            (Some(start), Some(end)) if end >= start => (start..=end).map(Some).collect(),
            (Some(_), Some(_)) => {
                return Err(FilterParseError::BadNumberToken(token.to_string()));
            }
            (Some(start), None) => vec![Some(start)],
            (None, _) => vec![None],
        };

        for season in seasons {
            match episode {
                // `S01` widens the whole season, overriding narrower sets.
                None => {
                    self.wanted.insert(season, EpisodeSet::All);
                }
                Some(ep) => match self.wanted.entry(season).or_insert_with(|| {
                    EpisodeSet::Numbers(BTreeSet::new())
                }) {
                    EpisodeSet::All => {}
                    EpisodeSet::Numbers(set) => {
                        set.insert(ep);
                    }
                },
            }
        }
        Ok(())
    }

    /// Does an episode with these coordinates pass the merged filter?
    pub fn passes(&self, season_number: u32, episode_number: u32) -> bool {
        match self.wanted.get(&None) {
            Some(EpisodeSet::All) => return true,
            Some(EpisodeSet::Numbers(set)) if set.contains(&episode_number) => return true,
            _ => {}
        }
        match self.wanted.get(&Some(season_number)) {
            Some(EpisodeSet::All) => true,
            Some(EpisodeSet::Numbers(set)) => set.contains(&episode_number),
            None => false,
        }
    }

    /// Could *any* episode of this season pass? Gates the detailed
    /// season fetch.
    pub fn wants_season(&self, season_number: u32) -> bool {
        self.wanted.contains_key(&None) || self.wanted.contains_key(&Some(season_number))
    }

    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }
}

/// Compiled title filter. Absolute filters must all match; non-absolute
/// filters are OR-ed.
#[derive(Debug, Clone)]
pub struct MatchFilter {
    pub regex: Regex,
    pub absolute: bool,
}

impl MatchFilter {
    pub fn new(pattern: &str) -> Result<Self, FilterParseError> {
        // A leading `!` marks the filter absolute.
        let (absolute, pattern) = match pattern.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let regex = Regex::new(pattern)
            .map_err(|e| FilterParseError::BadRegex(pattern.to_string(), e.to_string()))?;
        Ok(Self { regex, absolute })
    }
}

/// Everything filtering an extraction: at most one merged number filter
/// plus any number of title filters.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    pub number: NumberFilter,
    pub matches: Vec<MatchFilter>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.number.is_empty() && self.matches.is_empty()
    }

    /// Merge another set into this one (used to link global filters with
    /// positional ones before a run starts).
    pub fn merge(&mut self, other: &FilterSet) {
        for (season, episodes) in &other.number.wanted {
            match episodes {
                EpisodeSet::All => {
                    self.number.wanted.insert(*season, EpisodeSet::All);
                }
                EpisodeSet::Numbers(set) => match self
                    .number
                    .wanted
                    .entry(*season)
                    .or_insert_with(|| EpisodeSet::Numbers(BTreeSet::new()))
                {
                    EpisodeSet::All => {}
                    EpisodeSet::Numbers(existing) => existing.extend(set.iter().copied()),
                },
            }
        }
        self.matches.extend(other.matches.iter().cloned());
    }

    /// A title passes iff every absolute filter matches AND (at least one
    /// non-absolute filter matches, or there are none).
    pub fn passes_title(&self, title: &str) -> bool {
        let mut any_relative = false;
        let mut relative_hit = false;
        for filter in &self.matches {
            if filter.absolute {
                if !filter.regex.is_match(title) {
                    return false;
                }
            } else {
                any_relative = true;
                relative_hit |= filter.regex.is_match(title);
            }
        }
        !any_relative || relative_hit
    }

    pub fn wants_season(&self, season_number: u32) -> bool {
        self.number.is_empty() || self.number.wants_season(season_number)
    }

    pub fn wants_episode(&self, season_number: u32, episode_number: u32, title: &str) -> bool {
        (self.number.is_empty() || self.number.passes(season_number, episode_number))
            && self.passes_title(title)
    }
}

/// Parse a full `--filters` expression into the global set plus positional
/// sets (index → set).
///
/// Grammar: whitespace-separated tokens, quoted strings kept together.
/// `global` and `i{N}` switch the indexing cursor; remaining tokens come
/// in `<param> <filter>` pairs where `filter` is the keyword `number`
/// (the param then feeds the number filter) or a regex string (compiled
/// into a match filter; a `!` prefix marks it absolute).
pub fn parse_filter_expression(
    input: &str,
) -> Result<(FilterSet, FxHashMap<usize, FilterSet>), FilterParseError> {
    let mut global = FilterSet::default();
    let mut positional: FxHashMap<usize, FilterSet> = FxHashMap::default();

    #[derive(Clone, Copy)]
    enum Cursor {
        Global,
        Index(usize),
    }
    let mut cursor = Cursor::Global;

    let tokens = tokenize(input);
    let mut iter = tokens.into_iter().peekable();

    static INDEX_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^i(\d+)$").unwrap());

    while let Some(token) = iter.next() {
        if token == "global" {
            cursor = Cursor::Global;
            continue;
        }
        if let Some(caps) = INDEX_TOKEN.captures(&token) {
            let idx = caps[1]
                .parse::<usize>()
                .map_err(|_| FilterParseError::BadIndex(token.clone()))?;
            cursor = Cursor::Index(idx);
            continue;
        }

        let filter = iter
            .next()
            .ok_or_else(|| FilterParseError::DanglingParam(token.clone()))?;

        let target = match cursor {
            Cursor::Global => &mut global,
            Cursor::Index(i) => positional.entry(i).or_default(),
        };

        if filter == "number" {
            target.number.add_token(&token)?;
        } else {
            target.matches.push(MatchFilter::new(&filter)?);
        }
    }

    Ok((global, positional))
}

/// Split on whitespace, keeping single- or double-quoted spans together.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
