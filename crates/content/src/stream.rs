use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Track kind inside a container: used to key codec selections, metadata
/// and stream-index counters.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Subtitles,
}

impl TrackKind {
    /// Single-letter ffmpeg stream specifier (`v`, `a`, `s`).
    pub fn specifier(&self) -> char {
        match self {
            TrackKind::Video => 'v',
            TrackKind::Audio => 'a',
            TrackKind::Subtitles => 's',
        }
    }

    pub const ALL: [TrackKind; 3] = [TrackKind::Video, TrackKind::Audio, TrackKind::Subtitles];
}

/// Decryption method advertised by a manifest or a site API.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMethod {
    Aes128,
    Widevine,
}

/// Key material attached to a stream or segment.
///
/// For AES-128 the key usually arrives as a URL to fetch lazily; for
/// Widevine the extractor supplies the raw key bytes and the engine hands
/// them to the external decryption tool untouched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ContentKey {
    pub url: Option<String>,
    pub method: KeyMethod,
    pub raw: Option<Vec<u8>>,
}

impl ContentKey {
    pub fn aes128(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            method: KeyMethod::Aes128,
            raw: None,
        }
    }

    pub fn widevine(raw: Vec<u8>) -> Self {
        Self {
            url: None,
            method: KeyMethod::Widevine,
            raw: Some(raw),
        }
    }
}

/// A downloadable stream attached to a leaf by an extractor.
///
/// Immutable once `get_streams` has run. Exactly one stream per leaf is
/// `preferred` for video; extra audio and subtitle streams ride alongside.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Stream {
    pub url: String,
    pub id: String,
    /// The main (video-bearing) stream for the leaf.
    pub preferred: bool,
    pub extra_audio: bool,
    pub extra_sub: bool,
    /// Language code per track kind, e.g. `audio → "ja-JP"`.
    pub language: FxHashMap<TrackKind, String>,
    /// Display name per track kind, e.g. `subtitles → "Español (España)"`.
    pub name: FxHashMap<TrackKind, String>,
    pub key: Option<ContentKey>,
}

impl Stream {
    pub fn new(url: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn preferred(mut self) -> Self {
        self.preferred = true;
        self
    }

    pub fn extra_audio(mut self) -> Self {
        self.extra_audio = true;
        self
    }

    pub fn extra_sub(mut self) -> Self {
        self.extra_sub = true;
        self
    }

    pub fn language(mut self, kind: TrackKind, code: impl Into<String>) -> Self {
        self.language.insert(kind, code.into());
        self
    }

    pub fn name(mut self, kind: TrackKind, name: impl Into<String>) -> Self {
        self.name.insert(kind, name.into());
        self
    }

    pub fn key(mut self, key: ContentKey) -> Self {
        self.key = Some(key);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_marks_flags() {
        let s = Stream::new("https://cdn/v.m3u8", "v0")
            .preferred()
            .language(TrackKind::Audio, "ja-JP");
        assert!(s.preferred);
        assert!(!s.extra_audio);
        assert_eq!(s.language.get(&TrackKind::Audio).unwrap(), "ja-JP");
    }

    #[test]
    fn specifier_letters() {
        assert_eq!(TrackKind::Video.specifier(), 'v');
        assert_eq!(TrackKind::Audio.specifier(), 'a');
        assert_eq!(TrackKind::Subtitles.specifier(), 's');
    }
}
