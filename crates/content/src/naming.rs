use crate::media::{Media, MediaKind};
use crate::sanitize::{TargetOs, sanitize_path};

/// Values available to output-path templates.
///
/// Templates use `{field}` tokens:
/// `{W}` extractor, `{S}` series title, `{s}` season title, `{E}` leaf
/// title, `{i}` id, `{sn}`/`{en}` zero-padded season/episode numbers,
/// `{Sn}`/`{En}` raw numbers, `{y}`/`{Y}` year, `{ext}` chosen extension.
#[derive(Debug, Clone, Default)]
pub struct NameFields {
    pub extractor: String,
    pub series_title: String,
    pub season_title: String,
    pub title: String,
    pub id: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub year: Option<u32>,
    pub ext: String,
}

impl NameFields {
    pub fn from_media(media: &Media, ext: impl Into<String>) -> Self {
        Self {
            extractor: media.lineage.extractor.clone(),
            series_title: media.lineage.series_title.clone(),
            season_title: media.lineage.season_title.clone(),
            title: media.title.clone(),
            id: media.id.clone(),
            season_number: match media.kind {
                MediaKind::Episode => media.lineage.season_number,
                MediaKind::Movie => 0,
            },
            episode_number: media.number,
            year: media.lineage.series_year,
            ext: ext.into(),
        }
    }

    fn lookup(&self, field: &str) -> Option<String> {
        Some(match field {
            "W" => self.extractor.clone(),
            "S" => self.series_title.clone(),
            "s" => self.season_title.clone(),
            "E" => self.title.clone(),
            "i" => self.id.clone(),
            "sn" => format!("{:02}", self.season_number),
            "en" => format!("{:02}", self.episode_number),
            "Sn" => self.season_number.to_string(),
            "En" => self.episode_number.to_string(),
            "y" | "Y" => self.year.map(|y| y.to_string()).unwrap_or_default(),
            "ext" => self.ext.clone(),
            _ => return None,
        })
    }
}

/// Expand a `{field}` template, then sanitize the result once for the OS.
///
/// Unknown tokens are kept literally so a typo is visible in the produced
/// path instead of silently vanishing.
pub fn format_name(template: &str, fields: &NameFields, os: TargetOs) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let token = &after[..close];
                match fields.lookup(token) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(token);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    sanitize_path(&out, os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> NameFields {
        NameFields {
            extractor: "crunchyroll".into(),
            series_title: "Spice and Wolf".into(),
            season_title: "Season 1".into(),
            title: "Wolf and Best Clothes".into(),
            id: "GRX123".into(),
            season_number: 1,
            episode_number: 7,
            year: Some(2008),
            ext: "mkv".into(),
        }
    }

    #[test]
    fn expands_all_fields() {
        let out = format_name(
            "{W}/{S} ({y})/{sn}x{en} - {E}.{ext}",
            &fields(),
            TargetOs::Posix,
        );
        assert_eq!(
            out,
            "crunchyroll/Spice and Wolf (2008)/01x07 - Wolf and Best Clothes.mkv"
        );
    }

    #[test]
    fn raw_numbers_are_unpadded() {
        let out = format_name("S{Sn}E{En}", &fields(), TargetOs::Posix);
        assert_eq!(out, "S1E7");
    }

    #[test]
    fn unknown_tokens_survive() {
        let out = format_name("{S} {nope}", &fields(), TargetOs::Posix);
        assert_eq!(out, "Spice and Wolf {nope}");
    }

    #[test]
    fn result_is_sanitized_once() {
        let mut f = fields();
        f.title = "Who? What: Where".into();
        let out = format_name("{E}.{ext}", &f, TargetOs::Posix);
        assert_eq!(out, "Who What Where.mkv");
    }

    #[test]
    fn missing_year_renders_empty() {
        let mut f = fields();
        f.year = None;
        assert_eq!(format_name("({y})", &f, TargetOs::Posix), "()");
    }
}
