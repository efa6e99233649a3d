//! Fixed subtitle rewrites applied right after a subtitle segment lands.

/// WebVTT fixups: positional `#` markers become italic tags and XML
/// apostrophe entities are unescaped.
pub fn fix_vtt(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.lines() {
        let mut line = line.to_string();
        if let Some(rest) = line.strip_prefix("# ") {
            line = format!("<i>{rest}");
        }
        if let Some(rest) = line.strip_suffix(" #") {
            line = format!("{rest}</i>");
        }
        out.push_str(&line.replace("&apos;", "'"));
        out.push('\n');
    }
    out
}

/// Line-by-line TTML2 → SubRip conversion: cue timecodes move from `.` to
/// `,` decimals, `<br/>` becomes a newline, `<span>` wrappers are
/// stripped, entities unescaped. The converted file is renamed `.srt`.
pub fn ttml2_to_srt(content: &str) -> String {
    let mut out = String::new();
    let mut cue = 0usize;

    for line in content.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("<p") || !trimmed.contains("begin=") {
            continue;
        }
        let Some(begin) = attr_value(trimmed, "begin") else {
            continue;
        };
        let Some(end) = attr_value(trimmed, "end") else {
            continue;
        };

        let text = cue_text(trimmed);
        if text.is_empty() {
            continue;
        }

        cue += 1;
        out.push_str(&format!(
            "{cue}\n{} --> {}\n{text}\n\n",
            srt_timecode(&begin),
            srt_timecode(&end)
        ));
    }
    out
}

fn attr_value(line: &str, name: &str) -> Option<String> {
    let marker = format!("{name}=\"");
    let start = line.find(&marker)? + marker.len();
    let end = line[start..].find('"')? + start;
    Some(line[start..end].to_string())
}

fn srt_timecode(raw: &str) -> String {
    raw.replace('.', ",")
}

fn cue_text(line: &str) -> String {
    // Body sits between the opening <p ...> and the closing </p>.
    let body = line
        .find('>')
        .map(|open| &line[open + 1..])
        .unwrap_or(line);
    let body = body.strip_suffix("</p>").unwrap_or(body);

    let mut text = body.replace("<br/>", "\n").replace("<br />", "\n");
    // Strip span wrappers but keep their content.
    while let Some(start) = text.find("<span") {
        match text[start..].find('>') {
            Some(end) => text.replace_range(start..start + end + 1, ""),
            None => break,
        }
    }
    text = text.replace("</span>", "");
    text.replace("&apos;", "'")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vtt_italic_markers() {
        let raw = "WEBVTT\n\n00:00.000 --> 00:02.000\n# whispering #\nIt&apos;s here\n";
        let fixed = fix_vtt(raw);
        assert!(fixed.contains("<i>whispering</i>\n"));
        assert!(fixed.contains("It's here\n"));
        assert!(fixed.contains("WEBVTT"));
    }

    #[test]
    fn vtt_one_sided_markers() {
        let fixed = fix_vtt("# starts only\nends only #\n");
        assert!(fixed.contains("<i>starts only\n"));
        assert!(fixed.contains("ends only</i>\n"));
    }

    #[test]
    fn ttml2_basic_conversion() {
        let raw = r#"<?xml version="1.0"?>
<tt xmlns="http://www.w3.org/ns/ttml">
  <body>
    <div>
      <p begin="00:00:01.000" end="00:00:03.500">Hello<br/>world</p>
      <p begin="00:00:04.000" end="00:00:06.000"><span style="s1">It&apos;s me</span></p>
    </div>
  </body>
</tt>"#;
        let srt = ttml2_to_srt(raw);
        assert!(srt.starts_with("1\n00:00:01,000 --> 00:00:03,500\nHello\nworld\n"));
        assert!(srt.contains("2\n00:00:04,000 --> 00:00:06,000\nIt's me\n"));
    }

    #[test]
    fn ttml2_skips_cues_without_text() {
        let raw = r#"<p begin="00:00:01.000" end="00:00:02.000"></p>
<p begin="00:00:02.000" end="00:00:03.000">Real cue</p>"#;
        let srt = ttml2_to_srt(raw);
        assert!(srt.starts_with("1\n00:00:02,000"));
        assert_eq!(srt.matches("-->").count(), 1);
    }
}
