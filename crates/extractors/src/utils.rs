use regex::Regex;

/// First capture group of `re` in `input`, or `None` when the pattern
/// does not match. Site modules use this for id scraping.
#[inline]
pub fn first_capture(re: &Regex, input: &str) -> Option<String> {
    let caps = re.captures(input)?;
    caps.get(1).map(|m| m.as_str().to_owned())
}
