/// Filesystem flavor the sanitized path is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOs {
    Windows,
    /// Covers Linux, macOS and Android. Android additionally rejects `:`
    /// and `?` on its shared storage, so those are stripped here too.
    Posix,
}

impl TargetOs {
    pub fn current() -> Self {
        if cfg!(windows) {
            TargetOs::Windows
        } else {
            TargetOs::Posix
        }
    }
}

/// Map a Windows-forbidden character to a visually similar fullwidth form.
fn windows_substitute(c: char) -> Option<char> {
    match c {
        '|' => Some('｜'),
        '<' => Some('＜'),
        '>' => Some('＞'),
        '"' => Some('＂'),
        '?' => Some('？'),
        '*' => Some('＊'),
        ':' => Some('：'),
        _ => None,
    }
}

/// Sanitize a path for the given OS.
///
/// Directory separators are kept; only the characters inside each
/// component are rewritten. On Windows a leading drive letter keeps its
/// colon. Idempotent: sanitizing an already-sanitized path is a no-op.
pub fn sanitize_path(input: &str, os: TargetOs) -> String {
    match os {
        TargetOs::Windows => sanitize_windows(input),
        TargetOs::Posix => input.replace([':', '?'], ""),
    }
}

fn sanitize_windows(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    // Preserve "C:\" / "C:/" drive prefixes.
    if input.len() >= 2 {
        let bytes = input.as_bytes();
        if bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            out.push(bytes[0] as char);
            out.push(':');
            chars.next();
            chars.next();
        }
    }

    for (_, c) in chars {
        match windows_substitute(c) {
            Some(sub) => out.push(sub),
            None => out.push(c),
        }
    }
    out
}

/// Sanitize a single filename component: like [`sanitize_path`] but
/// separators are forbidden too (mapped to the fullwidth solidus on
/// Windows, stripped on POSIX).
pub fn sanitize_filename(input: &str, os: TargetOs) -> String {
    match os {
        TargetOs::Windows => sanitize_windows(input)
            .replace('/', "／")
            .replace('\\', "＼"),
        TargetOs::Posix => sanitize_path(input, os).replace('/', ""),
    }
}
