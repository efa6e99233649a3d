//! Multiplexer input description, command construction and invocation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use polarity_content::TrackKind;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::PenguinError;

/// Protocols ffmpeg is allowed to open while reading local playlists that
/// still reference remote keys or crypto wrappers.
pub const PROTOCOL_WHITELIST: &str = "file,crypto,data,https,http,tls,tcp";

/// One input the multiplexer reads, created 1:1 with each segment pool.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FfmpegInput {
    pub path: PathBuf,
    /// Local rewritten playlists need `-allowed_extensions ALL`.
    pub hls_playlist: bool,
    /// Codec per declared track kind; `copy` unless a rule overrode it.
    pub codecs: FxHashMap<TrackKind, String>,
    /// Metadata per track kind (`language`, `title`...).
    pub metadata: FxHashMap<TrackKind, Vec<(String, String)>>,
}

impl FfmpegInput {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            hls_playlist: false,
            codecs: FxHashMap::default(),
            metadata: FxHashMap::default(),
        }
    }

    pub fn set_codec(&mut self, kind: TrackKind, codec: impl Into<String>) {
        self.codecs.insert(kind, codec.into());
    }

    pub fn add_metadata(
        &mut self,
        kind: TrackKind,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.metadata
            .entry(kind)
            .or_default()
            .push((key.into(), value.into()));
    }
}

/// Build the full multiplexer argument list (binary name excluded).
///
/// Three parts: inputs (with the protocol whitelist and per-playlist
/// extension allowance), track maps plus per-kind codec and metadata
/// flags with globally increasing per-kind indices, and the output path.
pub fn build_mux_command(inputs: &[FfmpegInput], output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-protocol_whitelist".into(),
        PROTOCOL_WHITELIST.into(),
    ];

    for input in inputs {
        if input.hls_playlist {
            args.push("-allowed_extensions".into());
            args.push("ALL".into());
        }
        args.push("-i".into());
        args.push(input.path.to_string_lossy().into_owned());
    }

    for index in 0..inputs.len() {
        for kind in TrackKind::ALL {
            args.push("-map".into());
            args.push(format!("{index}:{}?", kind.specifier()));
        }
    }

    let mut kind_index: FxHashMap<TrackKind, usize> = FxHashMap::default();
    for input in inputs {
        for kind in TrackKind::ALL {
            let Some(codec) = input.codecs.get(&kind) else {
                continue;
            };
            let index = kind_index.entry(kind).or_insert(0);
            args.push(format!("-c:{}:{}", kind.specifier(), index));
            args.push(codec.clone());
            if let Some(entries) = input.metadata.get(&kind) {
                for (key, value) in entries {
                    args.push(format!("-metadata:s:{}:{}", kind.specifier(), index));
                    args.push(format!("{key}={value}"));
                }
            }
            *index += 1;
        }
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

/// Hide console windows of spawned children on Windows; no-op elsewhere.
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.as_std_mut().creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// Invoke the multiplexer and wait for it. A watchdog tails the
/// `-progress` file for log output; it is purely cosmetic.
pub async fn run_mux(
    binary: &str,
    inputs: &[FfmpegInput],
    output: &Path,
    progress_file: &Path,
    token: &CancellationToken,
) -> Result<(), PenguinError> {
    let mut args = build_mux_command(inputs, output);
    // Insert the progress sink before the output path.
    let output_arg = args.pop().unwrap_or_default();
    args.push("-progress".into());
    args.push(progress_file.to_string_lossy().into_owned());
    args.push("-nostats".into());
    args.push(output_arg);

    info!(binary, output = %output.display(), "invoking multiplexer");
    debug!(?args, "multiplexer command");

    let mut child = tokio_command(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let watchdog = watch_progress(progress_file.to_path_buf());
    tokio::pin!(watchdog);

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = token.cancelled() => {
            child.kill().await.ok();
            return Err(PenguinError::Cancelled);
        }
        _ = &mut watchdog => unreachable!("watchdog never returns"),
    };

    if status.success() {
        Ok(())
    } else {
        Err(PenguinError::MuxFailed {
            status: status.to_string(),
        })
    }
}

/// Tail the `-progress` key=value file and surface `out_time` lines.
/// Loops until the enclosing select drops it.
async fn watch_progress(path: PathBuf) {
    let mut last = String::new();
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if let Ok(content) = tokio::fs::read_to_string(&path).await
            && let Some(out_time) = content
                .lines()
                .rev()
                .find_map(|line| line.strip_prefix("out_time="))
            && out_time != last
        {
            last = out_time.to_string();
            debug!(out_time = %last, "mux progress");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unified_input(path: &str) -> FfmpegInput {
        let mut input = FfmpegInput::new(PathBuf::from(path));
        for kind in TrackKind::ALL {
            input.set_codec(kind, "copy");
        }
        input
    }

    #[test]
    fn trivial_file_command_shape() {
        let input = unified_input("/tmp/clip/unified0.mp4");
        let args = build_mux_command(&[input], Path::new("/out/Movie.mkv"));
        let joined = args.join(" ");
        assert!(joined.contains("-protocol_whitelist file,crypto,data,https,http,tls,tcp"));
        assert!(joined.contains("-i /tmp/clip/unified0.mp4"));
        assert!(joined.contains("-map 0:v? -map 0:a? -map 0:s?"));
        assert!(joined.contains("-c:v:0 copy"));
        assert!(joined.contains("-c:a:0 copy"));
        assert!(joined.contains("-c:s:0 copy"));
        assert!(joined.ends_with("/out/Movie.mkv"));
        assert!(!joined.contains("-allowed_extensions"));
    }

    #[test]
    fn hls_playlist_with_external_subtitle() {
        let mut main = unified_input("/tmp/ep/unified0.m3u8");
        main.hls_playlist = true;
        main.add_metadata(TrackKind::Audio, "language", "ja");

        let mut sub = FfmpegInput::new(PathBuf::from("/tmp/ep/subtitles0_0.vtt"));
        sub.set_codec(TrackKind::Subtitles, "srt");
        sub.add_metadata(TrackKind::Subtitles, "language", "es");
        sub.add_metadata(TrackKind::Subtitles, "title", "Español (España)");

        let args = build_mux_command(&[main, sub], Path::new("/out/E01.mkv"));
        let joined = args.join(" ");

        assert!(joined.contains("-allowed_extensions ALL -i /tmp/ep/unified0.m3u8"));
        assert!(joined.contains("-i /tmp/ep/subtitles0_0.vtt"));
        assert!(joined.contains("-map 0:v? -map 0:a? -map 0:s?"));
        assert!(joined.contains("-map 1:v? -map 1:a? -map 1:s?"));
        // Subtitle indices increase across inputs: the unified input's
        // subtitle slot is 0, the external file's slot is 1.
        assert!(joined.contains("-c:s:0 copy"));
        assert!(joined.contains("-c:s:1 srt"));
        assert!(joined.contains("-metadata:s:s:1 language=es"));
        assert!(joined.contains("-metadata:s:s:1 title=Español (España)"));
        assert!(joined.contains("-metadata:s:a:0 language=ja"));
    }

    #[test]
    fn per_kind_indices_strictly_increase() {
        let inputs = vec![
            unified_input("/tmp/a.m3u8"),
            {
                let mut i = FfmpegInput::new(PathBuf::from("/tmp/audio0.m4a"));
                i.set_codec(TrackKind::Audio, "copy");
                i
            },
            {
                let mut i = FfmpegInput::new(PathBuf::from("/tmp/subtitles0_0.srt"));
                i.set_codec(TrackKind::Subtitles, "copy");
                i
            },
        ];
        let args = build_mux_command(&inputs, Path::new("/out/x.mkv"));
        let joined = args.join(" ");

        // One map triple per input.
        assert_eq!(args.iter().filter(|a| *a == "-map").count(), 9);
        // Audio: slot 0 from the unified input, slot 1 from the extra.
        assert!(joined.contains("-c:a:0 copy"));
        assert!(joined.contains("-c:a:1 copy"));
        assert!(joined.contains("-c:s:1 copy"));
        // Exactly one -c per declared codec.
        let c_flags = args.iter().filter(|a| a.starts_with("-c:")).count();
        assert_eq!(c_flags, 5);
    }

    #[test]
    fn rules_apply_per_input_not_per_kind() {
        // Two subtitle inputs with different extensions keep independent
        // codecs even though both are subtitle tracks.
        let mut vtt = FfmpegInput::new(PathBuf::from("/tmp/subtitles0_0.vtt"));
        vtt.set_codec(TrackKind::Subtitles, "srt");
        let mut ass = FfmpegInput::new(PathBuf::from("/tmp/subtitles1_0.ass"));
        ass.set_codec(TrackKind::Subtitles, "copy");

        let args = build_mux_command(&[vtt, ass], Path::new("/out/x.mkv"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:s:0 srt"));
        assert!(joined.contains("-c:s:1 copy"));
    }
}
