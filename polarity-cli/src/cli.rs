use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Download,
    Search,
    Livetv,
    Update,
}

/// Verbosity levels, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VerboseLevel {
    Quiet,
    Critical,
    Error,
    Warning,
    Info,
    Debug,
    Verbose,
}

impl VerboseLevel {
    /// Directive for the tracing `EnvFilter`.
    pub fn directive(&self) -> &'static str {
        match self {
            VerboseLevel::Quiet => "off",
            VerboseLevel::Critical | VerboseLevel::Error => "error",
            VerboseLevel::Warning => "warn",
            VerboseLevel::Info => "info",
            VerboseLevel::Debug => "debug",
            VerboseLevel::Verbose => "trace",
        }
    }

    pub fn parse_config_value(raw: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(raw, true).ok()
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "polarity",
    version,
    about = "Batch video acquisition engine",
    arg_required_else_help = true
)]
pub struct Args {
    /// Content references: site URLs or `{extractor}/{type}-{id}` ids.
    /// In search mode, the terms to search for.
    #[arg(value_name = "ref", required = true)]
    pub references: Vec<String>,

    #[arg(short, long, value_enum, default_value = "download")]
    pub mode: Mode,

    /// Preferred video height.
    #[arg(long)]
    pub resolution: Option<u32>,

    /// Download content already present in the archive.
    #[arg(long, overrides_with = "dont_redownload")]
    pub redownload: bool,

    /// Skip content already present in the archive.
    #[arg(long = "dont-redownload", overrides_with = "redownload")]
    pub dont_redownload: bool,

    /// Verbosity of console output.
    #[arg(short, long, value_enum)]
    pub verbose: Option<VerboseLevel>,

    /// Filter expression, e.g. `"i0 S01E07 number global S02 number"`.
    #[arg(long)]
    pub filters: Option<String>,

    #[arg(long, value_name = "EMAIL")]
    pub crunchyroll_email: Option<String>,
    #[arg(long, value_name = "PASSWORD")]
    pub crunchyroll_password: Option<String>,
    #[arg(long, value_name = "EMAIL")]
    pub atresplayer_email: Option<String>,
    #[arg(long, value_name = "PASSWORD")]
    pub atresplayer_password: Option<String>,

    /// Audio languages to keep (seasons in other dubs are skipped).
    #[arg(long = "dub-language", value_name = "LANG")]
    pub dub_languages: Vec<String>,

    /// Subtitle languages to attach.
    #[arg(long = "sub-language", value_name = "LANG")]
    pub sub_languages: Vec<String>,

    /// Hardsub locale for variant selection.
    #[arg(long, value_name = "LANG")]
    pub hardsub_language: Option<String>,

    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[arg(long, value_name = "PATH")]
    pub temp_directory: Option<PathBuf>,
}

impl Args {
    /// Redownload preference, `None` when neither flag was given.
    pub fn redownload_override(&self) -> Option<bool> {
        if self.redownload {
            Some(true)
        } else if self.dont_redownload {
            Some(false)
        } else {
            None
        }
    }
}
