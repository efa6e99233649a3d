mod archive;
mod cli;
mod config;
mod paths;
mod scheduler;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use penguin_engine::{CodecRule, FfmpegConfig, Penguin, PenguinConfig};
use polarity_content::TrackKind;
use polarity_extractors::{SiteOptions, registered_sites};

use crate::archive::DownloadArchive;
use crate::cli::{Args, Mode};
use crate::config::{AppConfig, ConfigError, SiteSection};
use crate::paths::AppPaths;
use crate::scheduler::{Reference, Scheduler, SchedulerOptions};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let app_paths = AppPaths::resolve(args.config_file.as_deref(), args.temp_directory.as_deref());
    if let Err(e) = app_paths.ensure_layout() {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    let config = match AppConfig::load(&app_paths.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&args, &config, &app_paths);
    install_panic_hook(app_paths.logs.clone());
    app_paths.prepend_binaries_to_path();

    let token = CancellationToken::new();
    spawn_interrupt_handler(token.clone());

    let result = match args.mode {
        Mode::Download => run_download(&args, &config, &app_paths, token).await,
        Mode::Search => run_search(&args, &config, &app_paths).await,
        Mode::Livetv => {
            let any = registered_sites().any(|site| site.capabilities.live_tv);
            if !any {
                warn!("no registered extractor supports live TV");
            }
            Ok(())
        }
        Mode::Update => {
            info!("updates are handled by the external updater; run it directly");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_download(
    args: &Args,
    config: &AppConfig,
    app_paths: &AppPaths,
    token: CancellationToken,
) -> Result<(), ConfigError> {
    let references = link_filters(&args.references, args.filters.as_deref())?;

    let penguin = Penguin::new(penguin_config(args, config, app_paths))
        .map_err(|e| ConfigError::Engine(e.to_string()))?;
    let archive = Arc::new(DownloadArchive::open(app_paths.download_log.clone()));

    let site_options = site_options_map(args, config, app_paths);
    // Login-required extractors cannot run without credentials; that is a
    // startup error, not a per-reference one.
    for site in registered_sites().filter(|site| site.capabilities.login_required) {
        let configured = site_options
            .get(site.name)
            .is_some_and(|o| o.email.is_some() && o.password.is_some());
        if !configured {
            return Err(ConfigError::MissingCredential(site.name.to_string()));
        }
    }

    let options = SchedulerOptions {
        active_extractions: config.extractor.active_extractions,
        active_downloads: config.download.active_downloads,
        redownload: args
            .redownload_override()
            .unwrap_or(config.download.redownload),
        output_ext: "mkv".to_string(),
        episode_format: config.download.episode_format.clone(),
        movie_format: config.download.movie_format.clone(),
        series_directory: config.download.series_directory.clone().into(),
        movies_directory: config.download.movies_directory.clone().into(),
        site_options,
    };

    let scheduler = Arc::new(Scheduler::new(
        options,
        reqwest::Client::new(),
        Arc::new(penguin),
        archive,
        token.clone(),
    ));
    let summary = scheduler.start(references).await;

    info!(
        downloaded = summary.downloaded,
        skipped = summary.skipped.len(),
        failed = summary.failed.len(),
        "run finished"
    );
    for (title, reason) in &summary.skipped {
        info!(title = %title, reason = %reason, "skipped");
    }
    for (title, reason) in &summary.failed {
        warn!(title = %title, reason = %reason, "failed");
    }
    Ok(())
}

async fn run_search(
    args: &Args,
    config: &AppConfig,
    app_paths: &AppPaths,
) -> Result<(), ConfigError> {
    let query = args.references.join(" ");
    let client = reqwest::Client::new();
    let site_options = site_options_map(args, config, app_paths);
    let mut shown = 0usize;

    for site in registered_sites().filter(|site| site.capabilities.search) {
        if shown >= config.search.results {
            break;
        }
        let options = site_options.get(site.name).cloned().unwrap_or_default();
        let extractor = match site.build(client.clone(), options) {
            Ok(extractor) => extractor,
            Err(e) => {
                warn!(site = site.name, error = %e, "extractor construction failed");
                continue;
            }
        };
        match extractor
            .search(&query, config.search.results_per_extractor)
            .await
        {
            Ok(results) => {
                for result in results.into_iter().take(config.search.results - shown) {
                    println!("{}", format_search_result(&config.search.result_format, &result));
                    shown += 1;
                }
            }
            Err(e) => warn!(site = site.name, error = %e, "search failed"),
        }
    }

    if shown == 0 {
        warn!(query = %query, "no results");
    }
    Ok(())
}

/// `{n}` name, `{i}` content identifier, `{y}` year.
fn format_search_result(
    template: &str,
    result: &polarity_extractors::driver::SearchResult,
) -> String {
    template
        .replace("{n}", &result.title)
        .replace("{i}", &result.ident.to_string())
        .replace("{y}", &result.year.map(|y| y.to_string()).unwrap_or_default())
}

/// Link global and positional filters to the references: the i-th ref
/// gets `positional[i]` merged with the global set.
fn link_filters(
    references: &[String],
    expression: Option<&str>,
) -> Result<Vec<Reference>, ConfigError> {
    let (global, mut positional) = match expression {
        Some(expr) => polarity_extractors::filters::parse_filter_expression(expr)
            .map_err(|e| ConfigError::BadFilter(e.to_string()))?,
        None => Default::default(),
    };

    Ok(references
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            let mut filters = positional.remove(&index).unwrap_or_default();
            filters.merge(&global);
            Reference {
                reference: reference.clone(),
                filters,
            }
        })
        .collect())
}

fn penguin_config(args: &Args, config: &AppConfig, app_paths: &AppPaths) -> PenguinConfig {
    let section = &config.download.penguin;

    let mut codecs = rustc_hash_map();
    codecs.insert(TrackKind::Video, section.ffmpeg.codecs.video.clone());
    codecs.insert(TrackKind::Audio, section.ffmpeg.codecs.audio.clone());
    codecs.insert(TrackKind::Subtitles, section.ffmpeg.codecs.subtitles.clone());

    let codec_rules = section
        .ffmpeg
        .codec_rules
        .iter()
        .filter_map(|rule| {
            let kind = match rule.kind.as_str() {
                "video" => TrackKind::Video,
                "audio" => TrackKind::Audio,
                "subtitles" => TrackKind::Subtitles,
                other => {
                    warn!(kind = other, "unknown codec rule kind; rule dropped");
                    return None;
                }
            };
            Some(CodecRule {
                ext: rule.ext.clone(),
                kind,
                codec: rule.codec.clone(),
            })
        })
        .collect();

    PenguinConfig {
        attempts: section.attempts,
        threads: section.threads,
        resolution: args.resolution.unwrap_or(config.download.resolution),
        ffmpeg: FfmpegConfig {
            codecs,
            codec_rules,
            ..FfmpegConfig::default()
        },
        temp_dir: app_paths.temp.clone(),
        keep_temp_on_failure: section.tweaks.keep_temp_on_failure,
        dump_commands: section.tweaks.dump_commands,
        ..PenguinConfig::default()
    }
}

fn rustc_hash_map<V>() -> rustc_hash::FxHashMap<TrackKind, V> {
    rustc_hash::FxHashMap::default()
}

fn site_options_map(
    args: &Args,
    config: &AppConfig,
    app_paths: &AppPaths,
) -> HashMap<String, SiteOptions> {
    let mut map = HashMap::new();
    map.insert(
        "crunchyroll".to_string(),
        site_options(
            &config.extractor.crunchyroll,
            args.crunchyroll_email.clone(),
            args.crunchyroll_password.clone(),
            args,
            config,
            app_paths,
        ),
    );
    map.insert(
        "atresplayer".to_string(),
        site_options(
            &config.extractor.atresplayer,
            args.atresplayer_email.clone(),
            args.atresplayer_password.clone(),
            args,
            config,
            app_paths,
        ),
    );
    map
}

fn site_options(
    section: &SiteSection,
    email_flag: Option<String>,
    password_flag: Option<String>,
    args: &Args,
    config: &AppConfig,
    app_paths: &AppPaths,
) -> SiteOptions {
    let non_empty = |s: &String| (!s.is_empty()).then(|| s.clone());
    SiteOptions {
        accounts_dir: app_paths.accounts.clone(),
        email: email_flag.or_else(|| non_empty(&section.email)),
        password: password_flag.or_else(|| non_empty(&section.password)),
        dub_languages: if args.dub_languages.is_empty() {
            section.dub_languages.clone()
        } else {
            args.dub_languages.clone()
        },
        sub_languages: if args.sub_languages.is_empty() {
            section.sub_languages.clone()
        } else {
            args.sub_languages.clone()
        },
        hardsub_language: args
            .hardsub_language
            .clone()
            .or_else(|| non_empty(&section.hardsub_language)),
        prefer_hevc: section.prefer_hevc,
        active_extractions: config.extractor.active_extractions,
    }
}

fn init_logging(
    args: &Args,
    config: &AppConfig,
    app_paths: &AppPaths,
) -> tracing_appender::non_blocking::WorkerGuard {
    let console_level = args.verbose.unwrap_or_else(|| config.console_level());

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let file_appender = tracing_appender::rolling::never(
        &app_paths.logs,
        format!("log_{timestamp}.log"),
    );
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_filter(EnvFilter::new(console_level.directive())),
        )
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new(config.log_file_level().directive())),
        )
        .init();
    guard
}

/// Uncaught errors land in a dated exception log before the process dies.
fn install_panic_hook(logs_dir: std::path::PathBuf) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = logs_dir.join(format!("exception_{timestamp}.log"));
        let _ = std::fs::write(&path, format!("{panic_info}\n"));
        default_hook(panic_info);
    }));
}

/// Cooperative shutdown: stop accepting references, let live children be
/// terminated by their owners, exit 0.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; shutting down");
            token.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_link_globally_and_by_index() {
        let refs = vec!["a".to_string(), "b".to_string()];
        let linked =
            link_filters(&refs, Some("global S01 number i1 E05 number")).unwrap();
        assert_eq!(linked.len(), 2);
        // Both references carry the global season filter.
        assert!(linked[0].filters.wants_episode(1, 3, "x"));
        assert!(linked[1].filters.wants_episode(1, 3, "x"));
        // Only the second carries the positional episode filter.
        assert!(!linked[0].filters.wants_episode(4, 5, "x"));
        assert!(linked[1].filters.wants_episode(4, 5, "x"));
    }

    #[test]
    fn no_expression_means_empty_filters() {
        let refs = vec!["a".to_string()];
        let linked = link_filters(&refs, None).unwrap();
        assert!(linked[0].filters.is_empty());
    }

    #[test]
    fn search_result_formatting() {
        let result = polarity_extractors::driver::SearchResult {
            title: "Spice and Wolf".to_string(),
            ident: polarity_content::ContentIdent::new(
                "crunchyroll",
                polarity_content::ContentKind::Series,
                "GRMG8ZQZR",
            ),
            year: Some(2008),
        };
        assert_eq!(
            format_search_result("{n} ({y}) - {i}", &result),
            "Spice and Wolf (2008) - crunchyroll/series-GRMG8ZQZR"
        );
    }
}
