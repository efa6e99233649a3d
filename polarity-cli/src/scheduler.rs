//! Orchestrator: two bounded worker pools cooperating through a shared
//! reference pool and a FIFO download queue. Extraction workers turn
//! references into leaves (published progressively); download workers
//! drain the queue until the last extractor is done.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use penguin_engine::Penguin;
use polarity_content::{
    ContentIdent, ContentKind, Media, MediaKind, NameFields, TargetOs, format_name,
};
use polarity_extractors::{
    ExtractionDriver, FilterSet, MediaSink, SiteOptions, find_by_name, find_for_url,
};

use crate::archive::DownloadArchive;

/// One user-supplied reference with its linked filters.
#[derive(Debug, Clone)]
pub struct Reference {
    pub reference: String,
    pub filters: FilterSet,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub active_extractions: usize,
    pub active_downloads: usize,
    pub redownload: bool,
    pub output_ext: String,
    pub episode_format: String,
    pub movie_format: String,
    pub series_directory: PathBuf,
    pub movies_directory: PathBuf,
    /// Per-extractor construction options, keyed by registry name.
    pub site_options: HashMap<String, SiteOptions>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub downloaded: usize,
    /// `(title, reason)` pairs, shown at the end of the run.
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

struct PoolEntry {
    reference: String,
    filters: FilterSet,
    reserved: bool,
}

pub struct Scheduler {
    options: SchedulerOptions,
    client: reqwest::Client,
    penguin: Arc<Penguin>,
    archive: Arc<DownloadArchive>,
    token: CancellationToken,
    summary: Mutex<RunSummary>,
}

impl Scheduler {
    pub fn new(
        options: SchedulerOptions,
        client: reqwest::Client,
        penguin: Arc<Penguin>,
        archive: Arc<DownloadArchive>,
        token: CancellationToken,
    ) -> Self {
        Self {
            options,
            client,
            penguin,
            archive,
            token,
            summary: Mutex::new(RunSummary::default()),
        }
    }

    /// Returns once every reference has completed its download or been
    /// marked skipped.
    pub async fn start(self: &Arc<Self>, references: Vec<Reference>) -> RunSummary {
        if references.is_empty() {
            warn!("no references given; nothing to do");
            return std::mem::take(&mut *self.summary.lock());
        }

        let extraction_workers = clamp_workers(self.options.active_extractions, references.len());
        let download_workers = clamp_workers(self.options.active_downloads, references.len());
        info!(
            references = references.len(),
            extraction_workers, download_workers, "run started"
        );

        let pool: Arc<Mutex<Vec<PoolEntry>>> = Arc::new(Mutex::new(
            references
                .into_iter()
                .map(|r| PoolEntry {
                    reference: r.reference,
                    filters: r.filters,
                    reserved: false,
                })
                .collect(),
        ));

        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Media>();
        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));

        let mut extractions = Vec::with_capacity(extraction_workers);
        for _ in 0..extraction_workers {
            let this = Arc::clone(self);
            let pool = Arc::clone(&pool);
            let queue_tx = queue_tx.clone();
            extractions.push(tokio::spawn(async move {
                this.extraction_worker(pool, queue_tx).await;
            }));
        }
        // The workers hold the only remaining senders: when the last one
        // exits, download workers see the queue close and drain out.
        drop(queue_tx);

        let mut downloads = Vec::with_capacity(download_workers);
        for _ in 0..download_workers {
            let this = Arc::clone(self);
            let queue_rx = Arc::clone(&queue_rx);
            downloads.push(tokio::spawn(async move {
                this.download_worker(queue_rx).await;
            }));
        }

        for handle in extractions {
            let _ = handle.await;
        }
        for handle in downloads {
            let _ = handle.await;
        }

        std::mem::take(&mut *self.summary.lock())
    }

    /// Pick-and-mark under the pool lock, extract outside it. Reservation
    /// is monotonic: entries are never released back.
    async fn extraction_worker(
        &self,
        pool: Arc<Mutex<Vec<PoolEntry>>>,
        queue_tx: mpsc::UnboundedSender<Media>,
    ) {
        loop {
            if self.token.is_cancelled() {
                return;
            }
            let next = {
                let mut guard = pool.lock();
                match guard.iter_mut().find(|entry| !entry.reserved) {
                    Some(entry) => {
                        entry.reserved = true;
                        Some((entry.reference.clone(), entry.filters.clone()))
                    }
                    None => None,
                }
            };
            let Some((reference, filters)) = next else {
                return;
            };

            if let Err(e) = self.extract_reference(&reference, filters, &queue_tx).await {
                // A crash affects only this reference.
                error!(reference = %reference, error = %e, "extraction failed");
            }
        }
    }

    async fn extract_reference(
        &self,
        reference: &str,
        filters: FilterSet,
        queue_tx: &mpsc::UnboundedSender<Media>,
    ) -> Result<(), polarity_extractors::ExtractorError> {
        // Content ids resolve by extractor name, URLs by host pattern.
        let entry = match ContentIdent::parse(reference) {
            Ok(ident) => find_by_name(&ident.extractor),
            Err(_) => find_for_url(reference),
        };
        let Some(entry) = entry else {
            error!(reference = %reference, "no compatible extractor");
            return Ok(());
        };

        let site_options = self
            .options
            .site_options
            .get(entry.name)
            .cloned()
            .unwrap_or_default();
        let extractor = entry.build(self.client.clone(), site_options)?;

        let (sink, mut rx) = MediaSink::channel();
        let driver = ExtractionDriver::new(extractor.as_ref(), filters)
            .season_concurrency(self.options.active_extractions);

        let reference_owned = reference.to_string();
        let producer = async move { driver.run(&reference_owned, &sink).await };
        let consumer = async {
            while let Some(media) = rx.recv().await {
                self.enqueue(media, queue_tx);
            }
        };

        let (result, ()) = tokio::join!(producer, consumer);
        result
    }

    /// Compute the leaf's output path, gate on the archive, append to the
    /// queue. Called exactly once per leaf (I6).
    fn enqueue(&self, mut media: Media, queue_tx: &mpsc::UnboundedSender<Media>) {
        let ident = leaf_ident(&media);

        if !self.options.redownload && self.archive.contains(&ident.to_string()) {
            info!(content = %ident, "already in download archive; skipping");
            self.summary
                .lock()
                .skipped
                .push((media.title.clone(), "already downloaded".to_string()));
            return;
        }

        media.output = Some(output_path_for(&media, &self.options));
        if queue_tx.send(media).is_err() {
            warn!("download queue closed before enqueue");
        }
    }

    async fn download_worker(&self, queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Media>>>) {
        loop {
            let media = {
                let mut rx = queue_rx.lock().await;
                tokio::select! {
                    media = rx.recv() => media,
                    _ = self.token.cancelled() => None,
                }
            };
            let Some(media) = media else { return };

            if let Some(reason) = &media.skip_reason {
                warn!(content = %media.title, reason = %reason, "leaf skipped");
                self.summary
                    .lock()
                    .skipped
                    .push((media.title.clone(), reason.clone()));
                continue;
            }

            let ident = leaf_ident(&media);
            match self.penguin.download(&media, &self.token).await {
                Ok(path) => {
                    info!(content = %ident, path = %path.display(), "leaf downloaded");
                    self.archive.append(&ident.to_string());
                    self.summary.lock().downloaded += 1;
                }
                Err(e) => {
                    // Fatal for this leaf, not for the rest of the queue.
                    error!(content = %ident, error = %e, "download failed");
                    self.summary
                        .lock()
                        .failed
                        .push((media.title.clone(), e.to_string()));
                }
            }
        }
    }
}

fn leaf_ident(media: &Media) -> ContentIdent {
    let kind = match media.kind {
        MediaKind::Episode => ContentKind::Episode,
        MediaKind::Movie => ContentKind::Movie,
    };
    ContentIdent::new(media.lineage.extractor.clone(), kind, media.id.clone())
}

/// Caps exceeding the input count are clamped down; at least one worker
/// always runs.
pub(crate) fn clamp_workers(cap: usize, inputs: usize) -> usize {
    cap.clamp(1, inputs.max(1))
}

/// Expand the kind-matching template under the kind-matching base
/// directory, sanitized once.
pub(crate) fn output_path_for(media: &Media, options: &SchedulerOptions) -> PathBuf {
    let (base, template) = match media.kind {
        MediaKind::Episode => (&options.series_directory, &options.episode_format),
        MediaKind::Movie => (&options.movies_directory, &options.movie_format),
    };
    let fields = NameFields::from_media(media, options.output_ext.clone());
    base.join(format_name(template, &fields, TargetOs::current()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use penguin_engine::PenguinConfig;

    fn test_options(dir: &std::path::Path) -> SchedulerOptions {
        SchedulerOptions {
            active_extractions: 3,
            active_downloads: 2,
            redownload: false,
            output_ext: "mkv".to_string(),
            episode_format: "{S}/Season {Sn}/{S} {sn}x{en} - {E}.{ext}".to_string(),
            movie_format: "{E} ({Y}).{ext}".to_string(),
            series_directory: dir.join("Series"),
            movies_directory: dir.join("Movies"),
            site_options: HashMap::new(),
        }
    }

    fn test_scheduler(dir: &std::path::Path) -> Arc<Scheduler> {
        let penguin = Penguin::new(PenguinConfig {
            temp_dir: dir.join("Temp"),
            ..PenguinConfig::default()
        })
        .unwrap();
        Arc::new(Scheduler::new(
            test_options(dir),
            reqwest::Client::new(),
            Arc::new(penguin),
            Arc::new(DownloadArchive::open(dir.join("download.log"))),
            CancellationToken::new(),
        ))
    }

    #[test]
    fn worker_caps_clamp_to_input_count() {
        assert_eq!(clamp_workers(5, 2), 2);
        assert_eq!(clamp_workers(1, 10), 1);
        assert_eq!(clamp_workers(4, 4), 4);
        assert_eq!(clamp_workers(3, 0), 1);
        assert_eq!(clamp_workers(0, 5), 1);
    }

    #[test]
    fn output_paths_follow_kind_templates() {
        let dir = tempfile::tempdir().unwrap();
        let options = test_options(dir.path());

        let mut episode = Media::episode("The Deal", "e7", 7);
        episode.lineage.series_title = "Spice and Wolf".into();
        episode.lineage.season_number = 1;
        let path = output_path_for(&episode, &options);
        assert_eq!(
            path,
            dir.path()
                .join("Series/Spice and Wolf/Season 1/Spice and Wolf 01x07 - The Deal.mkv")
        );

        let mut movie = Media::movie("Big Film", "m1");
        movie.lineage.series_year = Some(2020);
        let path = output_path_for(&movie, &options);
        assert_eq!(path, dir.path().join("Movies/Big Film (2020).mkv"));
    }

    #[tokio::test]
    async fn empty_reference_list_returns_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path());
        let summary = scheduler.start(Vec::new()).await;
        assert_eq!(summary.downloaded, 0);
        assert!(summary.skipped.is_empty());
        assert!(summary.failed.is_empty());
    }

    #[tokio::test]
    async fn unmatched_reference_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path());
        let summary = scheduler
            .start(vec![Reference {
                reference: "https://example.com/not-a-known-site".to_string(),
                filters: FilterSet::default(),
            }])
            .await;
        assert_eq!(summary.downloaded, 0);
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn archive_gate_skips_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = test_scheduler(dir.path());
        scheduler.archive.append("crunchyroll/episode-e7");

        let mut media = Media::episode("The Deal", "e7", 7);
        media.lineage.extractor = "crunchyroll".into();
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.enqueue(media, &tx);
        drop(tx);

        assert!(rx.try_recv().is_err());
        assert_eq!(scheduler.summary.lock().skipped.len(), 1);
    }
}
