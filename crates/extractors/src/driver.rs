use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use polarity_content::{ContentIdent, ContentKind, Media, Season, Series};

use crate::error::ExtractorError;
use crate::extractor::VideoExtractor;
use crate::filters::FilterSet;

/// Producer end of the lazy leaf sequence.
///
/// Extractors publish each leaf as soon as its streams are attached; the
/// orchestrator consumes the receiving end concurrently. Dropping the last
/// sink clone is the "extractor finished" signal.
#[derive(Clone)]
pub struct MediaSink {
    tx: mpsc::UnboundedSender<Media>,
}

impl MediaSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Media>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn publish(&self, media: Media) {
        // The receiver only closes when the whole run is shutting down.
        if self.tx.send(media).is_err() {
            debug!("media sink closed; dropping leaf");
        }
    }
}

/// One hit from a catalog search.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub ident: ContentIdent,
    pub year: Option<u32>,
}

/// Generic extraction walk shared by every site extractor.
///
/// Applies the filter-aware wrappers around `get_season_info` and the
/// per-episode detail fetches so unwanted seasons and episodes never cost
/// an API round-trip.
pub struct ExtractionDriver<'a> {
    extractor: &'a dyn VideoExtractor,
    filters: FilterSet,
    /// Bound on concurrent per-season sub-extractions.
    season_concurrency: usize,
}

impl<'a> ExtractionDriver<'a> {
    pub fn new(extractor: &'a dyn VideoExtractor, filters: FilterSet) -> Self {
        Self {
            extractor,
            filters,
            season_concurrency: 3,
        }
    }

    pub fn season_concurrency(mut self, bound: usize) -> Self {
        self.season_concurrency = bound.max(1);
        self
    }

    /// Run the full extraction for one reference, publishing leaves into
    /// the sink as they complete.
    pub async fn run(&self, reference: &str, sink: &MediaSink) -> Result<(), ExtractorError> {
        let name = self.extractor.base().name;

        self.extractor.open_session().await?;
        if self.extractor.capabilities().login_required && !self.extractor.is_logged_in() {
            return Err(ExtractorError::LoginRequired);
        }

        let (kind, id) = match ContentIdent::parse(reference) {
            Ok(ident) => (ident.kind, ident.id),
            Err(_) => self.extractor.identify_url(reference).await?,
        };
        info!(extractor = name, kind = %kind, id = %id, "extraction started");

        match kind {
            ContentKind::Series => self.extract_series(&id, sink).await,
            ContentKind::Season => self.extract_season(&id, sink).await,
            ContentKind::Episode | ContentKind::Movie => self.extract_leaf(&id, sink).await,
        }
    }

    async fn extract_series(&self, series_id: &str, sink: &MediaSink) -> Result<(), ExtractorError> {
        let series = self.extractor.get_series_info(series_id).await?;
        let seasons = self.extractor.get_seasons(series_id).await?;
        info!(
            series = %series.title,
            seasons = seasons.len(),
            "series resolved"
        );

        stream::iter(seasons)
            .for_each_concurrent(self.season_concurrency, |season| {
                let series = &series;
                async move {
                    if let Err(e) = self.walk_season(series, season, sink).await {
                        error!(series = %series.title, error = %e, "season extraction failed");
                    }
                }
            })
            .await;
        Ok(())
    }

    async fn extract_season(&self, season_id: &str, sink: &MediaSink) -> Result<(), ExtractorError> {
        // A bare season reference has no series context yet; the site
        // recovers it from the season payload where it needs it.
        let partial = Season {
            id: season_id.to_string(),
            ..Season::default()
        };
        let series = Series::default();
        self.walk_season(&series, partial, sink).await
    }

    /// The filter-aware season wrapper: seasons the number filter rules
    /// out are left partial, skipping their detail fetch and the whole
    /// episode enumeration below them.
    async fn walk_season(
        &self,
        series: &Series,
        season: Season,
        sink: &MediaSink,
    ) -> Result<(), ExtractorError> {
        if season.number != 0 && !self.filters.wants_season(season.number) {
            debug!(season = %season.title, number = season.number, "season filtered; skipping fetch");
            return Ok(());
        }
        if !self.extractor.season_admitted(&season) {
            debug!(season = %season.title, "season not admitted by extractor");
            return Ok(());
        }

        let season = self
            .extractor
            .get_season_info(&series.id, &season)
            .await?;

        if season.number != 0 && !self.filters.wants_season(season.number) {
            debug!(season = %season.title, number = season.number, "season filtered after fetch");
            return Ok(());
        }

        self.extractor
            .get_episodes_from_season(series, &season, &self.filters, sink)
            .await
    }

    async fn extract_leaf(&self, episode_id: &str, sink: &MediaSink) -> Result<(), ExtractorError> {
        let mut media = self.extractor.get_episode_info(episode_id).await?;
        if !self
            .filters
            .wants_episode(media.lineage.season_number, media.number, &media.title)
        {
            debug!(title = %media.title, "leaf filtered");
            return Ok(());
        }
        attach_streams(self.extractor, &mut media).await;
        sink.publish(media);
        Ok(())
    }
}

/// Attach streams to a leaf, converting extractor failures into a skip
/// reason so the leaf is still listed.
pub async fn attach_streams(extractor: &dyn VideoExtractor, media: &mut Media) {
    if media.skip_reason.is_some() {
        return;
    }
    match extractor.get_streams(media).await {
        Ok(()) => {
            if media.preferred_stream().is_none() {
                media.skip(ExtractorError::NoStreamsFound.skip_reason());
            }
        }
        Err(e) => {
            warn!(title = %media.title, error = %e, "stream enumeration failed");
            media.skip(e.skip_reason());
        }
    }
}
