//! Segment-downloader workers: bounded-parallel fetch over the content's
//! pools with resume, lazy key download and subtitle post-processing.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use reqwest::Client;
use rustc_hash::FxHashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use polarity_content::KeyMethod;

use crate::config::PenguinConfig;
use crate::error::{PenguinError, retryable_status};
use crate::retry::{RetryAction, RetryPolicy, retry_with_backoff};
use crate::segment::{Segment, SegmentPool};
use crate::state::{DownloadStats, StatePaths};
use crate::subtitles;

/// Shared per-content downloader state.
pub struct DownloadContext {
    pub paths: StatePaths,
    pub pools: Vec<Arc<Mutex<SegmentPool>>>,
    pub stats: Arc<Mutex<DownloadStats>>,
    /// Key URL → local key file, downloaded lazily on first encounter.
    pub key_files: FxHashMap<String, PathBuf>,
    pub total_segments: usize,
}

/// Launch the configured number of segment downloaders and wait for all
/// of them.
pub async fn run_segment_downloaders(
    ctx: Arc<DownloadContext>,
    client: Client,
    config: Arc<PenguinConfig>,
    token: CancellationToken,
) {
    let mut workers = Vec::with_capacity(config.threads);
    for worker_id in 0..config.threads.max(1) {
        let ctx = Arc::clone(&ctx);
        let client = client.clone();
        let config = Arc::clone(&config);
        let token = token.clone();
        workers.push(tokio::spawn(async move {
            segment_worker(worker_id, ctx, client, config, token).await;
        }));
    }
    for worker in workers {
        if let Err(e) = worker.await {
            error!(error = %e, "segment downloader panicked");
        }
    }
}

/// One worker: acquire a pool (or assist a busy one), drain it segment by
/// segment, exit when every pool is finished.
async fn segment_worker(
    worker_id: usize,
    ctx: Arc<DownloadContext>,
    client: Client,
    config: Arc<PenguinConfig>,
    token: CancellationToken,
) {
    let policy = RetryPolicy::new(config.attempts, config.retry_delay);

    loop {
        if token.is_cancelled() {
            return;
        }

        let Some(pool) = acquire_pool(&ctx.pools, worker_id) else {
            if all_finished(&ctx.pools) {
                debug!(worker_id, "all pools finished; downloader exiting");
                return;
            }
            // Unfinished pools are fully handed out; wait for stragglers.
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => continue,
            }
        };

        drain_pool(worker_id, &pool, &ctx, &client, &config, &policy, &token).await;
    }
}

/// Prefer the first unreserved pool with work left; otherwise assist a
/// random unfinished one so long pools parallelize across workers.
fn acquire_pool(
    pools: &[Arc<Mutex<SegmentPool>>],
    worker_id: usize,
) -> Option<Arc<Mutex<SegmentPool>>> {
    for pool in pools {
        let mut guard = pool.lock();
        if guard.reserved_by.is_none() && !guard.finished && !guard.is_drained() {
            guard.reserved_by = Some(worker_id);
            return Some(Arc::clone(pool));
        }
    }

    let assistable: Vec<&Arc<Mutex<SegmentPool>>> = pools
        .iter()
        .filter(|pool| {
            let guard = pool.lock();
            !guard.finished && !guard.is_drained()
        })
        .collect();
    if assistable.is_empty() {
        return None;
    }
    let pick = rand::rng().random_range(0..assistable.len());
    Some(Arc::clone(assistable[pick]))
}

fn all_finished(pools: &[Arc<Mutex<SegmentPool>>]) -> bool {
    pools.iter().all(|pool| pool.lock().finished)
}

async fn drain_pool(
    worker_id: usize,
    pool: &Arc<Mutex<SegmentPool>>,
    ctx: &DownloadContext,
    client: &Client,
    config: &PenguinConfig,
    policy: &RetryPolicy,
    token: &CancellationToken,
) {
    loop {
        if token.is_cancelled() {
            return;
        }

        let segment = {
            let mut guard = pool.lock();
            match guard.pop() {
                Some(segment) => {
                    guard.in_flight += 1;
                    segment
                }
                None => {
                    if guard.in_flight == 0 && !guard.finished {
                        guard.finished = true;
                        info!(worker_id, pool = %guard.id, "pool finished");
                    }
                    return;
                }
            }
        };

        let result = process_segment(&segment, ctx, client, config, policy, token).await;

        {
            let mut guard = pool.lock();
            guard.in_flight -= 1;
            if guard.is_drained() && guard.in_flight == 0 && !guard.finished {
                guard.finished = true;
                info!(worker_id, pool = %guard.id, "pool finished");
            }
        }

        if let Err(e) = result {
            if matches!(e, PenguinError::Cancelled) {
                return;
            }
            // The leaf's mux step surfaces the gap if the segment was
            // essential.
            error!(segment = %segment.qualified_id(), error = %e, "segment failed; moving on");
        }
    }
}

async fn process_segment(
    segment: &Segment,
    ctx: &DownloadContext,
    client: &Client,
    config: &PenguinConfig,
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> Result<(), PenguinError> {
    let qualified = segment.qualified_id();
    if ctx.stats.lock().is_downloaded(&qualified) {
        debug!(segment = %qualified, "already on disk; skipping");
        return Ok(());
    }

    // AES keys are fetched once, on the first segment that carries them.
    if let Some(key) = &segment.key
        && key.method == KeyMethod::Aes128
        && let Some(url) = &key.url
        && let Some(path) = ctx.key_files.get(url)
        && !path.exists()
    {
        let bytes = fetch_with_retry(client, url, None, policy, token, config.segment_timeout).await?;
        tokio::fs::write(path, &bytes).await?;
        debug!(key = %path.display(), "key file stored");
    }

    let bytes = fetch_with_retry(
        client,
        &segment.url,
        segment.byte_range.as_ref().map(|r| r.header_value()),
        policy,
        token,
        config.segment_timeout,
    )
    .await?;

    let byte_count = bytes.len() as u64;
    let target = segment.file_path(&ctx.paths.temp_dir);

    match segment.ext.as_str() {
        ".vtt" => {
            let text = String::from_utf8_lossy(&bytes);
            tokio::fs::write(&target, subtitles::fix_vtt(&text)).await?;
        }
        ".ttml2" => {
            let text = String::from_utf8_lossy(&bytes);
            let converted = subtitles::ttml2_to_srt(&text);
            let renamed = target.with_extension("srt");
            tokio::fs::write(&renamed, converted).await?;
        }
        _ => tokio::fs::write(&target, &bytes).await?,
    }

    let mut stats = ctx.stats.lock();
    stats.record_segment(&qualified, byte_count);
    stats.update_estimate(ctx.total_segments);
    if let Err(e) = stats.save(&ctx.paths) {
        warn!(error = %e, "stats save failed");
    }
    Ok(())
}

async fn fetch_with_retry(
    client: &Client,
    url: &str,
    range: Option<String>,
    policy: &RetryPolicy,
    token: &CancellationToken,
    // Per-segment GET timeout lives in the request, not the client, so
    // manifest fetches elsewhere keep their own limits.
    timeout: std::time::Duration,
) -> Result<bytes::Bytes, PenguinError> {
    retry_with_backoff(policy, token, |_| {
        let mut request = client.get(url).timeout(timeout);
        if let Some(range) = &range {
            request = request.header(reqwest::header::RANGE, range.clone());
        }
        async move {
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.bytes().await {
                            Ok(bytes) => RetryAction::Success(bytes),
                            Err(e) => RetryAction::Retry(PenguinError::Network { source: e }),
                        }
                    } else if retryable_status(status) {
                        RetryAction::Retry(PenguinError::http_status(status, url))
                    } else {
                        RetryAction::Fail(PenguinError::http_status(status, url))
                    }
                }
                Err(e) => RetryAction::Retry(PenguinError::Network { source: e }),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{PoolFormat, PoolIdGenerator};
    use polarity_content::TrackKind;

    fn pool_with(ids: &mut PoolIdGenerator, count: i64) -> SegmentPool {
        let mut pool = SegmentPool::new(PoolFormat::Unified, ids.next_id(PoolFormat::Unified), 0);
        for n in 0..count {
            pool.push(Segment {
                url: format!("https://cdn.invalid/{n}.ts"),
                number: n,
                kind: TrackKind::Video,
                key: None,
                group: pool.id.clone(),
                duration: 4.0,
                init: false,
                ext: ".ts".to_string(),
                byte_range: None,
                finished: false,
            });
        }
        pool
    }

    /// Resume: segments already in the downloaded set are skipped without
    /// touching the network (the URLs here would not resolve).
    #[tokio::test]
    async fn resumed_segments_are_not_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::new(dir.path(), "Show S01E01");
        std::fs::create_dir_all(&paths.temp_dir).unwrap();

        let mut ids = PoolIdGenerator::default();
        let pool = pool_with(&mut ids, 5);

        let mut stats = DownloadStats::default();
        for n in 0..5 {
            stats.record_segment(&format!("unified0_{n}"), 100);
        }

        let ctx = Arc::new(DownloadContext {
            paths,
            pools: vec![Arc::new(Mutex::new(pool))],
            stats: Arc::new(Mutex::new(stats)),
            key_files: FxHashMap::default(),
            total_segments: 5,
        });

        let config = Arc::new(PenguinConfig {
            threads: 3,
            attempts: 1,
            ..PenguinConfig::default()
        });
        let client = config.build_client().unwrap();
        let token = CancellationToken::new();

        run_segment_downloaders(Arc::clone(&ctx), client, config, token).await;

        assert!(ctx.pools[0].lock().finished);
        assert_eq!(ctx.stats.lock().downloaded_bytes, 500);
    }

    #[test]
    fn acquire_prefers_unreserved_then_assists() {
        let mut ids = PoolIdGenerator::default();
        let pools: Vec<Arc<Mutex<SegmentPool>>> = vec![
            Arc::new(Mutex::new(pool_with(&mut ids, 3))),
            Arc::new(Mutex::new(pool_with(&mut ids, 3))),
        ];

        let first = acquire_pool(&pools, 0).unwrap();
        assert_eq!(first.lock().reserved_by, Some(0));
        let second = acquire_pool(&pools, 1).unwrap();
        assert_eq!(second.lock().reserved_by, Some(1));

        // Both reserved: worker 2 assists one of them without taking the
        // reservation over.
        let assist = acquire_pool(&pools, 2).unwrap();
        let owner = assist.lock().reserved_by;
        assert!(owner == Some(0) || owner == Some(1));
    }

    #[test]
    fn acquire_returns_none_when_everything_is_done() {
        let mut ids = PoolIdGenerator::default();
        let mut pool = pool_with(&mut ids, 1);
        pool.pop();
        pool.finished = true;
        let pools = vec![Arc::new(Mutex::new(pool))];
        assert!(acquire_pool(&pools, 0).is_none());
    }
}
