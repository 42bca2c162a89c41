//! Per-network cache of the latest block height.
//!
//! Each network has one entry moving through `Empty -> Fresh -> Stale ->
//! Refreshing -> Fresh | Stale`. A read returns the cached snapshot while it
//! is younger than the refresh interval. Otherwise the caller either starts a
//! refresh or joins the one already in flight, so there is never more than one
//! upstream refresh per network at a time and every joined caller sees the
//! same outcome. The refresh runs as its own task and publishes into the
//! entry itself, so a caller that stops waiting never strands it.
//!
//! A failed refresh leaves the previous snapshot untouched, including its
//! `observed_at`, so the next read retries straight away.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::{sync::Mutex, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{
    block_rate::{BlockRateEstimator, InsufficientRangeError},
    blockchain_service::{UpstreamClient, UpstreamError},
};
use crate::{
    config::CacheSettings,
    models::{normalize_name, BlockSample, ChainStatus, NetworkConfig},
};

/// Last published state of a network.
#[derive(Clone, Debug, PartialEq)]
pub struct CacheSnapshot {
    pub height: i64,
    pub latest_block_time: DateTime<Utc>,
    pub observed_at: Instant,
    /// Seconds per block, unrounded. `None` until a measurement succeeds.
    pub block_rate: Option<f64>,
    pub rate_measured_at: Option<Instant>,
}

type RefreshResult = Result<CacheSnapshot, UpstreamError>;
type RefreshFuture = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct EntryState {
    snapshot: Option<CacheSnapshot>,
    in_flight: Option<InFlight>,
}

struct CacheEntry {
    network: NetworkConfig,
    client: Arc<dyn UpstreamClient>,
    state: Mutex<EntryState>,
}

impl CacheEntry {
    async fn publish(&self, id: u64, result: &RefreshResult) {
        let mut state = self.state.lock().await;
        if state.in_flight.as_ref().map(|in_flight| in_flight.id) != Some(id) {
            return;
        }
        state.in_flight = None;
        if let Ok(snapshot) = result {
            if let Some(previous) = &state.snapshot {
                if snapshot.height < previous.height {
                    warn!(
                        "Upstream for {} reported height {} below cached height {}",
                        self.network.name, snapshot.height, previous.height
                    );
                }
            }
            state.snapshot = Some(snapshot.clone());
        }
    }
}

#[derive(Error, Debug)]
enum RateMeasurementError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Range(#[from] InsufficientRangeError),
}

pub struct HeightCache {
    entries: HashMap<String, Arc<CacheEntry>>,
    settings: CacheSettings,
    shutdown: CancellationToken,
    next_refresh_id: AtomicU64,
}

impl HeightCache {
    pub fn new(
        networks: Vec<(NetworkConfig, Arc<dyn UpstreamClient>)>,
        settings: CacheSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let entries = networks
            .into_iter()
            .map(|(network, client)| {
                let entry = CacheEntry {
                    network,
                    client,
                    state: Mutex::new(EntryState::default()),
                };
                (entry.network.normalized_name(), Arc::new(entry))
            })
            .collect();

        Self {
            entries,
            settings,
            shutdown,
            next_refresh_id: AtomicU64::new(0),
        }
    }

    /// Current snapshot for `network`, refreshing it first when it is missing
    /// or older than the refresh interval.
    pub async fn get(&self, network: &str) -> RefreshResult {
        let entry = self
            .entries
            .get(&normalize_name(network))
            .cloned()
            .ok_or_else(|| UpstreamError::NotConfigured(network.to_string()))?;

        let pending = {
            let mut state = entry.state.lock().await;
            if let Some(snapshot) = &state.snapshot {
                if snapshot.observed_at.elapsed() <= self.settings.refresh_interval {
                    return Ok(snapshot.clone());
                }
            }
            let joined = state
                .in_flight
                .as_ref()
                .map(|in_flight| in_flight.future.clone());
            match joined {
                Some(joined) => {
                    debug!("Joining in-flight refresh for {}", entry.network.name);
                    joined
                }
                None => {
                    debug!("Refreshing height for {}", entry.network.name);
                    let id = self.next_refresh_id.fetch_add(1, Ordering::Relaxed);
                    let future = self.start_refresh(Arc::clone(&entry), id, state.snapshot.clone());
                    state.in_flight = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };

        pending.await
    }

    /// Refreshes `network` once, logging the outcome. Used to warm the
    /// default network at startup.
    pub async fn warm_up(&self, network: &str) {
        match self.get(network).await {
            Ok(snapshot) => info!(
                "Warmed height cache for {}: height {}, block rate {:?}",
                network, snapshot.height, snapshot.block_rate
            ),
            Err(e) => warn!("Failed to warm height cache for {}: {}", network, e),
        }
    }

    /// Spawns the refresh so it runs to completion and publishes even when
    /// every caller waiting on it goes away.
    fn start_refresh(
        &self,
        entry: Arc<CacheEntry>,
        id: u64,
        previous: Option<CacheSnapshot>,
    ) -> RefreshFuture {
        let client = Arc::clone(&entry.client);
        let network = entry.network.clone();
        let settings = self.settings.clone();
        let shutdown = self.shutdown.clone();

        let future = async move {
            let result = tokio::select! {
                _ = shutdown.cancelled() => Err(UpstreamError::Cancelled),
                result = tokio::time::timeout(
                    settings.upstream_timeout,
                    refresh(client, network, previous, settings.clone()),
                ) => result.unwrap_or(Err(UpstreamError::Timeout)),
            };
            entry.publish(id, &result).await;
            result
        }
        .boxed()
        .shared();

        tokio::spawn(future.clone());
        future
    }

    #[cfg(test)]
    async fn peek(&self, network: &str) -> Option<CacheSnapshot> {
        let entry = self.entries.get(&normalize_name(network))?;
        let state = entry.state.lock().await;
        state.snapshot.clone()
    }
}

async fn refresh(
    client: Arc<dyn UpstreamClient>,
    network: NetworkConfig,
    previous: Option<CacheSnapshot>,
    settings: CacheSettings,
) -> RefreshResult {
    let status = client.get_status().await?;
    let observed_at = Instant::now();

    let (block_rate, rate_measured_at) = match network.static_rate() {
        Some(rate) => (Some(rate), None),
        None => {
            let known = previous
                .as_ref()
                .and_then(|snapshot| snapshot.block_rate.zip(snapshot.rate_measured_at));
            match known {
                Some((rate, measured_at)) if measured_at.elapsed() <= settings.rate_refresh => {
                    (Some(rate), Some(measured_at))
                }
                _ => match measure_rate(client.as_ref(), &status, settings.rate_lookback_blocks)
                    .await
                {
                    Ok(rate) => {
                        debug!("Measured block rate for {}: {:.4}s", network.name, rate);
                        (Some(rate), Some(observed_at))
                    }
                    Err(e) => {
                        warn!(
                            "Block rate measurement for {} failed, keeping previous rate: {}",
                            network.name, e
                        );
                        known.unzip()
                    }
                },
            }
        }
    };

    Ok(CacheSnapshot {
        height: status.latest_height,
        latest_block_time: status.latest_block_time,
        observed_at,
        block_rate,
        rate_measured_at,
    })
}

async fn measure_rate(
    client: &dyn UpstreamClient,
    status: &ChainStatus,
    max_lookback: i64,
) -> Result<f64, RateMeasurementError> {
    let earlier_height = BlockRateEstimator::lookback_height(
        status.latest_height,
        status.earliest_height,
        max_lookback,
    );
    let earlier = if earlier_height == status.earliest_height {
        BlockSample {
            height: status.earliest_height,
            time: status.earliest_block_time,
        }
    } else {
        client.get_header_at_height(earlier_height).await?.into()
    };
    Ok(BlockRateEstimator::estimate(&earlier, &status.latest_sample())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{BlockHeader, BlockRateStrategy},
        services::blockchain_service::MockUpstreamClient,
    };
    use chrono::Duration as ChronoDuration;
    use futures::future::join_all;
    use mockall::predicate::eq;
    use std::time::Duration;

    fn network(name: &str, block_rate: BlockRateStrategy) -> NetworkConfig {
        NetworkConfig {
            name: name.to_string(),
            rpc: "http://localhost:26657".to_string(),
            upgrade_height: 1000,
            block_rate,
        }
    }

    fn status(latest: i64, earliest: i64) -> ChainStatus {
        let latest_time = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        ChainStatus {
            latest_height: latest,
            latest_block_time: latest_time,
            earliest_height: earliest,
            earliest_block_time: latest_time - ChronoDuration::seconds((latest - earliest) * 12),
        }
    }

    fn cache_with(mock: MockUpstreamClient, block_rate: BlockRateStrategy) -> HeightCache {
        cache_with_token(mock, block_rate, CancellationToken::new())
    }

    fn cache_with_token(
        mock: MockUpstreamClient,
        block_rate: BlockRateStrategy,
        shutdown: CancellationToken,
    ) -> HeightCache {
        let client: Arc<dyn UpstreamClient> = Arc::new(mock);
        HeightCache::new(
            vec![(network("Mocha", block_rate), client)],
            CacheSettings::default(),
            shutdown,
        )
    }

    fn static_rate() -> BlockRateStrategy {
        BlockRateStrategy::Static {
            seconds_per_block: 10.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_within_ttl_uses_cache() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status()
            .times(1)
            .returning(|| async { Ok(status(900, 1)) }.boxed());
        let cache = cache_with(mock, static_rate());

        let first = cache.get("Mocha").await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = cache.get("mocha").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.height, 900);
        assert_eq!(second.block_rate, Some(10.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_refreshes() {
        let mut mock = MockUpstreamClient::new();
        let mut calls = 0;
        mock.expect_get_status().times(2).returning(move || {
            calls += 1;
            let height = 900 + calls;
            async move { Ok(status(height, 1)) }.boxed()
        });
        let cache = cache_with(mock, static_rate());

        assert_eq!(cache.get("Mocha").await.unwrap().height, 901);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("Mocha").await.unwrap().height, 902);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_refresh() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status().times(1).returning(|| {
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(status(1200, 1))
            }
            .boxed()
        });
        let cache = cache_with(mock, static_rate());

        let results = join_all((0..8).map(|_| cache.get("Mocha"))).await;

        for result in results {
            assert_eq!(result.unwrap().height, 1200);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_error() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status().times(1).returning(|| {
            async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Err(UpstreamError::Transport("connection refused".to_string()))
            }
            .boxed()
        });
        let cache = cache_with(mock, static_rate());

        let results = join_all((0..5).map(|_| cache.get("Mocha"))).await;

        for result in results {
            assert_eq!(
                result,
                Err(UpstreamError::Transport("connection refused".to_string()))
            );
        }
        assert!(cache.peek("Mocha").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_value_and_retries() {
        let mut mock = MockUpstreamClient::new();
        let mut calls = 0;
        mock.expect_get_status().times(3).returning(move || {
            calls += 1;
            let current = calls;
            async move {
                match current {
                    1 => Ok(status(900, 1)),
                    2 => Err(UpstreamError::Timeout),
                    _ => Ok(status(905, 1)),
                }
            }
            .boxed()
        });
        let cache = cache_with(mock, static_rate());

        let first = cache.get("Mocha").await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.get("Mocha").await, Err(UpstreamError::Timeout));
        assert_eq!(cache.peek("Mocha").await, Some(first));

        // observed_at was not advanced, so the very next read retries
        assert_eq!(cache.get("Mocha").await.unwrap().height, 905);
    }

    #[tokio::test]
    async fn test_unknown_network_never_contacts_upstream() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status().times(0);
        let cache = cache_with(mock, static_rate());

        assert_eq!(
            cache.get("devnet").await,
            Err(UpstreamError::NotConfigured("devnet".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_upstream_times_out() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status().times(1).returning(|| {
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(status(900, 1))
            }
            .boxed()
        });
        let cache = cache_with(mock, static_rate());

        assert_eq!(cache.get("Mocha").await, Err(UpstreamError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_refresh() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status().times(1).returning(|| {
            async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok(status(900, 1))
            }
            .boxed()
        });
        let shutdown = CancellationToken::new();
        let cache = cache_with_token(mock, static_rate(), shutdown.clone());

        let canceller = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.cancel();
        };
        let (result, _) = tokio::join!(cache.get("Mocha"), canceller);

        assert_eq!(result, Err(UpstreamError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_measured_rate_uses_clamped_lookback() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status()
            .times(2)
            .returning(|| async { Ok(status(20_000, 1)) }.boxed());
        mock.expect_get_header_at_height()
            .with(eq(10_000))
            .times(1)
            .returning(|height| {
                let latest = status(20_000, 1).latest_block_time;
                async move {
                    Ok(BlockHeader {
                        height,
                        time: latest - ChronoDuration::seconds(60_000),
                    })
                }
                .boxed()
            });
        let cache = cache_with(mock, BlockRateStrategy::Measured);

        let snapshot = cache.get("Mocha").await.unwrap();
        assert_eq!(snapshot.block_rate, Some(6.0));

        // the rate is still young, so a height refresh does not re-measure it
        tokio::time::advance(Duration::from_secs(11)).await;
        let snapshot = cache.get("Mocha").await.unwrap();
        assert_eq!(snapshot.block_rate, Some(6.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_completes_after_caller_goes_away() {
        let mut mock = MockUpstreamClient::new();
        let mut calls = 0;
        mock.expect_get_status().times(2).returning(move || {
            calls += 1;
            let current = calls;
            async move {
                if current == 1 {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                Ok(status(900 + current, 1))
            }
            .boxed()
        });
        let cache = cache_with(mock, static_rate());

        let abandoned = tokio::time::timeout(Duration::from_secs(1), cache.get("Mocha")).await;
        assert!(abandoned.is_err());

        tokio::time::advance(Duration::from_secs(120)).await;
        tokio::task::yield_now().await;

        assert_eq!(cache.get("Mocha").await.unwrap().height, 902);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_rate_is_measured_again() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status()
            .times(2)
            .returning(|| async { Ok(status(20_000, 1)) }.boxed());
        let mut measurements = 0;
        mock.expect_get_header_at_height()
            .with(eq(10_000))
            .times(2)
            .returning(move |height| {
                measurements += 1;
                let span = if measurements == 1 { 60_000 } else { 80_000 };
                let latest = status(20_000, 1).latest_block_time;
                async move {
                    Ok(BlockHeader {
                        height,
                        time: latest - ChronoDuration::seconds(span),
                    })
                }
                .boxed()
            });
        let cache = cache_with(mock, BlockRateStrategy::Measured);

        assert_eq!(cache.get("Mocha").await.unwrap().block_rate, Some(6.0));

        tokio::time::advance(Duration::from_secs(3_601)).await;
        assert_eq!(cache.get("Mocha").await.unwrap().block_rate, Some(8.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_remeasurement_keeps_previous_rate() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status()
            .times(2)
            .returning(|| async { Ok(status(20_000, 1)) }.boxed());
        let mut measurements = 0;
        mock.expect_get_header_at_height()
            .times(2)
            .returning(move |height| {
                measurements += 1;
                let first = measurements == 1;
                let latest = status(20_000, 1).latest_block_time;
                async move {
                    if first {
                        Ok(BlockHeader {
                            height,
                            time: latest - ChronoDuration::seconds(60_000),
                        })
                    } else {
                        Err(UpstreamError::Timeout)
                    }
                }
                .boxed()
            });
        let cache = cache_with(mock, BlockRateStrategy::Measured);

        let first = cache.get("Mocha").await.unwrap();
        tokio::time::advance(Duration::from_secs(3_601)).await;
        let second = cache.get("Mocha").await.unwrap();

        assert_eq!(second.block_rate, Some(6.0));
        assert_eq!(second.rate_measured_at, first.rate_measured_at);
        assert!(second.observed_at > first.observed_at);
    }

    #[tokio::test]
    async fn test_measured_rate_uses_earliest_block_when_close() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status()
            .times(1)
            .returning(|| async { Ok(status(501, 1)) }.boxed());
        mock.expect_get_header_at_height().times(0);
        let cache = cache_with(mock, BlockRateStrategy::Measured);

        let snapshot = cache.get("Mocha").await.unwrap();
        assert_eq!(snapshot.block_rate, Some(12.0));
    }

    #[tokio::test]
    async fn test_rate_measurement_failure_does_not_fail_refresh() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status()
            .times(1)
            .returning(|| async { Ok(status(50_000, 1)) }.boxed());
        mock.expect_get_header_at_height()
            .times(1)
            .returning(|_| async { Err(UpstreamError::Timeout) }.boxed());
        let cache = cache_with(mock, BlockRateStrategy::Measured);

        let snapshot = cache.get("Mocha").await.unwrap();
        assert_eq!(snapshot.height, 50_000);
        assert_eq!(snapshot.block_rate, None);
    }

    #[tokio::test]
    async fn test_insufficient_range_leaves_rate_absent() {
        let mut mock = MockUpstreamClient::new();
        mock.expect_get_status()
            .times(1)
            .returning(|| async { Ok(status(1, 1)) }.boxed());
        let cache = cache_with(mock, BlockRateStrategy::Measured);

        let snapshot = cache.get("Mocha").await.unwrap();
        assert_eq!(snapshot.height, 1);
        assert_eq!(snapshot.block_rate, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_height_regression_is_published() {
        let mut mock = MockUpstreamClient::new();
        let mut calls = 0;
        mock.expect_get_status().times(2).returning(move || {
            calls += 1;
            let height = if calls == 1 { 900 } else { 899 };
            async move { Ok(status(height, 1)) }.boxed()
        });
        let cache = cache_with(mock, static_rate());

        assert_eq!(cache.get("Mocha").await.unwrap().height, 900);
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("Mocha").await.unwrap().height, 899);
    }
}
