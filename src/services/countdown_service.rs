use chrono::{DateTime, TimeDelta, Utc};
use log::error;

use super::{
    block_rate::DEFAULT_SECONDS_PER_BLOCK, height_cache::CacheSnapshot,
    height_cache::HeightCache, network_directory::NetworkDirectory,
};
use crate::{
    errors::CountdownError,
    models::{BlockRateSource, CountdownResult, NetworkConfig},
};

/// Per-request orchestration: directory lookup, cached height, projection.
pub struct CountdownResolver {
    directory: NetworkDirectory,
    cache: HeightCache,
    default_network: String,
}

impl CountdownResolver {
    pub fn new(directory: NetworkDirectory, cache: HeightCache, default_network: String) -> Self {
        Self {
            directory,
            cache,
            default_network,
        }
    }

    pub fn default_network(&self) -> &str {
        &self.default_network
    }

    pub fn cache(&self) -> &HeightCache {
        &self.cache
    }

    pub async fn resolve(&self, network_name: &str) -> Result<CountdownResult, CountdownError> {
        let (network, snapshot) = self.snapshot(network_name).await?;
        Ok(project_countdown(network, &snapshot))
    }

    pub async fn current_height(&self, network_name: &str) -> Result<i64, CountdownError> {
        let (_, snapshot) = self.snapshot(network_name).await?;
        Ok(snapshot.height)
    }

    async fn snapshot(
        &self,
        network_name: &str,
    ) -> Result<(&NetworkConfig, CacheSnapshot), CountdownError> {
        let network = self
            .directory
            .resolve(network_name)
            .ok_or_else(|| CountdownError::NetworkNotFound(network_name.to_string()))?;

        let snapshot = self.cache.get(&network.name).await.map_err(|source| {
            error!("Failed to refresh height for {}: {}", network.name, source);
            CountdownError::Upstream {
                network: network.name.clone(),
                source,
            }
        })?;
        Ok((network, snapshot))
    }
}

/// Derives the countdown from a cached snapshot. Past-due upgrades yield
/// negative remaining blocks and seconds.
pub fn project_countdown(network: &NetworkConfig, snapshot: &CacheSnapshot) -> CountdownResult {
    let (block_rate, block_rate_source) = match (snapshot.block_rate, network.static_rate()) {
        (Some(rate), Some(_)) => (rate, BlockRateSource::Static),
        (Some(rate), None) => (rate, BlockRateSource::Measured),
        (None, _) => (DEFAULT_SECONDS_PER_BLOCK, BlockRateSource::Default),
    };
    let blocks_remaining = network.upgrade_height.saturating_sub(snapshot.height);
    let estimated_seconds_remaining = blocks_remaining as f64 * block_rate;
    let estimated_upgrade_time =
        project_time(snapshot.latest_block_time, estimated_seconds_remaining);

    CountdownResult {
        network_name: network.name.clone(),
        current_height: snapshot.height,
        upgrade_height: network.upgrade_height,
        blocks_remaining,
        estimated_seconds_remaining,
        block_rate,
        block_rate_source,
        estimated_upgrade_time,
    }
}

/// `from + seconds`, saturating at the ends of the representable range.
fn project_time(from: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    TimeDelta::try_milliseconds((seconds * 1000.0).round() as i64)
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(if seconds < 0.0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}
