use thiserror::Error;

use crate::models::BlockSample;

/// Used when a measured network has no successful measurement yet.
pub const DEFAULT_SECONDS_PER_BLOCK: f64 = 6.0;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Insufficient block range: earlier height {earlier}, later height {later}")]
pub struct InsufficientRangeError {
    pub earlier: i64,
    pub later: i64,
}

pub struct BlockRateEstimator;

impl BlockRateEstimator {
    /// Average seconds per block between two samples, unrounded.
    pub fn estimate(
        earlier: &BlockSample,
        later: &BlockSample,
    ) -> Result<f64, InsufficientRangeError> {
        let blocks = later
            .height
            .checked_sub(earlier.height)
            .filter(|blocks| *blocks > 0)
            .ok_or(InsufficientRangeError {
                earlier: earlier.height,
                later: later.height,
            })?;
        let elapsed = later.time - earlier.time;
        let seconds = elapsed.num_milliseconds() as f64 / 1000.0;
        Ok(seconds / blocks as f64)
    }

    /// Height of the earlier sample: never further than `max_lookback` behind
    /// `latest`, and never below the node's earliest retained block.
    pub fn lookback_height(latest: i64, earliest: i64, max_lookback: i64) -> i64 {
        earliest.max(latest.saturating_sub(max_lookback))
    }

    pub fn round(rate: f64) -> f64 {
        (rate * 100.0).round() / 100.0
    }
}
