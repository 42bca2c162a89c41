use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockRateSource {
    Measured,
    Static,
    /// No measurement available yet, the built-in default was used.
    Default,
}

/// Everything the presentation layer needs to render a countdown.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CountdownResult {
    pub network_name: String,
    pub current_height: i64,
    pub upgrade_height: i64,
    /// Negative once the upgrade height has been passed.
    pub blocks_remaining: i64,
    pub estimated_seconds_remaining: f64,
    /// Unrounded seconds per block.
    pub block_rate: f64,
    pub block_rate_source: BlockRateSource,
    pub estimated_upgrade_time: DateTime<Utc>,
}

impl CountdownResult {
    pub fn upgrade_reached(&self) -> bool {
        self.blocks_remaining <= 0
    }
}

#[derive(Debug, Serialize)]
pub struct HeightStatus {
    pub current_height: i64,
}
