use serde::{Deserialize, Serialize};

/// How a network's seconds-per-block figure is obtained.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BlockRateStrategy {
    #[default]
    /// Sampled from the chain: latest block vs. a block a bounded distance behind it.
    Measured,
    /// Fixed figure taken from the config file.
    Static { seconds_per_block: f64 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc: String,
    pub upgrade_height: i64,
    #[serde(default)]
    pub block_rate: BlockRateStrategy,
}

impl NetworkConfig {
    /// Lookup key used by the network directory.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn static_rate(&self) -> Option<f64> {
        match self.block_rate {
            BlockRateStrategy::Static { seconds_per_block } => Some(seconds_per_block),
            BlockRateStrategy::Measured => None,
        }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
}
