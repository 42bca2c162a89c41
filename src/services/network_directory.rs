use std::collections::HashMap;

use crate::{
    config::ConfigError,
    models::{normalize_name, NetworkConfig},
};

/// Immutable name -> network mapping built once from the validated config.
#[derive(Clone, Debug, Default)]
pub struct NetworkDirectory {
    networks: HashMap<String, NetworkConfig>,
}

impl NetworkDirectory {
    pub fn new(networks: Vec<NetworkConfig>) -> Result<Self, ConfigError> {
        let mut map = HashMap::with_capacity(networks.len());
        for network in networks {
            let key = network.normalized_name();
            if map.contains_key(&key) {
                return Err(ConfigError::DuplicateNetwork(network.name));
            }
            map.insert(key, network);
        }
        Ok(Self { networks: map })
    }

    /// Case-insensitive exact lookup.
    pub fn resolve(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.get(&normalize_name(name))
    }
}
