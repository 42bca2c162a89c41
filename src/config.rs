use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::models::{normalize_name, BlockRateStrategy, NetworkConfig};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 10;
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 5;
const DEFAULT_RATE_LOOKBACK_BLOCKS: i64 = 10_000;
const DEFAULT_RATE_REFRESH_SECS: u64 = 3600;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid value for {field}: {reason}")]
    InvalidField { field: String, reason: String },
    #[error("Duplicate network name: {0}")]
    DuplicateNetwork(String),
    #[error("Default network is not configured: {0}")]
    UnknownDefaultNetwork(String),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Process settings taken from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub config_path: Option<PathBuf>,
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            config_path: env::var("CONFIG_PATH").ok().map(PathBuf::from),
            shutdown_timeout: Duration::from_secs(
                env::var("SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|value| value.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }

    /// Files tried in order when loading the config file.
    pub fn config_candidates(&self) -> Vec<PathBuf> {
        candidate_paths(
            self.config_path.as_deref(),
            env::var_os("HOME").map(PathBuf::from).as_deref(),
        )
    }
}

fn candidate_paths(config_path: Option<&Path>, home: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = config_path {
        return vec![path.to_path_buf()];
    }
    let mut candidates = Vec::new();
    if let Some(home) = home {
        candidates.push(home.join(CONFIG_FILE_NAME));
    }
    candidates.push(PathBuf::from(CONFIG_FILE_NAME));
    candidates
}

/// Refresh and estimation knobs for the height cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub refresh_interval: Duration,
    pub upstream_timeout: Duration,
    pub rate_lookback_blocks: i64,
    pub rate_refresh: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            rate_lookback_blocks: DEFAULT_RATE_LOOKBACK_BLOCKS,
            rate_refresh: Duration::from_secs(DEFAULT_RATE_REFRESH_SECS),
        }
    }
}

/// Raw shape of the config file. Accepts both the single `network` and the
/// `networks` list layouts.
#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub port: Option<i64>,
    pub network: Option<NetworkConfig>,
    pub networks: Option<Vec<NetworkConfig>>,
    pub default_network: Option<String>,
    pub refresh_interval_secs: Option<u64>,
    pub upstream_timeout_secs: Option<u64>,
    pub rate_lookback_blocks: Option<i64>,
    pub rate_refresh_secs: Option<u64>,
}

/// Validated configuration, read-only for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub networks: Vec<NetworkConfig>,
    pub default_network: String,
    pub cache: CacheSettings,
}

impl ConfigFile {
    pub fn validate(self) -> Result<Config, ConfigError> {
        let port = self
            .port
            .ok_or_else(|| ConfigError::MissingField("port".into()))?;
        let port = u16::try_from(port)
            .ok()
            .filter(|port| *port > 0)
            .ok_or_else(|| ConfigError::invalid("port", format!("{port} is not in 1..=65535")))?;

        let networks = match (self.network, self.networks) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::invalid(
                    "network",
                    "use either `network` or `networks`, not both",
                ))
            }
            (Some(network), None) => vec![network],
            (None, Some(networks)) => networks,
            (None, None) => return Err(ConfigError::MissingField("networks".into())),
        };
        if networks.is_empty() {
            return Err(ConfigError::MissingField("networks".into()));
        }

        let mut seen = HashSet::new();
        for network in &networks {
            validate_network(network)?;
            if !seen.insert(network.normalized_name()) {
                return Err(ConfigError::DuplicateNetwork(network.name.clone()));
            }
        }

        let default_network = match self.default_network {
            Some(name) => networks
                .iter()
                .find(|network| network.normalized_name() == normalize_name(&name))
                .map(|network| network.name.clone())
                .ok_or(ConfigError::UnknownDefaultNetwork(name))?,
            None => networks[0].name.clone(),
        };

        let defaults = CacheSettings::default();
        let refresh_interval =
            positive_secs("refresh_interval_secs", self.refresh_interval_secs)?
                .unwrap_or(defaults.refresh_interval);
        let upstream_timeout =
            positive_secs("upstream_timeout_secs", self.upstream_timeout_secs)?
                .unwrap_or(defaults.upstream_timeout);
        let rate_refresh = positive_secs("rate_refresh_secs", self.rate_refresh_secs)?
            .unwrap_or(defaults.rate_refresh);
        let rate_lookback_blocks = match self.rate_lookback_blocks {
            Some(blocks) if blocks <= 0 => {
                return Err(ConfigError::invalid(
                    "rate_lookback_blocks",
                    "must be greater than zero",
                ))
            }
            Some(blocks) => blocks,
            None => defaults.rate_lookback_blocks,
        };

        Ok(Config {
            port,
            networks,
            default_network,
            cache: CacheSettings {
                refresh_interval,
                upstream_timeout,
                rate_lookback_blocks,
                rate_refresh,
            },
        })
    }
}

fn positive_secs(field: &str, value: Option<u64>) -> Result<Option<Duration>, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::invalid(field, "must be greater than zero")),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
        None => Ok(None),
    }
}

fn validate_network(network: &NetworkConfig) -> Result<(), ConfigError> {
    if network.name.is_empty() {
        return Err(ConfigError::MissingField("network name".into()));
    }
    if network.rpc.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "rpc for network {}",
            network.name
        )));
    }
    let url = Url::parse(&network.rpc)
        .map_err(|e| ConfigError::invalid(format!("{}.rpc", network.name), e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            format!("{}.rpc", network.name),
            format!("unsupported scheme {}", url.scheme()),
        ));
    }
    if network.upgrade_height < 0 {
        return Err(ConfigError::invalid(
            format!("{}.upgrade_height", network.name),
            "must not be negative",
        ));
    }
    if let BlockRateStrategy::Static { seconds_per_block } = network.block_rate {
        if !seconds_per_block.is_finite() || seconds_per_block <= 0.0 {
            return Err(ConfigError::invalid(
                format!("{}.block_rate.seconds_per_block", network.name),
                "must be a positive number",
            ));
        }
    }
    Ok(())
}

pub fn load_config_file(path: &Path) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(path)?;
    let config_file: ConfigFile = serde_json::from_str(&config_str)?;
    config_file.validate()
}

/// Loads the first readable config file among the candidates. A file that
/// exists but fails validation is an error, not a reason to try the next one.
pub fn load_config(server_config: &ServerConfig) -> Result<(PathBuf, Config), ConfigError> {
    load_first_config(server_config.config_candidates())
}

fn load_first_config(candidates: Vec<PathBuf>) -> Result<(PathBuf, Config), ConfigError> {
    let mut last_error = None;
    for path in candidates {
        match load_config_file(&path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                return Ok((path, config));
            }
            Err(ConfigError::IoError(e)) => {
                debug!("Config file {} not readable: {}", path.display(), e);
                last_error = Some(ConfigError::IoError(e));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| ConfigError::MissingField("config file".into())))
}
