//! Client for the CometBFT (Tendermint) RPC endpoints a countdown needs:
//! `/status` for the chain tip and `/header` for historical block times.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

use crate::{
    models::{BlockHeader, ChainStatus},
    utils::deserialize_i64,
};

#[cfg(test)]
use mockall::automock;

/// Failure talking to a chain node. Cloneable so one refresh result can be
/// handed to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UpstreamError {
    #[error("Request timeout")]
    Timeout,
    #[error("Request cancelled")]
    Cancelled,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request error (HTTP {status_code}): {error}")]
    Status { status_code: u16, error: String },
    #[error("JSON-RPC error (code {code}): {message}")]
    Rpc { code: i64, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("No upstream configured for network {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return UpstreamError::Timeout;
        }
        if let Some(status) = err.status() {
            return UpstreamError::Status {
                status_code: status.as_u16(),
                error: err.to_string(),
            };
        }
        if err.is_decode() {
            return UpstreamError::InvalidResponse(err.to_string());
        }
        UpstreamError::Transport(err.to_string())
    }
}

/// Queries a remote chain node.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait UpstreamClient: Send + Sync {
    /// Latest and earliest retained blocks of the node.
    async fn get_status(&self) -> Result<ChainStatus, UpstreamError>;

    /// Header of the block at `height`.
    async fn get_header_at_height(&self, height: i64) -> Result<BlockHeader, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    #[serde(deserialize_with = "deserialize_i64")]
    latest_block_height: i64,
    latest_block_time: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_i64")]
    earliest_block_height: i64,
    earliest_block_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct HeaderResult {
    header: RawHeader,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    #[serde(deserialize_with = "deserialize_i64")]
    height: i64,
    time: DateTime<Utc>,
}

/// HTTP client for a single network's RPC endpoint.
#[derive(Clone, Debug)]
pub struct CometRpcClient {
    client: Client,
    base_url: Url,
}

impl CometRpcClient {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let mut base_url =
            Url::parse(rpc_url).map_err(|e| UpstreamError::Transport(e.to_string()))?;
        // Url::join replaces the last segment unless the path ends with '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        debug!("Calling upstream {}", url);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body: RpcResponse<T> = response.json().await?;

        if let Some(error) = body.error {
            let message = match error.data {
                Some(data) => format!("{}: {}", error.message, data),
                None => error.message,
            };
            return Err(UpstreamError::Rpc {
                code: error.code,
                message,
            });
        }
        body.result
            .ok_or_else(|| UpstreamError::InvalidResponse(format!("missing result for {endpoint}")))
    }
}

#[async_trait]
impl UpstreamClient for CometRpcClient {
    async fn get_status(&self) -> Result<ChainStatus, UpstreamError> {
        let status: StatusResult = self.call("status", &[]).await?;
        let sync_info = status.sync_info;
        Ok(ChainStatus {
            latest_height: sync_info.latest_block_height,
            latest_block_time: sync_info.latest_block_time,
            earliest_height: sync_info.earliest_block_height,
            earliest_block_time: sync_info.earliest_block_time,
        })
    }

    async fn get_header_at_height(&self, height: i64) -> Result<BlockHeader, UpstreamError> {
        let result: HeaderResult = self
            .call("header", &[("height", height.to_string())])
            .await?;
        Ok(BlockHeader {
            height: result.header.height,
            time: result.header.time,
        })
    }
}
