use chrono::{DateTime, Utc};
use serde::Serialize;

/// Sync information reported by a chain node's status endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChainStatus {
    pub latest_height: i64,
    pub latest_block_time: DateTime<Utc>,
    pub earliest_height: i64,
    pub earliest_block_time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockHeader {
    pub height: i64,
    pub time: DateTime<Utc>,
}

/// A (height, time) point used for block rate estimation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockSample {
    pub height: i64,
    pub time: DateTime<Utc>,
}

impl ChainStatus {
    pub fn latest_sample(&self) -> BlockSample {
        BlockSample {
            height: self.latest_height,
            time: self.latest_block_time,
        }
    }
}

impl From<BlockHeader> for BlockSample {
    fn from(header: BlockHeader) -> Self {
        BlockSample {
            height: header.height,
            time: header.time,
        }
    }
}
