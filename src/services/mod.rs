pub mod block_rate;
pub mod blockchain_service;
pub mod countdown_service;
pub mod height_cache;
pub mod network_directory;

pub use block_rate::BlockRateEstimator;
pub use blockchain_service::{CometRpcClient, UpstreamClient, UpstreamError};
pub use countdown_service::CountdownResolver;
pub use height_cache::HeightCache;
pub use network_directory::NetworkDirectory;
