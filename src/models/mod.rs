pub mod api_response;
pub mod countdown;
pub mod network_config;
pub mod network_status;

pub use countdown::*;
pub use network_config::*;
pub use network_status::*;
