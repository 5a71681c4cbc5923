mod http;
mod monitoring;

pub use http::HttpServerConfig;
pub use monitoring::{EnvFilterConfig, LogHandle, MonitoringConfig};
