use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, reload};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    pub logs: EnvFilterConfig,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnvFilterConfig {
    pub default_level: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

impl EnvFilterConfig {
    fn build(&self, default_level: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
        EnvFilter::builder()
            .with_default_directive(default_level.parse()?)
            .parse(self.filters.join(","))
    }
}

impl TryInto<EnvFilter> for EnvFilterConfig {
    type Error = tracing_subscriber::filter::ParseError;

    fn try_into(self) -> Result<EnvFilter, Self::Error> {
        self.build(&self.default_level)
    }
}

/// Runtime handle to the installed log filter, used to flip between the
/// configured level and debug without restarting the daemon.
pub struct LogHandle {
    reload: reload::Handle<EnvFilter, Registry>,
    config: EnvFilterConfig,
    debug: AtomicBool,
}

impl MonitoringConfig {
    pub fn init(&self, debug: bool) -> Result<LogHandle, Box<dyn Error>> {
        let level = if debug { "debug" } else { self.logs.default_level.as_str() };
        let filter = self.logs.build(level)?;

        let (filter_layer, reload_handle) = reload::Layer::new(filter);
        let fmt_layer = tracing_subscriber::fmt::layer();

        tracing_subscriber::registry().with(filter_layer).with(fmt_layer).init();

        Ok(LogHandle {
            reload: reload_handle,
            config: self.logs.clone(),
            debug: AtomicBool::new(debug),
        })
    }
}

impl LogHandle {
    pub fn is_debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn toggle_debug(&self) {
        let debug = !self.debug.load(Ordering::Relaxed);
        let level = if debug { "debug" } else { self.config.default_level.as_str() };

        match self.config.build(level) {
            Ok(filter) => {
                if let Err(e) = self.reload.reload(filter) {
                    tracing::error!("Error reloading log filter: {}", e);
                    return;
                }
                self.debug.store(debug, Ordering::Relaxed);
                tracing::info!("Log level switched to {}", level);
            }
            Err(e) => tracing::error!("Error building log filter for level {}: {}", level, e),
        }
    }
}
