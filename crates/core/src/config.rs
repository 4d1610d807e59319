use crate::error::{EngineError, EngineResult};
use serde::Deserialize;

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `ATTRIBUTION_ENGINE__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Touchpoints older than this many days before a conversion are dropped
    /// from its journey. `None` keeps the full history.
    #[serde(default)]
    pub lookback_window_days: Option<u32>,
    #[serde(default)]
    pub include_post_conversion_events: bool,
    #[serde(default = "default_path_limit")]
    pub default_path_limit: usize,
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_report_name")]
    pub default_name: String,
}

fn default_path_limit() -> usize {
    10
}
fn default_parallel() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_report_name() -> String {
    "Channel attribution".to_string()
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            lookback_window_days: None,
            include_post_conversion_events: false,
            default_path_limit: default_path_limit(),
            parallel: default_parallel(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            default_name: default_report_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&str>) -> EngineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("ATTRIBUTION_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| EngineError::Config(e.to_string()))
    }
}
