//! Metrics configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[metrics]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Interval between metrics summaries in the log, in seconds (0 = off)
    #[serde(default = "default_log_interval")]
    pub log_interval_secs: u64,
    /// Prometheus textfile rewritten on every summary and at shutdown
    #[serde(default)]
    pub prometheus_file: Option<PathBuf>,
}

fn default_log_interval() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            log_interval_secs: default_log_interval(),
            prometheus_file: None,
        }
    }
}
