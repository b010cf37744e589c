//! Asset cacher configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `[cacher]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacherSettings {
    /// Base URL under which the cache service serves stored assets
    pub assets_origin: String,
    /// Stored assets younger than this are not fetched again (seconds)
    pub max_storage_age_secs: u64,
    /// Concurrent fetch workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Queued tasks above which new external requests should be refused
    #[serde(default = "default_max_queued_tasks")]
    pub max_queued_tasks: usize,
    /// Nesting depth followed inside stylesheets
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,
    /// Fetch attempts per asset for 403/503 responses
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Largest asset body stored (bytes)
    #[serde(default = "default_size_limit")]
    pub size_limit_bytes: usize,
    /// How long an admitted storage key suppresses new requests (seconds)
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// How often the dedup window is swept (seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Buffered terminal errors before new ones are dropped
    #[serde(default = "default_error_channel_capacity")]
    pub error_channel_capacity: usize,
    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Skip TLS certificate validation of origin servers
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Headers added to every asset request
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
}

fn default_workers() -> usize {
    64
}

fn default_max_queued_tasks() -> usize {
    1024
}

fn default_max_depth() -> u8 {
    5
}

fn default_retries() -> u32 {
    10
}

fn default_size_limit() -> usize {
    6 * 1024 * 1024 // 6 MiB
}

fn default_dedup_window() -> u64 {
    24 * 60 * 60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_error_channel_capacity() -> usize {
    1024
}

fn default_request_timeout() -> u64 {
    6
}

fn default_true() -> bool {
    true
}

impl Default for CacherSettings {
    fn default() -> Self {
        Self {
            assets_origin: "http://localhost:8080/assets".to_string(),
            max_storage_age_secs: 24 * 60 * 60,
            workers: default_workers(),
            max_queued_tasks: default_max_queued_tasks(),
            max_depth: default_max_depth(),
            retries: default_retries(),
            size_limit_bytes: default_size_limit(),
            dedup_window_secs: default_dedup_window(),
            sweep_interval_secs: default_sweep_interval(),
            error_channel_capacity: default_error_channel_capacity(),
            request_timeout_secs: default_request_timeout(),
            accept_invalid_certs: true,
            request_headers: BTreeMap::new(),
        }
    }
}
