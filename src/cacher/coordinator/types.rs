//! Coordinator types: configuration, errors, and statistics

use anyhow::Context;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cacher::fetcher::{FetchConfig, FetchError};
use crate::storage::StorageError;

/// User-Agent sent on every other attempt, for origins that turn away
/// unidentified clients
pub const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 6.1; rv:31.0) Gecko/20100101 Firefox/31.0";

/// Configuration for the asset cacher
#[derive(Debug, Clone)]
pub struct CacherConfig {
    /// Base URL of the cache service; rewritten references point below it
    pub assets_origin: Url,
    /// Concurrent workers
    pub workers: usize,
    /// Queue length above which external callers should stop submitting
    pub max_queued_tasks: usize,
    /// Recursion budget for session assets
    pub max_depth: u8,
    /// Attempt budget per task
    pub retries: u32,
    /// Largest body stored, in bytes
    pub size_limit: usize,
    /// How long an admitted key suppresses new admissions
    pub dedup_window: Duration,
    /// Stored objects younger than this are not fetched again
    pub max_storage_age: Duration,
    /// Buffered error events
    pub error_channel_capacity: usize,
    /// Static headers layered onto every request
    pub request_headers: Vec<(String, String)>,
    /// Transport configuration
    pub fetch: FetchConfig,
}

impl CacherConfig {
    /// Config with default limits for the given origin and freshness threshold
    pub fn new(assets_origin: Url, max_storage_age: Duration) -> Self {
        Self {
            assets_origin,
            workers: 64,
            max_queued_tasks: 1024,
            max_depth: 5,
            retries: 10,
            size_limit: 6 * 1024 * 1024,
            dedup_window: Duration::from_secs(24 * 60 * 60),
            max_storage_age,
            error_channel_capacity: 1024,
            request_headers: Vec::new(),
            fetch: FetchConfig::default(),
        }
    }

    /// Build a CacherConfig from the TOML `[cacher]` section
    pub fn from_settings(settings: &crate::config::CacherSettings) -> anyhow::Result<Self> {
        let assets_origin = Url::parse(&settings.assets_origin)
            .with_context(|| format!("Invalid assets_origin '{}'", settings.assets_origin))?;
        let timeout = Duration::from_secs(settings.request_timeout_secs);

        Ok(Self {
            assets_origin,
            workers: settings.workers,
            max_queued_tasks: settings.max_queued_tasks,
            max_depth: settings.max_depth,
            retries: settings.retries,
            size_limit: settings.size_limit_bytes,
            dedup_window: Duration::from_secs(settings.dedup_window_secs),
            max_storage_age: Duration::from_secs(settings.max_storage_age_secs),
            error_channel_capacity: settings.error_channel_capacity,
            request_headers: settings
                .request_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            fetch: FetchConfig {
                timeout,
                connect_timeout: timeout,
                accept_invalid_certs: settings.accept_invalid_certs,
                connections_per_host: settings.workers.clamp(1, 32),
                ..FetchConfig::default()
            },
        })
    }
}

/// What went wrong with one asset
#[derive(Debug, Error)]
pub enum CacheErrorKind {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("{0}")]
    Fetch(#[from] FetchError),
    #[error("Status code is {0}")]
    Status(u16),
    #[error("Maximum size exceeded ({limit} bytes)")]
    SizeExceeded { limit: usize },
    #[error("Upload failed: {0}")]
    Storage(#[from] StorageError),
    #[error("Maximum recursion cache depth exceeded")]
    DepthExceeded,
    #[error("Task panicked: {message}")]
    Panicked { message: String },
}

/// Broad class of a terminal error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad status, oversize body, network failure, exhausted retries, a
    /// task that panicked
    Fetch,
    /// Upload failure
    Storage,
    /// Nested references left uncached at the depth limit
    Policy,
}

/// Terminal failure for one asset, with the chain of URLs that led to it
#[derive(Debug, Error)]
#[error("{url_context}: {kind}")]
pub struct CacheError {
    pub url_context: String,
    pub kind: CacheErrorKind,
}

impl CacheError {
    pub fn new(url_context: impl Into<String>, kind: CacheErrorKind) -> Self {
        Self {
            url_context: url_context.into(),
            kind,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.kind {
            CacheErrorKind::InvalidUrl { .. }
            | CacheErrorKind::Fetch(_)
            | CacheErrorKind::Status(_)
            | CacheErrorKind::SizeExceeded { .. }
            | CacheErrorKind::Panicked { .. } => ErrorCategory::Fetch,
            CacheErrorKind::Storage(_) => ErrorCategory::Storage,
            CacheErrorKind::DepthExceeded => ErrorCategory::Policy,
        }
    }
}

/// Statistics from the cacher
#[derive(Debug, Clone, Default)]
pub struct CacherStats {
    /// Tasks handed to the worker pool, retries excluded
    pub submitted: u64,
    /// Requests dropped because their key is in the dedup window
    pub dedup_skipped: u64,
    /// Requests dropped because storage holds a fresh copy
    pub fresh_skipped: u64,
    /// 403/503 responses re-queued
    pub retried: u64,
    /// Errors delivered to the error stream
    pub errors_reported: u64,
    /// Errors dropped because the error stream was full or closed
    pub errors_dropped: u64,
    /// Tasks waiting in the queue
    pub queued_tasks: usize,
    /// Tasks currently running
    pub active_workers: usize,
    /// Keys tracked by the dedup window
    pub dedup_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacherSettings;

    #[test]
    fn test_from_settings() {
        let mut settings = CacherSettings::default();
        settings.max_storage_age_secs = 120;
        settings.request_timeout_secs = 3;
        settings.workers = 4;
        settings
            .request_headers
            .insert("X-Token".to_string(), "abc".to_string());

        let config = CacherConfig::from_settings(&settings).unwrap();
        assert_eq!(config.max_storage_age, Duration::from_secs(120));
        assert_eq!(config.fetch.timeout, Duration::from_secs(3));
        assert_eq!(config.fetch.connections_per_host, 4);
        assert_eq!(config.workers, 4);
        assert_eq!(config.retries, 10);
        assert_eq!(config.request_headers, vec![("X-Token".to_string(), "abc".to_string())]);
        assert_eq!(config.assets_origin.as_str(), "http://localhost:8080/assets");
    }

    #[test]
    fn test_from_settings_rejects_bad_origin() {
        let settings = CacherSettings {
            assets_origin: "::not a url".to_string(),
            ..CacherSettings::default()
        };
        let err = CacherConfig::from_settings(&settings).unwrap_err();
        assert!(err.to_string().contains("Invalid assets_origin"));
    }

    #[test]
    fn test_error_display_and_category() {
        let err = CacheError::new(
            "https://example.com/app.css -> https://example.com/sub.css",
            CacheErrorKind::Status(404),
        );
        assert_eq!(
            err.to_string(),
            "https://example.com/app.css -> https://example.com/sub.css: Status code is 404"
        );
        assert_eq!(err.category(), ErrorCategory::Fetch);

        let depth = CacheError::new("a.css", CacheErrorKind::DepthExceeded);
        assert_eq!(depth.category(), ErrorCategory::Policy);
        assert_eq!(depth.to_string(), "a.css: Maximum recursion cache depth exceeded");

        let storage = CacheError::new("a.css", StorageError::Backend("denied".to_string()).into());
        assert_eq!(storage.category(), ErrorCategory::Storage);

        let size = CacheError::new("big.png", CacheErrorKind::SizeExceeded { limit: 10 });
        assert_eq!(size.to_string(), "big.png: Maximum size exceeded (10 bytes)");

        let panicked = CacheError::new(
            "a.css",
            CacheErrorKind::Panicked {
                message: "boom".to_string(),
            },
        );
        assert_eq!(panicked.category(), ErrorCategory::Fetch);
        assert_eq!(panicked.to_string(), "a.css: Task panicked: boom");
    }
}
