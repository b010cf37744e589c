//! Configuration for assetcache

mod cacher;
mod logging;
mod metrics;
mod storage;

pub use cacher::CacherSettings;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metrics::MetricsConfig;
pub use storage::{StorageBackend, StorageConfig};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "assetcache.toml";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Cacher configuration
    pub cacher: CacherSettings,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config = Self::from_toml(&content)
            .map_err(|e| anyhow::anyhow!("Failed to load config file '{}': {}", path.display(), e))?;
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate all configuration fields.
    ///
    /// Collects every problem so they can all be fixed in one pass.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let cacher = &self.cacher;

        match Url::parse(&cacher.assets_origin) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(format!(
                "assets_origin must be an http(s) URL, got scheme '{}'",
                url.scheme()
            )),
            Err(e) => errors.push(format!("assets_origin is not a valid URL: {}", e)),
        }

        if cacher.max_storage_age_secs == 0 {
            errors.push("max_storage_age_secs must be positive".to_string());
        }
        if cacher.workers == 0 {
            errors.push("workers must be positive".to_string());
        }
        if cacher.workers > 4096 {
            errors.push("workers must be <= 4096".to_string());
        }
        if cacher.max_queued_tasks == 0 {
            errors.push("max_queued_tasks must be positive".to_string());
        }
        if cacher.retries == 0 {
            errors.push("retries must be at least 1".to_string());
        }
        if cacher.size_limit_bytes == 0 {
            errors.push("size_limit_bytes must be positive".to_string());
        }
        if cacher.dedup_window_secs == 0 {
            errors.push("dedup_window_secs must be positive".to_string());
        }
        if cacher.sweep_interval_secs == 0 {
            errors.push("sweep_interval_secs must be positive".to_string());
        }
        if cacher.error_channel_capacity == 0 {
            errors.push("error_channel_capacity must be positive".to_string());
        }
        if cacher.request_timeout_secs == 0 {
            errors.push("request_timeout_secs must be positive".to_string());
        }
        for name in cacher.request_headers.keys() {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(format!("request header name '{}' is invalid", name));
            }
        }

        match self.storage.backend {
            StorageBackend::Fs if self.storage.root.as_os_str().is_empty() => {
                errors.push("storage.root must not be empty for the fs backend".to_string());
            }
            StorageBackend::S3 if self.storage.bucket.as_deref().unwrap_or("").is_empty() => {
                errors.push("storage.bucket is required for the s3 backend".to_string());
            }
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config::default()
    }

    // ========================================================================
    // Config::validate
    // ========================================================================

    #[test]
    fn default_config_passes_validation() {
        assert!(valid_config().validate().is_ok(), "default config should be valid");
    }

    #[test]
    fn validate_rejects_bad_assets_origin() {
        let mut cfg = valid_config();
        cfg.cacher.assets_origin = "not a url".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("assets_origin is not a valid URL"));

        cfg.cacher.assets_origin = "ftp://cache.example.com".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("assets_origin must be an http(s) URL"));
    }

    #[test]
    fn validate_rejects_zero_storage_age() {
        let mut cfg = valid_config();
        cfg.cacher.max_storage_age_secs = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_storage_age_secs must be positive"));
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut cfg = valid_config();
        cfg.cacher.workers = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("workers must be positive"));
    }

    #[test]
    fn validate_rejects_invalid_header_name() {
        let mut cfg = valid_config();
        cfg.cacher
            .request_headers
            .insert("Bad Header".to_string(), "x".to_string());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("request header name 'Bad Header' is invalid"));
    }

    #[test]
    fn validate_requires_bucket_for_s3() {
        let mut cfg = valid_config();
        cfg.storage.backend = StorageBackend::S3;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("storage.bucket is required"));

        cfg.storage.bucket = Some("assets".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_fs_root() {
        let mut cfg = valid_config();
        cfg.storage.root = PathBuf::from("");
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("storage.root must not be empty"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut cfg = valid_config();
        cfg.cacher.workers = 0;
        cfg.cacher.retries = 0;
        cfg.cacher.size_limit_bytes = 0;
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("workers must be positive"));
        assert!(msg.contains("retries must be at least 1"));
        assert!(msg.contains("size_limit_bytes must be positive"));
    }

    // ========================================================================
    // TOML parsing
    // ========================================================================

    #[test]
    fn minimal_toml_uses_defaults() {
        let cfg = Config::from_toml(
            r#"
            [cacher]
            assets_origin = "https://assets.example.com"
            max_storage_age_secs = 3600
            "#,
        )
        .unwrap();

        assert_eq!(cfg.cacher.max_storage_age_secs, 3600);
        assert_eq!(cfg.cacher.workers, 64);
        assert_eq!(cfg.cacher.max_depth, 5);
        assert_eq!(cfg.cacher.retries, 10);
        assert_eq!(cfg.cacher.request_timeout_secs, 6);
        assert!(cfg.cacher.accept_invalid_certs);
        assert_eq!(cfg.storage.backend, StorageBackend::Fs);
        assert_eq!(cfg.logging.level, LogLevel::Info);
        assert_eq!(cfg.metrics.prometheus_file, None);
    }

    #[test]
    fn storage_age_is_required() {
        let err = Config::from_toml(
            r#"
            [cacher]
            assets_origin = "https://assets.example.com"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_storage_age_secs"));
    }

    #[test]
    fn full_toml_round_trips_through_default_template() {
        let rendered = Config::default().to_toml().unwrap();
        let parsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(parsed.cacher.assets_origin, Config::default().cacher.assets_origin);
    }

    #[test]
    fn request_headers_and_storage_parse() {
        let cfg = Config::from_toml(
            r#"
            [cacher]
            assets_origin = "https://assets.example.com"
            max_storage_age_secs = 60

            [cacher.request_headers]
            Authorization = "Bearer abc"

            [storage]
            backend = "memory"

            [logging]
            format = "json"
            level = "debug"

            [metrics]
            log_interval_secs = 15
            prometheus_file = "/var/lib/node_exporter/assetcache.prom"
            "#,
        )
        .unwrap();

        assert_eq!(
            cfg.cacher.request_headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.logging.format, LogFormat::Json);
        assert_eq!(cfg.logging.level, LogLevel::Debug);
        assert_eq!(cfg.metrics.log_interval_secs, 15);
        assert_eq!(
            cfg.metrics.prometheus_file,
            Some(PathBuf::from("/var/lib/node_exporter/assetcache.prom"))
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
