//! Durable object storage for cached assets
//!
//! The cacher only needs two operations from a backend: an overwriting put,
//! and the creation time of whatever currently lives under a key. Backends:
//! - `FsStore`: files below a root directory
//! - `MemoryStore`: in-process map (tests, dry runs)
//! - `S3Store`: S3 or an S3-compatible service (feature `s3`)

mod fs;
mod memory;
#[cfg(feature = "s3")]
mod s3;

pub use fs::FsStore;
pub use memory::{MemoryStore, StoredObject};
#[cfg(feature = "s3")]
pub use s3::S3Store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};

/// Errors raised by storage backends
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Object storage used by the cacher
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`, replacing any existing object
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// When the object currently stored under `key` was written, if any
    async fn creation_time(&self, key: &str) -> Option<DateTime<Utc>>;
}

/// Build the backend selected by the storage configuration
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::Fs => Ok(Arc::new(FsStore::new(&config.root)?)),
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            let bucket = config
                .bucket
                .clone()
                .ok_or_else(|| anyhow::anyhow!("storage.bucket is required for the s3 backend"))?;
            Ok(Arc::new(
                S3Store::connect(bucket, config.region.clone(), config.endpoint.clone()).await,
            ))
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => {
            anyhow::bail!("the s3 storage backend requires building with the `s3` feature")
        }
    }
}

/// Reject keys that could escape a key namespace
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("42/abc.css").is_ok());
        assert!(validate_key("js/abc").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("42/../../x").is_err());
        assert!(validate_key("42//x").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let config = StorageConfig {
            backend: StorageBackend::Memory,
            ..StorageConfig::default()
        };
        let store = from_config(&config).await.unwrap();
        store.put("1/a", b"x".to_vec(), None).await.unwrap();
        assert!(store.creation_time("1/a").await.is_some());
    }
}
