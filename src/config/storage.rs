//! Object storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which object store backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    Memory,
    S3,
}

/// `[storage]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Backend type
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Root directory (fs backend)
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Bucket name (s3 backend)
    #[serde(default)]
    pub bucket: Option<String>,
    /// Region override (s3 backend)
    #[serde(default)]
    pub region: Option<String>,
    /// Endpoint of an S3-compatible service (s3 backend)
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_backend() -> StorageBackend {
    StorageBackend::Fs
}

fn default_root() -> PathBuf {
    PathBuf::from("asset-cache")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: default_root(),
            bucket: None,
            region: None,
            endpoint: None,
        }
    }
}
