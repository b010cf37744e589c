pub mod cache;
pub mod init;
pub mod run;

use anyhow::{Context, Result};
use assetcache::cacher::{CacheError, Cacher, CacherConfig, CacherMetrics, FetchEngine};
use assetcache::config::Config;
use assetcache::storage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cacher wired to the configured transport, storage and metrics
pub struct CacherHandle {
    pub cacher: Cacher,
    pub errors: mpsc::Receiver<CacheError>,
    pub metrics: Arc<CacherMetrics>,
}

pub async fn build_cacher(config: &Config) -> Result<CacherHandle> {
    let cacher_config = CacherConfig::from_settings(&config.cacher)?;
    let transport = FetchEngine::new(cacher_config.fetch.clone())
        .context("Failed to build HTTP client")?;
    let store = storage::from_config(&config.storage)
        .await
        .context("Failed to open object storage")?;
    let metrics = Arc::new(CacherMetrics::new());

    let (cacher, errors) = Cacher::start(cacher_config, Arc::new(transport), store, metrics.clone());

    Ok(CacherHandle {
        cacher,
        errors,
        metrics,
    })
}
