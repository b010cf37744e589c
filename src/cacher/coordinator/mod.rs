//! Cacher coordinator: admission of asset requests and per-task execution
//!
//! A request is turned into a storage key, checked against the dedup window
//! and the freshness of the stored copy, and only then handed to the worker
//! pool as a [`Task`]. Workers run the fetch, rewrite, store and recurse
//! pipeline (see `pipeline.rs`); nested stylesheet references come back
//! through the same admission path. Terminal failures are published on a
//! bounded error stream that never blocks a worker.

mod pipeline;
mod types;

pub use types::*;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use url::Url;

use super::fetcher::Transport;
use super::metrics::{Counter, MetricsSink};
use super::pool::{panic_message, TaskHandler, WorkerPool};
use super::task::Task;
use super::timeout_map::TimeoutMap;
use crate::assets::{asset_key, script_key, AssetRewriter};
use crate::storage::ObjectStore;

/// Asset cacher
///
/// Dropping the cacher stops the worker pool without waiting; call
/// [`Cacher::shutdown`] to drain cooperatively.
pub struct Cacher {
    inner: Arc<CacherInner>,
}

/// Admission counters
#[derive(Debug, Default)]
struct AdmissionCounters {
    submitted: Counter,
    dedup_skipped: Counter,
    fresh_skipped: Counter,
    retried: Counter,
    errors_reported: Counter,
    errors_dropped: Counter,
}

struct CacherInner {
    config: CacherConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ObjectStore>,
    metrics: Arc<dyn MetricsSink>,
    rewriter: AssetRewriter,
    dedup: TimeoutMap,
    pool: WorkerPool,
    errors: mpsc::Sender<CacheError>,
    counters: AdmissionCounters,
}

/// Pool handler; holds the cacher weakly so the pool does not keep it alive
struct CacheHandler {
    inner: Weak<CacherInner>,
}

#[async_trait]
impl TaskHandler for CacheHandler {
    async fn handle(&self, task: Task) {
        let Some(inner) = self.inner.upgrade() else {
            debug!("Cacher dropped, skipping {}", task.request_url());
            return;
        };

        let url_context = task.url_context().to_string();
        if let Err(panic) = AssertUnwindSafe(inner.cache_file(task)).catch_unwind().await {
            let message = panic_message(&*panic).to_string();
            error!("Task for {} panicked: {}", url_context, message);
            inner.report(&url_context, CacheErrorKind::Panicked { message });
        }
    }
}

impl Cacher {
    /// Start the cacher and its worker pool.
    ///
    /// Returns the cacher and the receiving end of its error stream. Must be
    /// called from within a tokio runtime.
    pub fn start(
        config: CacherConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<dyn MetricsSink>,
    ) -> (Self, mpsc::Receiver<CacheError>) {
        let (errors, error_rx) = mpsc::channel(config.error_channel_capacity.max(1));

        info!(
            "Starting asset cacher (workers={}, max_depth={}, retries={}, size_limit={})",
            config.workers, config.max_depth, config.retries, config.size_limit
        );

        let inner = Arc::new_cyclic(|weak: &Weak<CacherInner>| {
            let handler = Arc::new(CacheHandler {
                inner: weak.clone(),
            });
            CacherInner {
                rewriter: AssetRewriter::new(&config.assets_origin),
                dedup: TimeoutMap::new(config.dedup_window),
                pool: WorkerPool::start(config.workers, config.max_queued_tasks, handler),
                config,
                transport,
                store,
                metrics,
                errors,
                counters: AdmissionCounters::default(),
            }
        });

        (Self { inner }, error_rx)
    }

    /// Cache a standalone script. No recursion.
    ///
    /// Returns true if a task was submitted.
    pub async fn cache_script(&self, url: &str) -> bool {
        let inner = &self.inner;
        match inner.parse_request_url(url) {
            Some(url) => inner.check_task(Task::script(url, inner.config.retries)).await,
            None => false,
        }
    }

    /// Cache an asset of a recorded session, following nested stylesheet
    /// references up to the configured depth.
    ///
    /// Returns true if a task was submitted.
    pub async fn cache_session_asset(&self, session_id: u64, url: &str) -> bool {
        let inner = &self.inner;
        match inner.parse_request_url(url) {
            Some(url) => {
                let task = Task::session_asset(
                    session_id,
                    url,
                    inner.config.max_depth,
                    inner.config.retries,
                );
                inner.check_task(task).await
            }
            None => false,
        }
    }

    /// Whether callers should keep submitting work
    pub fn can_accept_more_work(&self) -> bool {
        self.inner.pool.can_add_task()
    }

    /// Drop expired dedup window entries, returning how many were removed
    pub fn sweep_dedup_window(&self) -> usize {
        let removed = self.inner.dedup.delete_outdated();
        if removed > 0 {
            debug!("Swept {} expired entries from the dedup window", removed);
        }
        removed
    }

    /// Wait until no task is queued or running
    pub async fn wait_idle(&self) {
        self.inner.pool.wait_idle().await;
    }

    /// Stop accepting requests, discard queued tasks and wait for running ones
    pub async fn shutdown(&self) {
        info!("Shutting down asset cacher");
        self.inner.pool.stop().await;
    }

    /// Get current statistics
    pub fn stats(&self) -> CacherStats {
        let inner = &self.inner;
        let counters = &inner.counters;
        CacherStats {
            submitted: counters.submitted.get(),
            dedup_skipped: counters.dedup_skipped.get(),
            fresh_skipped: counters.fresh_skipped.get(),
            retried: counters.retried.get(),
            errors_reported: counters.errors_reported.get(),
            errors_dropped: counters.errors_dropped.get(),
            queued_tasks: inner.pool.queued_tasks(),
            active_workers: inner.pool.active_workers(),
            dedup_entries: inner.dedup.len(),
        }
    }

    /// Get configuration
    pub fn config(&self) -> &CacherConfig {
        &self.inner.config
    }
}

impl Drop for Cacher {
    fn drop(&mut self) {
        self.inner.pool.close();
    }
}

impl CacherInner {
    fn parse_request_url(&self, raw: &str) -> Option<Url> {
        if self.pool.is_stopping() {
            return None;
        }

        match Url::parse(raw.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url),
            Ok(url) => {
                self.report(
                    raw,
                    CacheErrorKind::InvalidUrl {
                        url: raw.to_string(),
                        reason: format!("unsupported scheme '{}'", url.scheme()),
                    },
                );
                None
            }
            Err(e) => {
                self.report(
                    raw,
                    CacheErrorKind::InvalidUrl {
                        url: raw.to_string(),
                        reason: e.to_string(),
                    },
                );
                None
            }
        }
    }

    /// Admission: resolve the key, consult the dedup window and the stored
    /// copy, then submit.
    async fn check_task(&self, task: Task) -> bool {
        let key = if task.is_js() {
            script_key(task.request_url())
        } else {
            asset_key(task.session_id(), task.request_url())
        };

        if !self.dedup.try_admit(&key) {
            self.counters.dedup_skipped.inc();
            debug!("Skipping {}: {} is in the dedup window", task.request_url(), key);
            return false;
        }

        if let Some(created) = self.store.creation_time(&key).await {
            // A creation time in the future counts as fresh
            let fresh = match (Utc::now() - created).to_std() {
                Ok(age) => age < self.config.max_storage_age,
                Err(_) => true,
            };
            if fresh {
                self.counters.fresh_skipped.inc();
                debug!("Skipping {}: {} stored at {}", task.request_url(), key, created);
                return false;
            }
        }

        let url = task.request_url().to_string();
        if self.pool.add_task(task.with_cache_path(key)) {
            self.counters.submitted.inc();
            true
        } else {
            debug!("Worker pool stopped, dropping {}", url);
            false
        }
    }

    /// Publish a terminal error without blocking
    fn report(&self, url_context: &str, kind: CacheErrorKind) {
        let error = CacheError::new(url_context, kind);
        debug!("Asset error: {}", error);

        match self.errors.try_send(error) {
            Ok(()) => self.counters.errors_reported.inc(),
            Err(TrySendError::Full(error)) => {
                self.counters.errors_dropped.inc();
                warn!("Error stream full, dropping: {}", error);
            }
            Err(TrySendError::Closed(_)) => self.counters.errors_dropped.inc(),
        }
    }
}
