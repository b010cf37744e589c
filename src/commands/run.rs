use anyhow::{Context, Result};
use assetcache::cacher::{CacheError, Cacher, CacherMetrics, ErrorCategory};
use assetcache::config::Config;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::build_cacher;

/// One line of input
#[derive(Debug, Deserialize)]
struct CacheRequest {
    url: String,
    #[serde(default)]
    session_id: Option<u64>,
    #[serde(default)]
    script: bool,
}

pub async fn run(config: Config) -> Result<()> {
    let handle = build_cacher(&config).await?;
    let cacher = Arc::new(handle.cacher);
    let metrics = handle.metrics;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let error_logger = tokio::spawn(log_errors(handle.errors));
    let sweeper = tokio::spawn(sweep_dedup_window(
        Arc::clone(&cacher),
        Duration::from_secs(config.cacher.sweep_interval_secs),
        shutdown_tx.subscribe(),
    ));
    let prometheus_file = config.metrics.prometheus_file.clone();
    let reporter = (config.metrics.log_interval_secs > 0).then(|| {
        tokio::spawn(report_metrics(
            Arc::clone(&cacher),
            Arc::clone(&metrics),
            prometheus_file.clone(),
            Duration::from_secs(config.metrics.log_interval_secs),
            shutdown_tx.subscribe(),
        ))
    });

    info!("Reading cache requests from stdin");

    let input_closed = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            false
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, shutting down");
            false
        }
        result = read_requests(&cacher) => {
            result?;
            info!("Waiting for queued work");
            true
        }
    };

    if input_closed {
        cacher.wait_idle().await;
    }

    let _ = shutdown_tx.send(());
    cacher.shutdown().await;

    if let Err(e) = sweeper.await {
        warn!("Dedup sweeper failed: {}", e);
    }
    if let Some(reporter) = reporter {
        if let Err(e) = reporter.await {
            warn!("Metrics reporter failed: {}", e);
        }
    }

    let stats = cacher.stats();
    drop(cacher);

    let logger_abort = error_logger.abort_handle();
    if tokio::time::timeout(Duration::from_secs(5), error_logger).await.is_err() {
        warn!("Error logger did not finish within 5s, aborting");
        logger_abort.abort();
    }

    if let Some(path) = &prometheus_file {
        if let Err(e) = write_prometheus(path, &metrics).await {
            warn!("Failed to write metrics to {}: {:#}", path.display(), e);
        }
    }

    let snapshot = metrics.snapshot();
    info!(
        "Stopped: {} submitted, {} saved, {} errors ({} dropped)",
        stats.submitted, snapshot.assets_saved, stats.errors_reported, stats.errors_dropped
    );
    Ok(())
}

/// What happened to one input line
#[derive(Debug, PartialEq, Eq)]
enum Dispatch {
    Blank,
    Malformed,
    Saturated,
    MissingTarget,
    /// Handed to the cacher; false if it was not admitted
    Submitted(bool),
}

async fn read_requests(cacher: &Cacher) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let (mut submitted, mut dropped) = (0u64, 0u64);

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match dispatch_line(cacher, &line).await {
            Dispatch::Submitted(true) => submitted += 1,
            Dispatch::Blank | Dispatch::Submitted(false) => {}
            Dispatch::Malformed | Dispatch::Saturated | Dispatch::MissingTarget => dropped += 1,
        }
    }

    info!("Input closed: {} requests submitted, {} dropped", submitted, dropped);
    Ok(())
}

async fn dispatch_line(cacher: &Cacher, line: &str) -> Dispatch {
    let line = line.trim();
    if line.is_empty() {
        return Dispatch::Blank;
    }

    let request: CacheRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            warn!("Ignoring malformed request '{}': {}", line, e);
            return Dispatch::Malformed;
        }
    };

    if !cacher.can_accept_more_work() {
        warn!("Cacher saturated, dropping request for {}", request.url);
        return Dispatch::Saturated;
    }

    match (request.script, request.session_id) {
        (true, _) => Dispatch::Submitted(cacher.cache_script(&request.url).await),
        (false, Some(session_id)) => {
            Dispatch::Submitted(cacher.cache_session_asset(session_id, &request.url).await)
        }
        (false, None) => {
            warn!("Request for {} has neither session_id nor script", request.url);
            Dispatch::MissingTarget
        }
    }
}

async fn log_errors(mut errors: mpsc::Receiver<CacheError>) {
    while let Some(error) = errors.recv().await {
        match error.category() {
            ErrorCategory::Policy => info!("{}", error),
            ErrorCategory::Fetch | ErrorCategory::Storage => warn!("{}", error),
        }
    }
}

async fn sweep_dedup_window(
    cacher: Arc<Cacher>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let removed = cacher.sweep_dedup_window();
                debug!("Dedup window sweep removed {} entries", removed);
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn report_metrics(
    cacher: Arc<Cacher>,
    metrics: Arc<CacherMetrics>,
    prometheus_file: Option<PathBuf>,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let stats = cacher.stats();
                let snapshot = metrics.snapshot();
                info!(
                    "Fetched {} ({:.1}ms avg), saved {}, uploads failed {}, queued {}, active {}, dedup entries {}",
                    snapshot.downloads_total,
                    snapshot.download_latency_ms,
                    snapshot.assets_saved,
                    snapshot.uploads_failed,
                    stats.queued_tasks,
                    stats.active_workers,
                    stats.dedup_entries
                );
                if let Some(path) = &prometheus_file {
                    if let Err(e) = write_prometheus(path, &metrics).await {
                        warn!("Failed to write metrics to {}: {:#}", path.display(), e);
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Replace the Prometheus textfile in one rename so scrapers never see a
/// partial file
async fn write_prometheus(path: &Path, metrics: &CacherMetrics) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, metrics.to_prometheus())
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to rename {}", tmp.display()))?;
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}. Falling back to pending future.", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
