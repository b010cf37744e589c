//! Cacher metrics
//!
//! The cacher reports downloads, uploads and saved assets to an injected
//! [`MetricsSink`]. [`CacherMetrics`] is the built-in sink: atomic counters
//! and latency histograms, exportable as a snapshot or in Prometheus
//! exposition format (written to a textfile by `assetcache run`).

use std::fmt::Write as FmtWrite;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Observability sink injected into the cacher
pub trait MetricsSink: Send + Sync {
    /// A response was received after `elapsed`
    fn record_download(&self, elapsed: Duration, status: u16);
    /// An upload finished after `elapsed`
    fn record_upload(&self, elapsed: Duration, failed: bool);
    /// An asset was stored
    fn increment_saved(&self);
}

/// Atomic counter for thread-safe incrementing
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Simple histogram for latency tracking
#[derive(Debug)]
pub struct Histogram {
    /// Bucket boundaries in microseconds
    buckets: Vec<u64>,
    /// Count per bucket
    counts: Vec<AtomicU64>,
    /// Values exceeding all bucket boundaries
    overflow: AtomicU64,
    /// Sum of all values in microseconds
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    /// Histogram with buckets suited to remote fetches and uploads
    pub fn new_latency() -> Self {
        // 10ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
        let buckets = vec![
            10_000, 50_000, 100_000, 250_000, 500_000, 1_000_000, 2_500_000, 5_000_000, 10_000_000,
        ];
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();

        Self {
            buckets,
            counts,
            overflow: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a duration
    pub fn observe(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        match self.buckets.iter().position(|&boundary| micros <= boundary) {
            Some(i) => self.counts[i].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Get the count of observations
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Get the mean value in milliseconds
    pub fn mean_ms(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64 / 1000.0
    }

    /// Get bucket boundaries in microseconds
    pub fn bucket_boundaries(&self) -> &[u64] {
        &self.buckets
    }

    /// Get bucket counts (non-cumulative)
    pub fn bucket_counts(&self) -> Vec<u64> {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect()
    }

    /// Get the overflow count
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Get the sum of all observed values in microseconds
    pub fn sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new_latency()
    }
}

/// Default [`MetricsSink`]
#[derive(Debug, Default)]
pub struct CacherMetrics {
    pub downloads_total: Counter,
    pub download_latency: Histogram,
    pub downloads_2xx: Counter,
    pub downloads_3xx: Counter,
    pub downloads_4xx: Counter,
    pub downloads_5xx: Counter,

    pub uploads_total: Counter,
    pub uploads_failed: Counter,
    pub upload_latency: Histogram,

    pub assets_saved: Counter,
}

impl CacherMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            downloads_total: self.downloads_total.get(),
            download_latency_ms: self.download_latency.mean_ms(),
            downloads_2xx: self.downloads_2xx.get(),
            downloads_3xx: self.downloads_3xx.get(),
            downloads_4xx: self.downloads_4xx.get(),
            downloads_5xx: self.downloads_5xx.get(),
            uploads_total: self.uploads_total.get(),
            uploads_failed: self.uploads_failed.get(),
            upload_latency_ms: self.upload_latency.mean_ms(),
            assets_saved: self.assets_saved.get(),
        }
    }

    /// Export all metrics in Prometheus exposition format
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(2048);

        write_counter(&mut out, "assetcache_downloads_total", "Total asset responses received", self.downloads_total.get());
        write_histogram(&mut out, "assetcache_download_latency_seconds", "Asset fetch latency in seconds", &self.download_latency);
        let _ = writeln!(out, "# HELP assetcache_downloads_by_class_total Asset responses by status class");
        let _ = writeln!(out, "# TYPE assetcache_downloads_by_class_total counter");
        for (class, counter) in [
            ("2xx", &self.downloads_2xx),
            ("3xx", &self.downloads_3xx),
            ("4xx", &self.downloads_4xx),
            ("5xx", &self.downloads_5xx),
        ] {
            let _ = writeln!(out, "assetcache_downloads_by_class_total{{class=\"{}\"}} {}", class, counter.get());
        }
        let _ = writeln!(out);

        write_counter(&mut out, "assetcache_uploads_total", "Total uploads to object storage", self.uploads_total.get());
        write_counter(&mut out, "assetcache_uploads_failed_total", "Total failed uploads", self.uploads_failed.get());
        write_histogram(&mut out, "assetcache_upload_latency_seconds", "Upload latency in seconds", &self.upload_latency);

        write_counter(&mut out, "assetcache_assets_saved_total", "Total assets stored", self.assets_saved.get());

        out
    }
}

impl MetricsSink for CacherMetrics {
    fn record_download(&self, elapsed: Duration, status: u16) {
        self.downloads_total.inc();
        self.download_latency.observe(elapsed);
        match status {
            200..=299 => self.downloads_2xx.inc(),
            300..=399 => self.downloads_3xx.inc(),
            400..=499 => self.downloads_4xx.inc(),
            500..=599 => self.downloads_5xx.inc(),
            _ => {}
        }
    }

    fn record_upload(&self, elapsed: Duration, failed: bool) {
        self.uploads_total.inc();
        self.upload_latency.observe(elapsed);
        if failed {
            self.uploads_failed.inc();
        }
    }

    fn increment_saved(&self) {
        self.assets_saved.inc();
    }
}

/// Write a counter metric in Prometheus exposition format
fn write_counter(out: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} counter", name);
    let _ = writeln!(out, "{} {}", name, value);
    let _ = writeln!(out);
}

/// Write a histogram metric in Prometheus exposition format
fn write_histogram(out: &mut String, name: &str, help: &str, hist: &Histogram) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} histogram", name);

    let counts = hist.bucket_counts();
    let mut cumulative: u64 = 0;
    for (&boundary, count) in hist.bucket_boundaries().iter().zip(counts) {
        cumulative += count;
        let le_seconds = boundary as f64 / 1_000_000.0;
        let _ = writeln!(out, "{}_bucket{{le=\"{:.3}\"}} {}", name, le_seconds, cumulative);
    }
    let total_count = hist.count();
    let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, total_count);

    let sum_seconds = hist.sum_micros() as f64 / 1_000_000.0;
    let _ = writeln!(out, "{}_sum {:.6}", name, sum_seconds);
    let _ = writeln!(out, "{}_count {}", name, total_count);
    let _ = writeln!(out);
}

/// Point-in-time snapshot of all metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub downloads_total: u64,
    pub download_latency_ms: f64,
    pub downloads_2xx: u64,
    pub downloads_3xx: u64,
    pub downloads_4xx: u64,
    pub downloads_5xx: u64,
    pub uploads_total: u64,
    pub uploads_failed: u64,
    pub upload_latency_ms: f64,
    pub assets_saved: u64,
}
