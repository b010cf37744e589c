//! Fetch-and-cache engine
//!
//! Components:
//! - `task`: one unit of fetch work (URL, session, depth, retries, context)
//! - `timeout_map`: dedup window over storage keys
//! - `pool`: bounded worker pool with advisory admission control
//! - `fetcher`: network transport seam and the reqwest implementation
//! - `metrics`: observability sink
//! - `coordinator`: admission and the per-task pipeline

pub mod coordinator;
pub mod fetcher;
pub mod metrics;
pub mod pool;
pub mod task;
pub mod timeout_map;

pub use coordinator::{
    CacheError, CacheErrorKind, Cacher, CacherConfig, CacherStats, ErrorCategory,
    DESKTOP_USER_AGENT,
};
pub use fetcher::{FetchConfig, FetchEngine, FetchError, FetchRequest, FetchResponse, Transport};
pub use metrics::{CacherMetrics, MetricsSink, MetricsSnapshot};
pub use pool::{TaskHandler, WorkerPool};
pub use task::Task;
pub use timeout_map::TimeoutMap;
