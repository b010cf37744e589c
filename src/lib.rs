//! assetcache: durable copies of the assets recorded web sessions reference
//!
//! Given a script, stylesheet or stylesheet-embedded resource URL, the cacher
//! fetches it, rewrites nested stylesheet references to point at the cache
//! service, and stores the result so session playback never depends on the
//! origin server. Featuring:
//! - A bounded tokio worker pool with advisory admission control
//! - A TTL dedup window so each asset is fetched at most once per window
//! - Depth-bounded recursion into `url(...)` and `@import` references
//! - Retry on 403/503 with a fixed attempt budget
//! - Filesystem, in-memory and S3 object storage

pub mod assets;
pub mod cacher;
pub mod config;
pub mod storage;

pub use cacher::{Cacher, CacherConfig, CacheError};
pub use config::Config;
