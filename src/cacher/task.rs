//! Unit of fetch-and-cache work

use url::Url;

/// Separator between URLs in a task's causal context
const CONTEXT_SEPARATOR: &str = " -> ";

/// One fetch of one asset.
///
/// A task is built at admission time and consumed by exactly one execution.
/// On a retryable status the same task, with its budget already decremented,
/// goes back to the pool.
#[derive(Debug, Clone)]
pub struct Task {
    request_url: Url,
    session_id: u64,
    depth: u8,
    retries: u32,
    url_context: String,
    is_js: bool,
    cache_path: Option<String>,
}

impl Task {
    /// Task for a session-independent script; never recurses
    pub fn script(url: Url, retries: u32) -> Self {
        Self {
            url_context: url.to_string(),
            request_url: url,
            session_id: 0,
            depth: 0,
            retries,
            is_js: true,
            cache_path: None,
        }
    }

    /// Task for an asset referenced by a recorded session
    pub fn session_asset(session_id: u64, url: Url, depth: u8, retries: u32) -> Self {
        Self {
            url_context: url.to_string(),
            request_url: url,
            session_id,
            depth,
            retries,
            is_js: false,
            cache_path: None,
        }
    }

    /// Task for a reference found inside this task's stylesheet.
    ///
    /// Same session, one level shallower, context extended with `url`.
    pub fn child(&self, url: Url, retries: u32) -> Self {
        Self {
            url_context: format!("{}{}{}", self.url_context, CONTEXT_SEPARATOR, url),
            request_url: url,
            session_id: self.session_id,
            depth: self.depth.saturating_sub(1),
            retries,
            is_js: false,
            cache_path: None,
        }
    }

    pub fn request_url(&self) -> &Url {
        &self.request_url
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Remaining recursion budget
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Remaining retry budget
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Chain of URLs that led to this task, e.g. `a.css -> b.css`
    pub fn url_context(&self) -> &str {
        &self.url_context
    }

    pub fn is_js(&self) -> bool {
        self.is_js
    }

    /// Storage key, set once admission resolved it
    pub fn cache_path(&self) -> Option<&str> {
        self.cache_path.as_deref()
    }

    pub(crate) fn with_cache_path(mut self, key: String) -> Self {
        self.cache_path = Some(key);
        self
    }

    /// Consume one attempt from the retry budget, returning what remains
    pub(crate) fn take_attempt(&mut self) -> u32 {
        self.retries = self.retries.saturating_sub(1);
        self.retries
    }
}
