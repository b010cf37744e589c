//! Per-task pipeline: fetch, classify, rewrite, store, recurse

use std::time::Instant;
use tracing::debug;
use url::Url;

use super::{CacheErrorKind, CacherInner, DESKTOP_USER_AGENT};
use crate::assets::{content_type_for_path, is_stylesheet, AssetRewriter};
use crate::cacher::fetcher::{FetchRequest, FetchResponse};
use crate::cacher::task::Task;

/// Headers for an attempt with `retries_left` attempts remaining after it.
///
/// Even countdowns present a desktop browser User-Agent; configured headers
/// always go last and win.
pub(super) fn request_headers(
    retries_left: u32,
    static_headers: &[(String, String)],
) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(static_headers.len() + 1);
    if retries_left % 2 == 0 {
        headers.push(("User-Agent".to_string(), DESKTOP_USER_AGENT.to_string()));
    }
    headers.extend(static_headers.iter().cloned());
    headers
}

/// Content type from the response, falling back to the path of the URL that
/// was actually served (after redirects)
fn content_type(response: &FetchResponse) -> Option<String> {
    response
        .header("content-type")
        .filter(|ct| !ct.trim().is_empty())
        .map(str::to_string)
        .or_else(|| content_type_for_path(response.final_url.path()).map(str::to_string))
}

fn is_retryable(status: u16) -> bool {
    matches!(status, 403 | 503)
}

impl CacherInner {
    /// Execute one task inside a worker slot
    pub(super) async fn cache_file(&self, mut task: Task) {
        let retries_left = task.take_attempt();
        let Some(key) = task.cache_path().map(str::to_string) else {
            debug!("Task for {} has no storage key, skipping", task.request_url());
            return;
        };

        let request = FetchRequest {
            url: task.request_url().clone(),
            headers: request_headers(retries_left, &self.config.request_headers),
            read_limit: self.config.size_limit.saturating_add(1),
        };

        let started = Instant::now();
        let response = match self.transport.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                self.report(task.url_context(), CacheErrorKind::Fetch(e));
                return;
            }
        };
        self.metrics.record_download(started.elapsed(), response.status);

        if response.status >= 400 {
            if is_retryable(response.status) && retries_left > 0 {
                debug!(
                    "Got {} for {}, retrying ({} attempts left)",
                    response.status,
                    task.request_url(),
                    retries_left
                );
                self.counters.retried.inc();
                let url = task.request_url().to_string();
                if !self.pool.add_task(task) {
                    debug!("Worker pool stopped, dropping retry of {}", url);
                }
                return;
            }
            self.report(task.url_context(), CacheErrorKind::Status(response.status));
            return;
        }

        if response.body.len() > self.config.size_limit {
            self.report(
                task.url_context(),
                CacheErrorKind::SizeExceeded {
                    limit: self.config.size_limit,
                },
            );
            return;
        }

        let content_type = content_type(&response);
        let stylesheet = content_type.as_deref().is_some_and(is_stylesheet).then(|| {
            String::from_utf8_lossy(&response.body).into_owned()
        });

        let content = match &stylesheet {
            Some(css) => self
                .rewriter
                .rewrite_css(task.session_id(), task.request_url(), css)
                .into_bytes(),
            None => response.body,
        };

        let started = Instant::now();
        let uploaded = self.store.put(&key, content, content_type.as_deref()).await;
        self.metrics.record_upload(started.elapsed(), uploaded.is_err());
        if let Err(e) = uploaded {
            self.report(task.url_context(), CacheErrorKind::Storage(e));
            return;
        }
        self.metrics.increment_saved();
        debug!("Cached {} as {}", task.request_url(), key);

        if let Some(css) = stylesheet {
            self.follow_references(&task, &css).await;
        }
    }

    /// Admit every cachable reference of a stored stylesheet as a child task.
    ///
    /// At depth 0 the depth error is raised only if there is something left
    /// uncached; a depth-0 stylesheet without cachable references is not an
    /// error.
    async fn follow_references(&self, task: &Task, css: &str) {
        let children: Vec<Url> = AssetRewriter::extract_css_urls(css)
            .iter()
            .filter_map(|raw| self.rewriter.resolve_cachable_url(task.request_url(), raw))
            .collect();

        if children.is_empty() {
            return;
        }
        if task.depth() == 0 {
            self.report(task.url_context(), CacheErrorKind::DepthExceeded);
            return;
        }

        for url in children {
            let child = task.child(url, self.config.retries);
            self.check_task(child).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_on_even_countdown() {
        let headers = request_headers(8, &[]);
        assert_eq!(
            headers,
            vec![("User-Agent".to_string(), DESKTOP_USER_AGENT.to_string())]
        );
        assert!(request_headers(9, &[]).is_empty());
        assert_eq!(request_headers(0, &[]).len(), 1);
    }

    #[test]
    fn test_static_headers_layer_on_top() {
        let static_headers = vec![
            ("User-Agent".to_string(), "custom".to_string()),
            ("Referer".to_string(), "https://example.com/".to_string()),
        ];
        let headers = request_headers(4, &static_headers);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].1, DESKTOP_USER_AGENT);
        assert_eq!(headers[1], ("User-Agent".to_string(), "custom".to_string()));
    }

    #[test]
    fn test_content_type_prefers_header() {
        let url = Url::parse("https://example.com/style.css").unwrap();
        let mut response = FetchResponse {
            final_url: url,
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: Vec::new(),
        };
        assert_eq!(content_type(&response).as_deref(), Some("text/plain"));

        response.headers.clear();
        assert_eq!(content_type(&response).as_deref(), Some("text/css; charset=utf-8"));

        response.final_url = Url::parse("https://example.com/blob").unwrap();
        assert_eq!(content_type(&response), None);
    }

    #[test]
    fn test_content_type_uses_redirect_target() {
        let response = FetchResponse {
            final_url: Url::parse("https://example.com/v2/app.css").unwrap(),
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(content_type(&response).as_deref().is_some_and(is_stylesheet));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(403));
        assert!(is_retryable(503));
        assert!(!is_retryable(404));
        assert!(!is_retryable(500));
    }
}
