//! Network transport for asset fetches
//!
//! [`Transport`] is the seam between the cacher and the network. The
//! production implementation, [`FetchEngine`], is a reqwest client with a hard
//! timeout, optional certificate validation and no internal retries. Bodies
//! are streamed and never read past the request's `read_limit`.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during fetching
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Invalid request header: {0}")]
    InvalidHeader(String),
    #[error("Failed to read body: {0}")]
    Body(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// A GET request for one asset
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    /// Request headers; later entries replace earlier ones with the same name
    pub headers: Vec<(String, String)>,
    /// Maximum number of body bytes to read
    pub read_limit: usize,
}

/// Response to a [`FetchRequest`]
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// The fetched URL (may differ from request due to redirects)
    pub final_url: Url,
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Body, at most `read_limit` bytes; empty for status >= 400
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Issues asset requests
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one GET. Must not retry.
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Configuration for the fetch engine
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Maximum redirects to follow
    pub max_redirects: usize,
    /// Skip TLS certificate validation
    pub accept_invalid_certs: bool,
    /// Concurrent idle connections kept per host
    pub connections_per_host: usize,
    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` from the environment
    pub use_env_proxy: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(6),
            connect_timeout: Duration::from_secs(6),
            max_redirects: 10,
            accept_invalid_certs: true,
            connections_per_host: 8,
            use_env_proxy: true,
        }
    }
}

/// reqwest-backed [`Transport`]
pub struct FetchEngine {
    http_client: reqwest::Client,
    config: FetchConfig,
}

impl FetchEngine {
    /// Create a new fetch engine
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder();
        if !config.use_env_proxy {
            builder = builder.no_proxy();
        }

        let http_client = builder
            .pool_max_idle_per_host(config.connections_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Get configuration
    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.config.timeout)
        } else {
            FetchError::Http(err)
        }
    }
}

#[async_trait]
impl Transport for FetchEngine {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let headers = header_map(&request.headers)?;

        let mut response = self
            .http_client
            .get(request.url.as_str())
            .headers(headers)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let mut body = Vec::new();
        if status < 400 {
            while let Some(chunk) = response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.config.timeout)
                } else {
                    FetchError::Body(e.to_string())
                }
            })? {
                let room = request.read_limit - body.len();
                if chunk.len() >= room {
                    body.extend_from_slice(&chunk[..room]);
                    break;
                }
                body.extend_from_slice(&chunk);
            }
        }

        Ok(FetchResponse {
            final_url,
            status,
            headers,
            body,
        })
    }
}

/// Build a header map, later duplicates replacing earlier ones
fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, FetchError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FetchError::InvalidHeader(name.clone()))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| FetchError::InvalidHeader(format!("{}: {}", name, value)))?;
        map.insert(name, value);
    }
    Ok(map)
}
