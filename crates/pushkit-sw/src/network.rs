//! Network capability used on cache misses and during install.

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::trace;

use crate::cache::{FetchResponse, Request};
use crate::ServiceWorkerError;

/// Handler for requests that leave the worker.
#[async_trait]
pub trait Network: Send + Sync {
    /// Perform the request. Transport failures are errors; HTTP error
    /// statuses are ordinary responses.
    async fn fetch(&self, request: &Request) -> Result<FetchResponse, ServiceWorkerError>;
}

/// Fixed routing table, for tests and the smoke harness.
///
/// Unrouted URLs answer 404. Every call is recorded.
#[derive(Debug, Default)]
pub struct StaticNetwork {
    routes: HashMap<String, FetchResponse>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl StaticNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a URL to a 200 response with the given body.
    pub fn with_route(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.with_response(url, FetchResponse::ok(body))
    }

    /// Route a URL to an explicit response.
    pub fn with_response(mut self, url: &str, response: FetchResponse) -> Self {
        self.routes.insert(url.to_string(), response);
        self
    }

    /// Make a URL fail at the transport level.
    pub fn with_failure(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Total number of fetches performed.
    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Number of fetches for one URL.
    pub async fn calls_for(&self, url: &str) -> usize {
        self.calls.lock().await.iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Network for StaticNetwork {
    async fn fetch(&self, request: &Request) -> Result<FetchResponse, ServiceWorkerError> {
        let key = request.url.as_str();
        self.calls.lock().await.push(key.to_string());
        trace!(url = key, "static fetch");

        if self.failing.contains(key) {
            return Err(ServiceWorkerError::NetworkError(format!(
                "connection failed: {key}"
            )));
        }
        Ok(self
            .routes
            .get(key)
            .cloned()
            .unwrap_or_else(|| FetchResponse::new(404, Vec::new())))
    }
}

// ==================== HTTP ====================

/// Network capability backed by a real HTTP client.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Network for HttpNetwork {
    async fn fetch(&self, request: &Request) -> Result<FetchResponse, ServiceWorkerError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceWorkerError::NetworkError(e.to_string()))?;

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body: body.to_vec(),
            from_cache: false,
        })
    }
}
