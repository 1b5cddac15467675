//! Precache storage and cache-first request interception.

use std::sync::Arc;

use futures::future::try_join_all;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerScope;
use crate::network::Network;
use crate::ServiceWorkerError;

// ==================== Request / Response ====================

/// An outgoing resource request seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: String,

    /// Request URL.
    pub url: Url,

    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            headers: HashMap::new(),
        }
    }

    /// Create a request with an explicit method.
    pub fn new(method: &str, url: Url) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            url,
            headers: HashMap::new(),
        }
    }

    /// Whether this request can be answered from the cache.
    pub fn is_cacheable(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Cache key: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut key = self.url.clone();
        key.set_fragment(None);
        key.into()
    }
}

/// A response returned to the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Create a network response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: HashMap::new(),
            body: body.into(),
            from_cache: false,
        }
    }

    /// Create a 200 response.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let mut resp = Self::new(200, body);
        resp.status_text = "OK".to_string();
        resp
    }

    /// Create a response from cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            status_text: entry.status_text.clone(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ==================== Cache ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,
}

impl CacheEntry {
    /// Capture a response for a request.
    pub fn capture(request: &Request, response: FetchResponse) -> Self {
        Self {
            url: request.cache_key(),
            method: request.method.clone(),
            status: response.status,
            status_text: response.status_text,
            headers: response.headers,
            body: response.body,
        }
    }
}

/// A named cache generation.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only GET requests match.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        if !request.is_cacheable() {
            return None;
        }
        self.entries.get(&request.cache_key())
    }

    /// Store an entry under its URL.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// Host cache store, holding caches in creation order.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: Vec<Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        let idx = match self.caches.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                self.caches.push(Cache::new(name));
                self.caches.len() - 1
            }
        };
        &mut self.caches[idx]
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.iter().find(|c| c.name == name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        let before = self.caches.len();
        self.caches.retain(|c| c.name != name);
        self.caches.len() != before
    }

    /// Get all cache names.
    pub fn keys(&self) -> Vec<&str> {
        self.caches.iter().map(|c| c.name.as_str()).collect()
    }

    /// Match across all caches, oldest first.
    pub fn match_request(&self, request: &Request) -> Option<&CacheEntry> {
        self.caches.iter().find_map(|c| c.match_request(request))
    }
}

// ==================== Cache Manager ====================

/// Populates the precache on install and answers intercepted requests.
#[derive(Clone)]
pub struct CacheManager {
    scope: Arc<WorkerScope>,
    storage: Arc<RwLock<CacheStorage>>,
    network: Arc<dyn Network>,
}

impl CacheManager {
    pub fn new(
        scope: Arc<WorkerScope>,
        storage: Arc<RwLock<CacheStorage>>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            scope,
            storage,
            network,
        }
    }

    /// Shared cache store.
    pub fn storage(&self) -> &Arc<RwLock<CacheStorage>> {
        &self.storage
    }

    /// Fetch every manifest resource and store them in the current generation.
    ///
    /// Nothing is written unless every fetch succeeds with a 2xx status.
    pub async fn install(&self) -> Result<usize, ServiceWorkerError> {
        let manifest = self.scope.manifest();
        info!(cache = self.scope.cache_name(), resources = manifest.len(), "precaching");

        let fetches = manifest.iter().map(|url| {
            let request = Request::get(url.clone());
            let network = Arc::clone(&self.network);
            async move {
                let response = network.fetch(&request).await.map_err(|e| {
                    ServiceWorkerError::InstallFailed(format!("{}: {}", request.url, e))
                })?;
                if !response.is_success() {
                    return Err(ServiceWorkerError::InstallFailed(format!(
                        "{}: status {}",
                        request.url, response.status
                    )));
                }
                Ok(CacheEntry::capture(&request, response))
            }
        });

        let entries = match try_join_all(fetches).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "precache aborted, nothing stored");
                return Err(e);
            }
        };

        let count = entries.len();
        let mut storage = self.storage.write().await;
        let cache = storage.open(self.scope.cache_name());
        for entry in entries {
            cache.put(entry);
        }
        info!(cache = self.scope.cache_name(), entries = count, "precache complete");
        Ok(count)
    }

    /// Serve a request from cache, falling back to the network on a miss.
    ///
    /// Network responses are never written back.
    pub async fn intercept(&self, request: &Request) -> Result<FetchResponse, ServiceWorkerError> {
        {
            let storage = self.storage.read().await;
            if let Some(entry) = storage.match_request(request) {
                debug!(url = %request.url, "cache hit");
                return Ok(FetchResponse::from_cache(entry));
            }
        }
        debug!(url = %request.url, method = %request.method, "cache miss, using network");
        self.network.fetch(request).await
    }

    /// Delete every cache that is not the current generation.
    pub async fn remove_stale(&self) -> Vec<String> {
        let mut storage = self.storage.write().await;
        let stale: Vec<String> = storage
            .keys()
            .into_iter()
            .filter(|name| *name != self.scope.cache_name())
            .map(str::to_string)
            .collect();
        for name in &stale {
            storage.delete(name);
            info!(cache = %name, "deleted stale cache");
        }
        stale
    }
}
