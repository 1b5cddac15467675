//! Worker configuration and the resolved per-activation scope.

use std::path::Path;

use pushkit_common::{PushKitError, ResultExt};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

/// Application name used as the default notification title.
pub const DEFAULT_APP_NAME: &str = "GoAlert";

/// Name of the current cache generation.
pub const DEFAULT_CACHE_NAME: &str = "goalert-cache-v1";

/// Path suffix of the worker script under its mount prefix.
pub const WORKER_SCRIPT_SUFFIX: &str = "/static/service-worker.js";

/// Root-relative assets fetched on install.
pub const DEFAULT_PRECACHE_ASSETS: [&str; 3] = ["/", "/static/app.js", "/static/app.css"];

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_cache_name() -> String {
    DEFAULT_CACHE_NAME.to_string()
}

fn default_precache_assets() -> Vec<String> {
    DEFAULT_PRECACHE_ASSETS.iter().map(|s| s.to_string()).collect()
}

/// Worker configuration, as shipped alongside the worker build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Location the worker script was served from.
    pub script_url: Url,

    /// Application name (default notification title).
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Cache generation name.
    #[serde(default = "default_cache_name")]
    pub cache_name: String,

    /// Assets to precache, relative to the deployment prefix.
    #[serde(default = "default_precache_assets")]
    pub precache_assets: Vec<String>,

    /// Delete caches from other generations on activate.
    #[serde(default)]
    pub cleanup_stale_caches: bool,
}

impl WorkerConfig {
    /// Create a configuration with defaults for a worker served from `script_url`.
    pub fn from_script_url(script_url: Url) -> Self {
        Self {
            script_url,
            app_name: default_app_name(),
            cache_name: default_cache_name(),
            precache_assets: default_precache_assets(),
            cleanup_stale_caches: false,
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> pushkit_common::Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| PushKitError::config_with_source("invalid worker config", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> pushkit_common::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .context(format!("reading worker config {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Check the configuration can be resolved into a scope.
    pub fn validate(&self) -> pushkit_common::Result<()> {
        if self.cache_name.trim().is_empty() {
            return Err(PushKitError::config("cache_name must not be empty"));
        }
        if self.script_url.cannot_be_a_base() {
            return Err(PushKitError::config(format!(
                "script_url {} cannot be used as a base",
                self.script_url
            )));
        }
        Ok(())
    }

    /// Deployment prefix, without a trailing slash.
    ///
    /// `/goalert/static/service-worker.js` yields `/goalert`. A script served
    /// from anywhere else is treated as living at the root of its directory.
    pub fn prefix(&self) -> String {
        let path = self.script_url.path();
        match path.strip_suffix(WORKER_SCRIPT_SUFFIX) {
            Some(prefix) => prefix.to_string(),
            // Not the standard location: scope to the script's directory
            // rather than treating the whole script path as a prefix.
            None => path
                .rsplit_once('/')
                .map(|(dir, _)| dir.to_string())
                .unwrap_or_default(),
        }
    }
}

/// Ordered list of absolute resource URLs fetched on install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheManifest(Vec<Url>);

impl PrecacheManifest {
    /// Iterate in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Root-relative paths of every entry.
    pub fn paths(&self) -> Vec<&str> {
        self.0.iter().map(|u| u.path()).collect()
    }
}

/// Configuration resolved once per worker activation.
///
/// Shared by every component through an `Arc`; nothing in it changes while the
/// worker is alive.
#[derive(Debug, Clone)]
pub struct WorkerScope {
    config: WorkerConfig,
    prefix: String,
    root_path: String,
    manifest: PrecacheManifest,
}

impl WorkerScope {
    /// Resolve a configuration.
    pub fn new(config: WorkerConfig) -> pushkit_common::Result<Self> {
        config.validate()?;

        let prefix = config.prefix();
        let root_path = format!("{}/", prefix);

        let mut urls = Vec::with_capacity(config.precache_assets.len());
        for asset in &config.precache_assets {
            let path = if asset.starts_with('/') {
                format!("{}{}", prefix, asset)
            } else {
                format!("{}/{}", prefix, asset)
            };
            let url = config.script_url.join(&path).map_err(|e| {
                PushKitError::config_with_source(format!("bad precache asset {asset}"), e)
            })?;
            urls.push(url);
        }

        debug!(prefix = %prefix, assets = urls.len(), "resolved worker scope");

        Ok(Self {
            config,
            prefix,
            root_path,
            manifest: PrecacheManifest(urls),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn app_name(&self) -> &str {
        &self.config.app_name
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Worker root location (`<prefix>/`), the fallback navigation target.
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn manifest(&self) -> &PrecacheManifest {
        &self.manifest
    }
}
