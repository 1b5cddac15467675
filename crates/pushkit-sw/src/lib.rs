//! # PushKit Service Worker
//!
//! Background relay worker for the PushKit client application.
//!
//! ## Features
//!
//! - **Precache**: install-time, all-or-nothing population of a named cache
//! - **Fetch interception**: cache-first, network-fallback, read-only
//! - **Push relay**: OS notification plus fan-out to every open window
//! - **Notification clicks**: focus an existing window or open a new one
//!
//! ## Architecture
//!
//! ```text
//! RelayWorker ── dispatch(WorkerEvent) ──► handler table
//!     │                                        │
//!     │                                        └── ExtendableEvent (named tasks)
//!     │                                                 └── settle() ──► SettledEvent
//!     ├── CacheManager ──── CacheStorage + Network
//!     ├── PushReceiver ──┬─ NotificationHost (display)
//!     │                  └─ ClientRelay ──── WindowHost (relay)
//!     └── ClickRouter ───┬─ NotificationHost (close)
//!                        └─ ClientRelay ──── WindowHost (focus / open)
//! ```
//!
//! Host capabilities (network, notifications, windows) are traits so the
//! worker runs unchanged against a browser host or the in-memory doubles
//! shipped with this crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cache;
pub mod click;
pub mod clients;
pub mod config;
pub mod events;
pub mod network;
pub mod notification;
pub mod push;
pub mod subscription;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheManager, CacheStorage, FetchResponse, Request};
pub use click::{ClickOutcome, ClickRouter, NotificationClickEvent};
pub use clients::{
    ClientId, ClientMatchOptions, ClientRelay, ClientType, InMemoryWindows, RelayReport,
    WindowHandle, WindowHost,
};
pub use config::{PrecacheManifest, WorkerConfig, WorkerScope};
pub use events::{EventKind, ExtendableEvent, SettledEvent, TaskOutcome, TaskOutput};
pub use network::{Network, StaticNetwork};
pub use notification::{
    InMemoryNotifications, NotificationData, NotificationHost, NotificationId, NotificationRecord,
};
pub use push::{DisplayFields, PushEvent, PushKind, PushReceiver};
pub use subscription::{Permission, SubscribeFailure, SubscriptionCapability, SubscriptionHandle};
pub use worker::{HostCapabilities, RelayWorker, WorkerEvent};

#[cfg(feature = "http")]
pub use network::HttpNetwork;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Notification error: {0}")]
    NotificationError(String),

    #[error("Client error: {0}")]
    ClientError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// Get the error category for logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::NetworkError(_) => "network",
            Self::CacheError(_) => "cache",
            Self::InstallFailed(_) => "install",
            Self::NotificationError(_) => "notification",
            Self::ClientError(_) => "client",
            Self::StateError(_) => "state",
            Self::ConfigError(_) => "config",
            Self::NotFound(_) => "not_found",
        }
    }
}

impl From<pushkit_common::PushKitError> for ServiceWorkerError {
    fn from(err: pushkit_common::PushKitError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

impl From<ServiceWorkerError> for pushkit_common::PushKitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::NetworkError(_) => {
                pushkit_common::PushKitError::network_with_source("fetch failed", err)
            }
            _ => pushkit_common::PushKitError::worker_with_source(err.category(), err),
        }
    }
}

// ==================== Lifecycle ====================

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceWorkerState {
    /// Initial state, no install attempted yet.
    #[default]
    Parsed,
    /// Installing (install event in flight).
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Activating (activate event in flight).
    Activating,
    /// Active and serving from the precache.
    Activated,
    /// Install failed; this generation never serves from cache.
    Redundant,
}

impl ServiceWorkerState {
    /// Check if active.
    pub fn is_active(&self) -> bool {
        *self == Self::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        *self == Self::Redundant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(
            ServiceWorkerError::InstallFailed("x".into()).category(),
            "install"
        );
        assert_eq!(ServiceWorkerError::ClientError("x".into()).category(), "client");
    }

    #[test]
    fn test_error_into_common() {
        let err: pushkit_common::PushKitError =
            ServiceWorkerError::NetworkError("offline".into()).into();
        assert_eq!(err.category(), "network");

        let err: pushkit_common::PushKitError =
            ServiceWorkerError::ClientError("gone".into()).into();
        assert_eq!(err.category(), "worker");
    }

    #[test]
    fn test_state_defaults() {
        let state = ServiceWorkerState::default();
        assert_eq!(state, ServiceWorkerState::Parsed);
        assert!(!state.is_active());
        assert!(ServiceWorkerState::Redundant.is_redundant());
    }
}
