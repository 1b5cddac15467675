//! Open application windows and the relay that broadcasts to them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::ServiceWorkerError;

// ==================== Client ====================

/// Client identifier assigned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub String);

impl ClientId {
    fn generate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed)))
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
}

/// Snapshot of one client at enumeration time.
///
/// Handles are only valid for the event that enumerated them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowHandle {
    /// Client ID.
    pub id: ClientId,

    /// Location the client is showing.
    pub url: String,

    /// Client type.
    pub client_type: ClientType,

    /// Whether this worker controls the client.
    pub controlled: bool,

    /// Whether focused.
    pub focused: bool,
}

impl WindowHandle {
    /// A controlled window client.
    pub fn window(url: &str) -> Self {
        Self {
            id: ClientId::generate(),
            url: url.to_string(),
            client_type: ClientType::Window,
            controlled: true,
            focused: false,
        }
    }

    /// A window opened before this worker took control.
    pub fn uncontrolled_window(url: &str) -> Self {
        Self {
            controlled: false,
            ..Self::window(url)
        }
    }
}

/// Options for enumerating clients.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    /// Every window, controlled or not.
    pub fn all_windows() -> Self {
        Self {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        }
    }

    /// Whether a client passes this filter.
    pub fn matches(&self, client: &WindowHandle) -> bool {
        if !self.include_uncontrolled && !client.controlled {
            return false;
        }
        client.client_type == self.client_type
    }
}

// ==================== Window Host ====================

/// The host's view of running application windows.
#[async_trait]
pub trait WindowHost: Send + Sync {
    /// Enumerate clients, in host order.
    async fn match_all(
        &self,
        options: ClientMatchOptions,
    ) -> Result<Vec<WindowHandle>, ServiceWorkerError>;

    /// Bring a window to the foreground.
    async fn focus(&self, client: &WindowHandle) -> Result<WindowHandle, ServiceWorkerError>;

    /// Deliver a message to a window.
    async fn post_message(
        &self,
        client: &WindowHandle,
        message: &JsonValue,
    ) -> Result<(), ServiceWorkerError>;

    /// Open a new window. `Ok(None)` means the host declined.
    async fn open_window(&self, url: &str) -> Result<Option<WindowHandle>, ServiceWorkerError>;
}

#[derive(Debug)]
struct WindowSlot {
    handle: WindowHandle,
    inbox: Vec<JsonValue>,
    broken: bool,
}

/// In-memory window registry.
#[derive(Debug)]
pub struct InMemoryWindows {
    windows: RwLock<Vec<WindowSlot>>,
    can_open: AtomicBool,
}

impl Default for InMemoryWindows {
    fn default() -> Self {
        Self {
            windows: RwLock::new(Vec::new()),
            can_open: AtomicBool::new(true),
        }
    }
}

impl InMemoryWindows {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a client. Returns its ID.
    pub async fn add(&self, handle: WindowHandle) -> ClientId {
        let id = handle.id.clone();
        self.windows.write().await.push(WindowSlot {
            handle,
            inbox: Vec::new(),
            broken: false,
        });
        id
    }

    /// Remove a client.
    pub async fn remove(&self, id: &ClientId) -> Option<WindowHandle> {
        let mut windows = self.windows.write().await;
        let idx = windows.iter().position(|w| &w.handle.id == id)?;
        Some(windows.remove(idx).handle)
    }

    /// Make message delivery to one client fail.
    pub async fn break_channel(&self, id: &ClientId) {
        if let Some(w) = self.windows.write().await.iter_mut().find(|w| &w.handle.id == id) {
            w.broken = true;
        }
    }

    /// Refuse `open_window` requests.
    pub fn disable_open_window(&self) {
        self.can_open.store(false, Ordering::Relaxed);
    }

    /// Messages delivered to a client.
    pub async fn messages(&self, id: &ClientId) -> Vec<JsonValue> {
        self.windows
            .read()
            .await
            .iter()
            .find(|w| &w.handle.id == id)
            .map(|w| w.inbox.clone())
            .unwrap_or_default()
    }

    /// Current state of a client.
    pub async fn get(&self, id: &ClientId) -> Option<WindowHandle> {
        self.windows
            .read()
            .await
            .iter()
            .find(|w| &w.handle.id == id)
            .map(|w| w.handle.clone())
    }

    /// Number of clients.
    pub async fn len(&self) -> usize {
        self.windows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl WindowHost for InMemoryWindows {
    async fn match_all(
        &self,
        options: ClientMatchOptions,
    ) -> Result<Vec<WindowHandle>, ServiceWorkerError> {
        Ok(self
            .windows
            .read()
            .await
            .iter()
            .map(|w| &w.handle)
            .filter(|h| options.matches(h))
            .cloned()
            .collect())
    }

    async fn focus(&self, client: &WindowHandle) -> Result<WindowHandle, ServiceWorkerError> {
        if client.client_type != ClientType::Window {
            return Err(ServiceWorkerError::ClientError(
                "Can only focus window clients".to_string(),
            ));
        }
        let mut windows = self.windows.write().await;
        if !windows.iter().any(|w| w.handle.id == client.id) {
            return Err(ServiceWorkerError::NotFound(client.id.to_string()));
        }
        let mut focused = None;
        for w in windows.iter_mut() {
            w.handle.focused = w.handle.id == client.id;
            if w.handle.focused {
                focused = Some(w.handle.clone());
            }
        }
        focused.ok_or_else(|| ServiceWorkerError::NotFound(client.id.to_string()))
    }

    async fn post_message(
        &self,
        client: &WindowHandle,
        message: &JsonValue,
    ) -> Result<(), ServiceWorkerError> {
        let mut windows = self.windows.write().await;
        let slot = windows
            .iter_mut()
            .find(|w| w.handle.id == client.id)
            .ok_or_else(|| ServiceWorkerError::NotFound(client.id.to_string()))?;
        if slot.broken {
            return Err(ServiceWorkerError::ClientError(format!(
                "message channel closed for {}",
                client.id
            )));
        }
        slot.inbox.push(message.clone());
        Ok(())
    }

    async fn open_window(&self, url: &str) -> Result<Option<WindowHandle>, ServiceWorkerError> {
        if !self.can_open.load(Ordering::Relaxed) {
            return Ok(None);
        }
        let mut windows = self.windows.write().await;
        for w in windows.iter_mut() {
            w.handle.focused = false;
        }
        let handle = WindowHandle {
            focused: true,
            ..WindowHandle::window(url)
        };
        windows.push(WindowSlot {
            handle: handle.clone(),
            inbox: Vec::new(),
            broken: false,
        });
        Ok(Some(handle))
    }
}

// ==================== Relay ====================

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Windows the message reached.
    pub delivered: usize,
    /// Windows whose delivery failed.
    pub failed: Vec<ClientId>,
}

/// Fans messages out to every open window.
#[derive(Clone)]
pub struct ClientRelay {
    windows: Arc<dyn WindowHost>,
}

impl ClientRelay {
    pub fn new(windows: Arc<dyn WindowHost>) -> Self {
        Self { windows }
    }

    /// Underlying window capability.
    pub fn windows(&self) -> &Arc<dyn WindowHost> {
        &self.windows
    }

    /// Enumerate every window, including ones this worker does not control.
    pub async fn enumerate(&self) -> Result<Vec<WindowHandle>, ServiceWorkerError> {
        self.windows.match_all(ClientMatchOptions::all_windows()).await
    }

    /// Post `message` unmodified to every window open right now.
    ///
    /// A failed delivery is recorded and does not affect the other windows.
    pub async fn broadcast(&self, message: &JsonValue) -> Result<RelayReport, ServiceWorkerError> {
        let clients = self.enumerate().await?;
        debug!(windows = clients.len(), "relaying message");

        let deliveries = clients.iter().map(|client| async move {
            let result = self.windows.post_message(client, message).await;
            (client, result)
        });

        let mut report = RelayReport::default();
        for (client, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(client = %client.id, error = %e, "relay delivery failed");
                    report.failed.push(client.id.clone());
                }
            }
        }
        Ok(report)
    }
}
