//! OS notification records and the notification capability.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::ServiceWorkerError;

/// Data attached to every displayed notification, read back on click.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

/// A notification as handed to the host for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

/// Host-assigned notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

/// The host's notification surface.
#[async_trait]
pub trait NotificationHost: Send + Sync {
    /// Display a notification.
    async fn show_notification(
        &self,
        record: NotificationRecord,
    ) -> Result<NotificationId, ServiceWorkerError>;

    /// Dismiss a notification. Closing an unknown or already closed
    /// notification is a no-op.
    async fn close(&self, id: NotificationId);
}

/// A notification held by [`InMemoryNotifications`].
#[derive(Debug, Clone)]
pub struct ShownNotification {
    pub id: NotificationId,
    pub record: NotificationRecord,
    pub closed: bool,
}

/// In-memory notification surface.
#[derive(Debug, Default)]
pub struct InMemoryNotifications {
    shown: RwLock<Vec<ShownNotification>>,
    denied: AtomicBool,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every display request, as a host without permission would.
    pub fn deny(&self) {
        self.denied.store(true, Ordering::Relaxed);
    }

    /// Every notification displayed so far, in display order.
    pub async fn shown(&self) -> Vec<ShownNotification> {
        self.shown.read().await.clone()
    }

    /// Look up a notification.
    pub async fn get(&self, id: NotificationId) -> Option<ShownNotification> {
        self.shown.read().await.iter().find(|n| n.id == id).cloned()
    }
}

#[async_trait]
impl NotificationHost for InMemoryNotifications {
    async fn show_notification(
        &self,
        record: NotificationRecord,
    ) -> Result<NotificationId, ServiceWorkerError> {
        if self.denied.load(Ordering::Relaxed) {
            return Err(ServiceWorkerError::NotificationError(
                "permission denied".to_string(),
            ));
        }
        let id = NotificationId::new();
        debug!(id = id.raw(), title = %record.title, "notification shown");
        self.shown.write().await.push(ShownNotification {
            id,
            record,
            closed: false,
        });
        Ok(id)
    }

    async fn close(&self, id: NotificationId) {
        if let Some(n) = self.shown.write().await.iter_mut().find(|n| n.id == id) {
            n.closed = true;
        }
    }
}
