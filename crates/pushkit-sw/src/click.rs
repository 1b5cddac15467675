//! Routing of notification clicks to an application window.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::clients::{ClientId, ClientRelay};
use crate::config::WorkerScope;
use crate::notification::{NotificationHost, NotificationId};
use crate::ServiceWorkerError;

/// A user interaction with a displayed notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClickEvent {
    /// Notification that was clicked.
    pub notification: NotificationId,

    /// Data attached when the notification was shown. May be absent or
    /// not match the expected shape.
    pub data: JsonValue,
}

impl NotificationClickEvent {
    pub fn new(notification: NotificationId, data: JsonValue) -> Self {
        Self { notification, data }
    }

    /// Navigation target: `data.url`, else the worker root.
    pub fn target_url(&self, scope: &WorkerScope) -> String {
        self.data
            .get("url")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| scope.root_path())
            .to_string()
    }
}

/// What a click resulted in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing window was brought to the foreground.
    Focused(ClientId),
    /// No window was open; a new one was opened.
    Opened(ClientId),
    /// No window was open and the host would not open one.
    NoWindow,
}

/// Focuses an open window or opens a new one.
#[derive(Clone)]
pub struct ClickRouter {
    scope: Arc<WorkerScope>,
    notifications: Arc<dyn NotificationHost>,
    relay: ClientRelay,
}

impl ClickRouter {
    pub fn new(
        scope: Arc<WorkerScope>,
        notifications: Arc<dyn NotificationHost>,
        relay: ClientRelay,
    ) -> Self {
        Self {
            scope,
            notifications,
            relay,
        }
    }

    /// Close the notification, then focus the first open window regardless
    /// of where it is, or open one at the target url if none exist.
    pub async fn route(&self, event: NotificationClickEvent) -> Result<ClickOutcome, ServiceWorkerError> {
        self.notifications.close(event.notification).await;

        let url = event.target_url(&self.scope);
        let windows = self.relay.enumerate().await?;
        debug!(windows = windows.len(), target = %url, "routing notification click");

        if let Some(first) = windows.first() {
            let focused = self.relay.windows().focus(first).await?;
            info!(client = %focused.id, "focused existing window");
            return Ok(ClickOutcome::Focused(focused.id));
        }

        match self.relay.windows().open_window(&url).await? {
            Some(opened) => {
                info!(client = %opened.id, url = %url, "opened window");
                Ok(ClickOutcome::Opened(opened.id))
            }
            None => {
                info!(url = %url, "host declined to open a window");
                Ok(ClickOutcome::NoWindow)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{InMemoryWindows, WindowHandle};
    use crate::config::WorkerConfig;
    use crate::notification::{InMemoryNotifications, NotificationData, NotificationRecord};
    use serde_json::json;
    use url::Url;

    fn scope() -> Arc<WorkerScope> {
        Arc::new(
            WorkerScope::new(WorkerConfig::from_script_url(
                Url::parse("https://example.com/static/service-worker.js").unwrap(),
            ))
            .unwrap(),
        )
    }

    async fn setup() -> (ClickRouter, Arc<InMemoryNotifications>, Arc<InMemoryWindows>, NotificationId) {
        let notes = Arc::new(InMemoryNotifications::new());
        let windows = Arc::new(InMemoryWindows::new());
        let id = notes
            .show_notification(NotificationRecord {
                title: "Alert".into(),
                body: String::new(),
                data: NotificationData {
                    url: "/alerts/9".into(),
                },
            })
            .await
            .unwrap();
        let router = ClickRouter::new(scope(), notes.clone(), ClientRelay::new(windows.clone()));
        (router, notes, windows, id)
    }

    #[test]
    fn test_target_url_fallback() {
        let s = scope();
        let id = NotificationId::new();
        assert_eq!(NotificationClickEvent::new(id, json!({ "url": "/x" })).target_url(&s), "/x");
        assert_eq!(NotificationClickEvent::new(id, JsonValue::Null).target_url(&s), "/");
        assert_eq!(NotificationClickEvent::new(id, json!({ "url": 4 })).target_url(&s), "/");
    }

    #[tokio::test]
    async fn test_focuses_first_window_even_if_elsewhere() {
        let (router, notes, windows, id) = setup().await;
        let first = windows.add(WindowHandle::uncontrolled_window("/services")).await;
        windows.add(WindowHandle::window("/alerts/9")).await;

        let outcome = router
            .route(NotificationClickEvent::new(id, json!({ "url": "/alerts/9" })))
            .await
            .unwrap();

        assert_eq!(outcome, ClickOutcome::Focused(first.clone()));
        assert!(windows.get(&first).await.unwrap().focused);
        assert_eq!(windows.len().await, 2);
        assert!(notes.get(id).await.unwrap().closed);
    }

    #[tokio::test]
    async fn test_opens_window_when_none_open() {
        let (router, notes, windows, id) = setup().await;

        let outcome = router
            .route(NotificationClickEvent::new(id, json!({ "url": "/alerts/9" })))
            .await
            .unwrap();

        let ClickOutcome::Opened(opened) = outcome else {
            panic!("expected a new window, got {outcome:?}");
        };
        assert_eq!(windows.get(&opened).await.unwrap().url, "/alerts/9");
        assert!(notes.get(id).await.unwrap().closed);
    }

    #[tokio::test]
    async fn test_host_declines_open() {
        let (router, notes, windows, id) = setup().await;
        windows.disable_open_window();

        let outcome = router
            .route(NotificationClickEvent::new(id, JsonValue::Null))
            .await
            .unwrap();
        assert_eq!(outcome, ClickOutcome::NoWindow);
        assert!(notes.get(id).await.unwrap().closed);
    }
}
