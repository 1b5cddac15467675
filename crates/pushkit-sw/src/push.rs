//! Inbound push handling: defensive parsing and the two independent
//! deliveries (OS notification and window relay).

use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn, Span};

use crate::clients::ClientRelay;
use crate::config::WorkerScope;
use crate::events::{ExtendableEvent, TaskOutput};
use crate::notification::{NotificationData, NotificationHost, NotificationRecord};
use crate::ServiceWorkerError;

/// A push message as delivered by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushEvent {
    /// Raw payload bytes, if the push carried any.
    pub data: Option<Vec<u8>>,
}

impl PushEvent {
    /// A push with a payload.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// A push without a payload.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A push carrying a JSON document.
    pub fn json(value: &JsonValue) -> Self {
        Self::new(value.to_string())
    }

    /// Parse the payload. Absent, unparsable and empty (`null`, `false`, `0`,
    /// `""`) payloads become an empty object.
    pub fn payload(&self) -> JsonValue {
        let parsed = match self.data.as_deref() {
            Some(bytes) => match serde_json::from_slice::<JsonValue>(bytes) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "unparsable push payload, using empty object");
                    JsonValue::Null
                }
            },
            None => JsonValue::Null,
        };
        if is_falsy(&parsed) {
            JsonValue::Object(Map::new())
        } else {
            parsed
        }
    }
}

fn is_falsy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Bool(b) => !b,
        JsonValue::Number(n) => n.as_f64() == Some(0.0),
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => false,
    }
}

/// Message category carried in the optional `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    Alert,
    AlertBundle,
    AlertStatus,
    Test,
    Verification,
    Other,
}

impl PushKind {
    /// Read the kind from a payload.
    pub fn of(payload: &JsonValue) -> Self {
        match payload.get("type").and_then(JsonValue::as_str) {
            Some("alert") => Self::Alert,
            Some("alert-bundle") => Self::AlertBundle,
            Some("alert-status") => Self::AlertStatus,
            Some("test") => Self::Test,
            Some("verification") => Self::Verification,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::AlertBundle => "alert-bundle",
            Self::AlertStatus => "alert-status",
            Self::Test => "test",
            Self::Verification => "verification",
            Self::Other => "other",
        }
    }
}

/// Title, body and target derived from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFields {
    pub title: String,
    pub body: String,
    pub url: String,
}

impl DisplayFields {
    /// Derive display fields, substituting defaults for missing, empty or
    /// non-string values.
    pub fn derive(payload: &JsonValue, scope: &WorkerScope) -> Self {
        let field = |name: &str| {
            payload
                .get(name)
                .and_then(JsonValue::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Self {
            title: field("title").unwrap_or_else(|| scope.app_name().to_string()),
            body: field("body").unwrap_or_default(),
            url: field("url").unwrap_or_else(|| scope.root_path().to_string()),
        }
    }

    pub fn into_record(self) -> NotificationRecord {
        NotificationRecord {
            title: self.title,
            body: self.body,
            data: NotificationData { url: self.url },
        }
    }
}

/// Turns push events into a display task and a relay task.
#[derive(Clone)]
pub struct PushReceiver {
    scope: Arc<WorkerScope>,
    notifications: Arc<dyn NotificationHost>,
    relay: ClientRelay,
}

impl PushReceiver {
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

    /// Register both deliveries for `push` on `event`.
    ///
    /// The relay receives the parsed payload as-is, not the defaulted
    /// display fields.
    pub fn receive(&self, push: &PushEvent, event: &mut ExtendableEvent) {
        let payload = push.payload();
        let kind = PushKind::of(&payload);
        let record = DisplayFields::derive(&payload, &self.scope).into_record();
        Span::current().record("push_kind", kind.as_str());
        debug!(title = %record.title, url = %record.data.url, "push received");

        let notifications = Arc::clone(&self.notifications);
        event.wait_until("show-notification", async move {
            let id = notifications.show_notification(record).await?;
            Ok::<_, ServiceWorkerError>(TaskOutput::Notified(id))
        });

        let relay = self.relay.clone();
        event.wait_until("relay-to-windows", async move {
            let report = relay.broadcast(&payload).await?;
            Ok::<_, ServiceWorkerError>(TaskOutput::Relayed(report))
        });
    }
}
