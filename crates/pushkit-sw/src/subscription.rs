//! Push subscription capability exposed by the surrounding application.
//!
//! The worker never calls into this; it only defines the interface the page
//! side implements, and the normalization of subscription failures into
//! messages fit for the user.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Shown when a subscription failure carries no usable message.
pub const FALLBACK_SUBSCRIBE_MESSAGE: &str = "Unable to enable notifications.";

/// Notification permission as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    #[default]
    Default,
    Granted,
    Denied,
}

impl Permission {
    /// Whether asking the user could still change the outcome.
    pub fn can_prompt(&self) -> bool {
        *self == Self::Default
    }
}

/// Encryption keys of a push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub auth: String,
    pub p256dh: String,
}

/// A browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionHandle {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

impl SubscriptionHandle {
    /// Whether the subscription has everything a sender needs.
    pub fn is_complete(&self) -> bool {
        !self.endpoint.is_empty() && !self.keys.auth.is_empty() && !self.keys.p256dh.is_empty()
    }
}

/// A failed subscription attempt, in whatever form the host reported it.
#[derive(Debug)]
pub enum SubscribeFailure {
    /// A structured error.
    Error(Box<dyn std::error::Error + Send + Sync>),
    /// A bare message.
    Message(String),
    /// Anything else.
    Unknown(JsonValue),
}

impl SubscribeFailure {
    /// Human-readable message for the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Error(e) => e.to_string(),
            Self::Message(m) => m.clone(),
            Self::Unknown(_) => FALLBACK_SUBSCRIBE_MESSAGE.to_string(),
        }
    }
}

impl std::fmt::Display for SubscribeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message())
    }
}

/// Subscription management implemented by the page side.
#[async_trait]
pub trait SubscriptionCapability: Send + Sync {
    /// Current notification permission.
    fn permission(&self) -> Permission;

    /// Prompt for permission, then subscribe.
    async fn request_permission_and_subscribe(&self) -> Result<SubscriptionHandle, SubscribeFailure>;

    /// Subscribe if permission is already granted. `Ok(None)` when there is
    /// nothing to do.
    async fn ensure_subscribed(&self) -> Result<Option<SubscriptionHandle>, SubscribeFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceWorkerError;
    use serde_json::json;

    struct DeniedHost;

    #[async_trait]
    impl SubscriptionCapability for DeniedHost {
        fn permission(&self) -> Permission {
            Permission::Denied
        }

        async fn request_permission_and_subscribe(
            &self,
        ) -> Result<SubscriptionHandle, SubscribeFailure> {
            Err(SubscribeFailure::Error(Box::new(
                ServiceWorkerError::NotificationError("permission denied".into()),
            )))
        }

        async fn ensure_subscribed(&self) -> Result<Option<SubscriptionHandle>, SubscribeFailure> {
            Ok(None)
        }
    }

    #[test]
    fn test_permission_wire_format() {
        assert_eq!(serde_json::to_value(Permission::Granted).unwrap(), json!("granted"));
        let p: Permission = serde_json::from_value(json!("default")).unwrap();
        assert!(p.can_prompt());
        assert!(!Permission::Denied.can_prompt());
    }

    #[test]
    fn test_user_message_normalization() {
        assert_eq!(
            SubscribeFailure::Message("Push setup is not ready".into()).user_message(),
            "Push setup is not ready"
        );
        assert_eq!(
            SubscribeFailure::Unknown(json!({ "code": 3 })).user_message(),
            FALLBACK_SUBSCRIBE_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_capability_error_surfaces_message() {
        let host = DeniedHost;
        assert_eq!(host.permission(), Permission::Denied);
        let err = host.request_permission_and_subscribe().await.unwrap_err();
        assert_eq!(err.user_message(), "Notification error: permission denied");
        assert_eq!(host.ensure_subscribed().await.unwrap(), None);
    }

    #[test]
    fn test_subscription_completeness() {
        let mut sub: SubscriptionHandle = serde_json::from_value(json!({
            "endpoint": "https://push.example.com/abc",
            "keys": { "auth": "a", "p256dh": "p" }
        }))
        .unwrap();
        assert!(sub.is_complete());
        sub.keys.auth.clear();
        assert!(!sub.is_complete());
    }
}
