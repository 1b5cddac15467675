//! The relay worker: lifecycle state and the event dispatch table.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{field, info, info_span, warn, Instrument};

use crate::cache::{CacheManager, CacheStorage, Request};
use crate::click::{ClickRouter, NotificationClickEvent};
use crate::clients::{ClientRelay, WindowHost};
use crate::config::{WorkerConfig, WorkerScope};
use crate::events::{EventKind, ExtendableEvent, SettledEvent, TaskOutput};
use crate::network::Network;
use crate::notification::NotificationHost;
use crate::push::{PushEvent, PushReceiver};
use crate::{ServiceWorkerError, ServiceWorkerState};

/// Events delivered to the worker by the host.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Push(PushEvent),
    NotificationClick(NotificationClickEvent),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Install => EventKind::Install,
            Self::Activate => EventKind::Activate,
            Self::Fetch(_) => EventKind::Fetch,
            Self::Push(_) => EventKind::Push,
            Self::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

/// Capabilities the host provides to the worker.
#[derive(Clone)]
pub struct HostCapabilities {
    pub network: Arc<dyn Network>,
    pub notifications: Arc<dyn NotificationHost>,
    pub windows: Arc<dyn WindowHost>,
    pub caches: Arc<RwLock<CacheStorage>>,
}

impl HostCapabilities {
    /// Capabilities with a fresh, empty cache store.
    pub fn new(
        network: Arc<dyn Network>,
        notifications: Arc<dyn NotificationHost>,
        windows: Arc<dyn WindowHost>,
    ) -> Self {
        Self {
            network,
            notifications,
            windows,
            caches: Arc::new(RwLock::new(CacheStorage::new())),
        }
    }
}

/// Turns one event into the tasks it must wait for.
pub type Handler = fn(&RelayWorker, WorkerEvent) -> ExtendableEvent;

/// Event kind to handler.
pub const HANDLERS: [(EventKind, Handler); 5] = [
    (EventKind::Install, handle_install),
    (EventKind::Activate, handle_activate),
    (EventKind::Fetch, handle_fetch),
    (EventKind::Push, handle_push),
    (EventKind::NotificationClick, handle_notification_click),
];

/// Look up the handler for an event kind.
pub fn handler_for(kind: EventKind) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, handler)| *handler)
}

/// One activation of the relay worker.
pub struct RelayWorker {
    scope: Arc<WorkerScope>,
    state: Arc<RwLock<ServiceWorkerState>>,
    cache: CacheManager,
    push: PushReceiver,
    click: ClickRouter,
}

impl RelayWorker {
    /// Resolve `config` and wire the components to the host.
    pub fn new(config: WorkerConfig, host: HostCapabilities) -> Result<Self, ServiceWorkerError> {
        let scope = Arc::new(WorkerScope::new(config)?);
        let relay = ClientRelay::new(Arc::clone(&host.windows));

        Ok(Self {
            cache: CacheManager::new(Arc::clone(&scope), host.caches, host.network),
            push: PushReceiver::new(
                Arc::clone(&scope),
                Arc::clone(&host.notifications),
                relay.clone(),
            ),
            click: ClickRouter::new(Arc::clone(&scope), host.notifications, relay),
            state: Arc::new(RwLock::new(ServiceWorkerState::Parsed)),
            scope,
        })
    }

    pub fn scope(&self) -> &Arc<WorkerScope> {
        &self.scope
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServiceWorkerState {
        *self.state.read().await
    }

    /// Run the event's handler and return the registered work, unawaited.
    pub fn dispatch(&self, event: WorkerEvent) -> ExtendableEvent {
        let kind = event.kind();
        match handler_for(kind) {
            Some(handler) => handler(self, event),
            None => {
                let mut ev = ExtendableEvent::new(kind);
                ev.reject(
                    "dispatch",
                    ServiceWorkerError::StateError(format!("no handler for {}", kind.as_str())),
                );
                ev
            }
        }
    }

    /// Dispatch an event and wait for all of its work to settle.
    pub async fn handle(&self, event: WorkerEvent) -> SettledEvent {
        let kind = event.kind();
        let span = info_span!("event", kind = kind.as_str(), push_kind = field::Empty);
        let pending = {
            let _enter = span.enter();
            self.dispatch(event)
        };
        pending.settle().instrument(span).await
    }
}

fn mismatched(kind: EventKind) -> ExtendableEvent {
    let mut ev = ExtendableEvent::new(kind);
    ev.reject(
        "dispatch",
        ServiceWorkerError::StateError(format!("event is not a {} event", kind.as_str())),
    );
    ev
}

fn handle_install(worker: &RelayWorker, event: WorkerEvent) -> ExtendableEvent {
    if !matches!(event, WorkerEvent::Install) {
        return mismatched(EventKind::Install);
    }
    let mut ev = ExtendableEvent::new(EventKind::Install);
    let cache = worker.cache.clone();
    let state = Arc::clone(&worker.state);

    ev.wait_until("precache", async move {
        *state.write().await = ServiceWorkerState::Installing;
        match cache.install().await {
            Ok(entries) => {
                *state.write().await = ServiceWorkerState::Installed;
                info!(entries, "worker installed");
                Ok(TaskOutput::Installed { entries })
            }
            Err(e) => {
                *state.write().await = ServiceWorkerState::Redundant;
                warn!(error = %e, "install failed, worker is redundant");
                Err(e)
            }
        }
    });
    ev
}

fn handle_activate(worker: &RelayWorker, event: WorkerEvent) -> ExtendableEvent {
    if !matches!(event, WorkerEvent::Activate) {
        return mismatched(EventKind::Activate);
    }
    let mut ev = ExtendableEvent::new(EventKind::Activate);
    let cache = worker.cache.clone();
    let state = Arc::clone(&worker.state);
    let cleanup = worker.scope.config().cleanup_stale_caches;

    ev.wait_until("activate", async move {
        {
            let mut current = state.write().await;
            if *current != ServiceWorkerState::Installed {
                return Err(ServiceWorkerError::StateError(format!(
                    "cannot activate from {:?}",
                    *current
                )));
            }
            *current = ServiceWorkerState::Activating;
        }
        let removed = if cleanup {
            cache.remove_stale().await
        } else {
            Vec::new()
        };
        *state.write().await = ServiceWorkerState::Activated;
        info!(removed = removed.len(), "worker activated");
        Ok(TaskOutput::Activated { removed })
    });
    ev
}

fn handle_fetch(worker: &RelayWorker, event: WorkerEvent) -> ExtendableEvent {
    let WorkerEvent::Fetch(request) = event else {
        return mismatched(EventKind::Fetch);
    };
    let mut ev = ExtendableEvent::new(EventKind::Fetch);
    let cache = worker.cache.clone();

    ev.wait_until("respond-with", async move {
        let response = cache.intercept(&request).await?;
        Ok::<_, ServiceWorkerError>(TaskOutput::Response(response))
    });
    ev
}

fn handle_push(worker: &RelayWorker, event: WorkerEvent) -> ExtendableEvent {
    let WorkerEvent::Push(push) = event else {
        return mismatched(EventKind::Push);
    };
    let mut ev = ExtendableEvent::new(EventKind::Push);
    worker.push.receive(&push, &mut ev);
    ev
}

fn handle_notification_click(worker: &RelayWorker, event: WorkerEvent) -> ExtendableEvent {
    let WorkerEvent::NotificationClick(click) = event else {
        return mismatched(EventKind::NotificationClick);
    };
    let mut ev = ExtendableEvent::new(EventKind::NotificationClick);
    let router = worker.click.clone();

    ev.wait_until("focus-or-open", async move {
        let outcome = router.route(click).await?;
        Ok::<_, ServiceWorkerError>(TaskOutput::Clicked(outcome))
    });
    ev
}
