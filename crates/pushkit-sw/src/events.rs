//! Extendable events: the work a handler registers and the host awaits.
//!
//! A handler never awaits anything itself. It returns an [`ExtendableEvent`]
//! holding named tasks; the host keeps the worker alive until
//! [`ExtendableEvent::settle`] resolves. Tasks run concurrently and a failing
//! task never cancels its siblings.

use std::future::Future;
use std::time::Instant;

use futures::future::{join_all, BoxFuture, FutureExt};
use tracing::{info, warn};

use crate::cache::FetchResponse;
use crate::click::ClickOutcome;
use crate::clients::RelayReport;
use crate::notification::NotificationId;
use crate::ServiceWorkerError;

/// Kinds of events the worker reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Push,
    NotificationClick,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch => "fetch",
            Self::Push => "push",
            Self::NotificationClick => "notificationclick",
        }
    }
}

/// What a settled task produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    /// Precache stored this many entries.
    Installed { entries: usize },
    /// Worker activated; stale caches removed.
    Activated { removed: Vec<String> },
    /// Response for an intercepted request.
    Response(FetchResponse),
    /// Notification displayed.
    Notified(NotificationId),
    /// Message relayed to open windows.
    Relayed(RelayReport),
    /// Notification click routed.
    Clicked(ClickOutcome),
}

/// A task registered with an event.
pub struct PendingTask {
    name: &'static str,
    future: BoxFuture<'static, Result<TaskOutput, ServiceWorkerError>>,
}

impl std::fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTask").field("name", &self.name).finish()
    }
}

/// An event together with the work it must wait for.
#[derive(Debug)]
pub struct ExtendableEvent {
    kind: EventKind,
    tasks: Vec<PendingTask>,
}

impl ExtendableEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            tasks: Vec::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Register work the event must wait for.
    pub fn wait_until<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<TaskOutput, ServiceWorkerError>> + Send + 'static,
    {
        self.tasks.push(PendingTask {
            name,
            future: task.boxed(),
        });
    }

    /// Register a task that always fails, for events the worker cannot handle.
    pub fn reject(&mut self, name: &'static str, error: ServiceWorkerError) {
        self.wait_until(name, async move { Err(error) });
    }

    /// Names of the registered tasks, in registration order.
    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drive every task to completion.
    pub async fn settle(self) -> SettledEvent {
        let kind = self.kind;
        let started = Instant::now();

        let runs = self.tasks.into_iter().map(|task| async move {
            let result = task.future.await;
            if let Err(ref e) = result {
                warn!(
                    event = kind.as_str(),
                    task = task.name,
                    category = e.category(),
                    error = %e,
                    "task failed"
                );
            }
            TaskOutcome {
                name: task.name,
                result,
            }
        });
        let outcomes = join_all(runs).await;

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            event = kind.as_str(),
            tasks = outcomes.len(),
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "event settled"
        );

        SettledEvent { kind, outcomes }
    }
}

/// Result of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub name: &'static str,
    pub result: Result<TaskOutput, ServiceWorkerError>,
}

/// An event whose tasks have all finished.
#[derive(Debug, Clone)]
pub struct SettledEvent {
    pub kind: EventKind,
    pub outcomes: Vec<TaskOutcome>,
}

impl SettledEvent {
    /// Whether every task succeeded.
    pub fn is_ok(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Outcome of a named task.
    pub fn outcome(&self, name: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| o.name == name)
    }

    /// Output of a named task, if it succeeded.
    pub fn output(&self, name: &str) -> Option<&TaskOutput> {
        self.outcome(name).and_then(|o| o.result.as_ref().ok())
    }

    /// Failed tasks.
    pub fn failures(&self) -> Vec<(&'static str, &ServiceWorkerError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.name, e)))
            .collect()
    }

    /// The response of a fetch event, if one was produced.
    pub fn response(&self) -> Option<&FetchResponse> {
        self.outcomes.iter().find_map(|o| match o.result {
            Ok(TaskOutput::Response(ref resp)) => Some(resp),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_failure_does_not_cancel_sibling() {
        let mut event = ExtendableEvent::new(EventKind::Push);
        event.reject("fails", ServiceWorkerError::NotificationError("denied".into()));
        event.wait_until("slow", async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(TaskOutput::Installed { entries: 1 })
        });
        assert_eq!(event.task_names(), vec!["fails", "slow"]);

        let settled = event.settle().await;
        assert!(!settled.is_ok());
        assert_eq!(settled.failures().len(), 1);
        assert_eq!(
            settled.output("slow"),
            Some(&TaskOutput::Installed { entries: 1 })
        );
    }

    #[tokio::test]
    async fn test_empty_event_settles_ok() {
        let settled = ExtendableEvent::new(EventKind::Activate).settle().await;
        assert!(settled.is_ok());
        assert!(settled.response().is_none());
    }

    #[tokio::test]
    async fn test_response_lookup() {
        let mut event = ExtendableEvent::new(EventKind::Fetch);
        event.wait_until("respond-with", async {
            Ok(TaskOutput::Response(FetchResponse::ok("hi")))
        });
        let settled = event.settle().await;
        assert_eq!(settled.response().map(|r| r.body.clone()), Some(b"hi".to_vec()));
    }
}
