//! End-to-end event flows through the dispatch table with in-memory hosts.

use std::sync::Arc;

use async_trait::async_trait;
use pushkit_sw::{
    ClickOutcome, ClientMatchOptions, HostCapabilities, InMemoryNotifications, InMemoryWindows,
    NotificationClickEvent, PushEvent, RelayWorker, Request, ServiceWorkerError,
    ServiceWorkerState, StaticNetwork, TaskOutput, WindowHandle, WindowHost, WorkerConfig,
    WorkerEvent,
};
use serde_json::{json, Value as JsonValue};
use url::Url;

const SCRIPT: &str = "https://oncall.example.com/goalert/static/service-worker.js";

struct Harness {
    worker: RelayWorker,
    network: Arc<StaticNetwork>,
    notifications: Arc<InMemoryNotifications>,
    windows: Arc<InMemoryWindows>,
}

fn url(path: &str) -> Url {
    Url::parse("https://oncall.example.com").unwrap().join(path).unwrap()
}

fn precache_network() -> StaticNetwork {
    StaticNetwork::new()
        .with_route(url("/goalert/").as_str(), "<html>app</html>")
        .with_route(url("/goalert/static/app.js").as_str(), "console.log(1)")
        .with_route(url("/goalert/static/app.css").as_str(), "body{}")
        .with_route(url("/goalert/api/graphql").as_str(), "{\"data\":{}}")
}

fn harness(network: StaticNetwork) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pushkit_sw=debug")
        .with_test_writer()
        .try_init();

    let network = Arc::new(network);
    let notifications = Arc::new(InMemoryNotifications::new());
    let windows = Arc::new(InMemoryWindows::new());
    let config = WorkerConfig::from_script_url(Url::parse(SCRIPT).unwrap());
    let worker = RelayWorker::new(
        config,
        HostCapabilities::new(network.clone(), notifications.clone(), windows.clone()),
    )
    .unwrap();

    Harness {
        worker,
        network,
        notifications,
        windows,
    }
}

#[tokio::test]
async fn precached_resources_are_served_offline() {
    let h = harness(precache_network());
    assert!(h.worker.handle(WorkerEvent::Install).await.is_ok());
    assert!(h.worker.handle(WorkerEvent::Activate).await.is_ok());
    let calls_after_install = h.network.call_count().await;
    assert_eq!(calls_after_install, 3);

    for path in h.worker.scope().manifest().paths() {
        let settled = h
            .worker
            .handle(WorkerEvent::Fetch(Request::get(url(path))))
            .await;
        let response = settled.response().expect("fetch produces a response");
        assert!(response.from_cache, "{path} should come from cache");
    }
    assert_eq!(h.network.call_count().await, calls_after_install);
}

#[tokio::test]
async fn uncached_request_falls_through_once() {
    let h = harness(precache_network());
    h.worker.handle(WorkerEvent::Install).await;

    let api = url("/goalert/api/graphql");
    let settled = h
        .worker
        .handle(WorkerEvent::Fetch(Request::get(api.clone())))
        .await;
    assert!(!settled.response().unwrap().from_cache);
    assert_eq!(h.network.calls_for(api.as_str()).await, 1);

    let storage = h.worker.cache().storage().read().await;
    assert!(storage.match_request(&Request::get(api)).is_none());
}

#[tokio::test]
async fn request_before_install_uses_network() {
    let h = harness(precache_network());
    assert_eq!(h.worker.state().await, ServiceWorkerState::Parsed);

    let app_js = url("/goalert/static/app.js");
    let settled = h
        .worker
        .handle(WorkerEvent::Fetch(Request::get(app_js.clone())))
        .await;
    assert!(!settled.response().unwrap().from_cache);
    assert_eq!(h.network.calls_for(app_js.as_str()).await, 1);
}

#[tokio::test]
async fn install_is_all_or_nothing() {
    let h = harness(precache_network().with_failure(url("/goalert/static/app.css").as_str()));
    let settled = h.worker.handle(WorkerEvent::Install).await;

    assert!(!settled.is_ok());
    assert_eq!(h.worker.state().await, ServiceWorkerState::Redundant);

    let app_js = url("/goalert/static/app.js");
    let fetched = h
        .worker
        .handle(WorkerEvent::Fetch(Request::get(app_js.clone())))
        .await;
    assert!(!fetched.response().unwrap().from_cache);
}

#[tokio::test]
async fn push_displays_and_relays_original_payload() {
    let h = harness(precache_network());
    let a = h.windows.add(WindowHandle::window("/goalert/alerts")).await;
    let b = h
        .windows
        .add(WindowHandle::uncontrolled_window("/goalert/services"))
        .await;

    let payload = json!({ "title": "Alert", "body": "X", "url": "/alerts/1", "type": "alert", "alertID": 1 });
    let settled = h
        .worker
        .handle(WorkerEvent::Push(PushEvent::json(&payload)))
        .await;
    assert!(settled.is_ok());

    let shown = h.notifications.shown().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].record.title, "Alert");
    assert_eq!(shown[0].record.body, "X");
    assert_eq!(shown[0].record.data.url, "/alerts/1");

    assert_eq!(h.windows.messages(&a).await, vec![payload.clone()]);
    assert_eq!(h.windows.messages(&b).await, vec![payload]);
}

#[tokio::test]
async fn unparsable_push_uses_defaults() {
    let h = harness(precache_network());
    let a = h.windows.add(WindowHandle::window("/goalert/")).await;

    let settled = h
        .worker
        .handle(WorkerEvent::Push(PushEvent::new("\u{0}garbage")))
        .await;
    assert!(settled.is_ok());

    let shown = h.notifications.shown().await;
    assert_eq!(shown[0].record.title, "GoAlert");
    assert_eq!(shown[0].record.body, "");
    assert_eq!(shown[0].record.data.url, "/goalert/");
    assert_eq!(h.windows.messages(&a).await, vec![json!({})]);
}

#[tokio::test]
async fn display_failure_does_not_block_relay() {
    let h = harness(precache_network());
    let a = h.windows.add(WindowHandle::window("/goalert/")).await;
    h.notifications.deny();

    let payload = json!({ "title": "Alert" });
    let settled = h
        .worker
        .handle(WorkerEvent::Push(PushEvent::json(&payload)))
        .await;

    assert_eq!(settled.failures().len(), 1);
    assert_eq!(settled.failures()[0].0, "show-notification");
    assert!(matches!(
        settled.output("relay-to-windows"),
        Some(TaskOutput::Relayed(report)) if report.delivered == 1
    ));
    assert_eq!(h.windows.messages(&a).await, vec![payload]);
}

/// Window host whose client list cannot be read.
struct UnreachableWindows;

#[async_trait]
impl WindowHost for UnreachableWindows {
    async fn match_all(
        &self,
        _options: ClientMatchOptions,
    ) -> Result<Vec<WindowHandle>, ServiceWorkerError> {
        Err(ServiceWorkerError::ClientError("clients unavailable".into()))
    }

    async fn focus(&self, client: &WindowHandle) -> Result<WindowHandle, ServiceWorkerError> {
        Err(ServiceWorkerError::NotFound(client.id.to_string()))
    }

    async fn post_message(
        &self,
        client: &WindowHandle,
        _message: &JsonValue,
    ) -> Result<(), ServiceWorkerError> {
        Err(ServiceWorkerError::NotFound(client.id.to_string()))
    }

    async fn open_window(&self, _url: &str) -> Result<Option<WindowHandle>, ServiceWorkerError> {
        Ok(None)
    }
}

#[tokio::test]
async fn relay_failure_does_not_block_display() {
    let notifications = Arc::new(InMemoryNotifications::new());
    let config = WorkerConfig::from_script_url(Url::parse(SCRIPT).unwrap());
    let worker = RelayWorker::new(
        config,
        HostCapabilities::new(
            Arc::new(precache_network()),
            notifications.clone(),
            Arc::new(UnreachableWindows),
        ),
    )
    .unwrap();

    let settled = worker
        .handle(WorkerEvent::Push(PushEvent::json(&json!({ "title": "Alert", "body": "X" }))))
        .await;

    assert_eq!(settled.failures().len(), 1);
    assert_eq!(settled.failures()[0].0, "relay-to-windows");
    assert!(matches!(
        settled.output("show-notification"),
        Some(TaskOutput::Notified(_))
    ));

    let shown = notifications.shown().await;
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].record.title, "Alert");
    assert_eq!(shown[0].record.body, "X");
}

#[tokio::test]
async fn relay_survives_one_broken_window() {
    let h = harness(precache_network());
    let ids = [
        h.windows.add(WindowHandle::window("/goalert/1")).await,
        h.windows.add(WindowHandle::window("/goalert/2")).await,
        h.windows.add(WindowHandle::window("/goalert/3")).await,
    ];
    h.windows.break_channel(&ids[0]).await;

    let payload = json!({ "body": "X" });
    let settled = h
        .worker
        .handle(WorkerEvent::Push(PushEvent::json(&payload)))
        .await;

    let Some(TaskOutput::Relayed(report)) = settled.output("relay-to-windows") else {
        panic!("relay task should succeed: {:?}", settled.outcomes);
    };
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, vec![ids[0].clone()]);
    assert_eq!(h.windows.messages(&ids[1]).await, vec![payload.clone()]);
    assert_eq!(h.windows.messages(&ids[2]).await, vec![payload]);
}

#[tokio::test]
async fn click_focuses_existing_window() {
    let h = harness(precache_network());
    let first = h.windows.add(WindowHandle::window("/goalert/services")).await;

    h.worker
        .handle(WorkerEvent::Push(PushEvent::json(&json!({ "url": "/alerts/7" }))))
        .await;
    let shown = h.notifications.shown().await.remove(0);

    let data = serde_json::to_value(&shown.record.data).unwrap();
    let settled = h
        .worker
        .handle(WorkerEvent::NotificationClick(NotificationClickEvent::new(
            shown.id, data,
        )))
        .await;

    assert_eq!(
        settled.output("focus-or-open"),
        Some(&TaskOutput::Clicked(ClickOutcome::Focused(first.clone())))
    );
    assert_eq!(h.windows.len().await, 1);
    assert!(h.notifications.get(shown.id).await.unwrap().closed);
}

#[tokio::test]
async fn click_opens_window_at_target_when_none_open() {
    let h = harness(precache_network());
    h.worker
        .handle(WorkerEvent::Push(PushEvent::json(&json!({ "url": "/alerts/7" }))))
        .await;
    let shown = h.notifications.shown().await.remove(0);

    let settled = h
        .worker
        .handle(WorkerEvent::NotificationClick(NotificationClickEvent::new(
            shown.id,
            json!({ "url": "/alerts/7" }),
        )))
        .await;

    let Some(TaskOutput::Clicked(ClickOutcome::Opened(id))) = settled.output("focus-or-open") else {
        panic!("expected a window to be opened: {:?}", settled.outcomes);
    };
    assert_eq!(h.windows.get(id).await.unwrap().url, "/alerts/7");
}

#[tokio::test]
async fn click_without_data_opens_worker_root() {
    let h = harness(precache_network());
    let settled = h
        .worker
        .handle(WorkerEvent::NotificationClick(NotificationClickEvent::new(
            pushkit_sw::NotificationId::new(),
            serde_json::Value::Null,
        )))
        .await;

    let Some(TaskOutput::Clicked(ClickOutcome::Opened(id))) = settled.output("focus-or-open") else {
        panic!("expected a window to be opened: {:?}", settled.outcomes);
    };
    assert_eq!(h.windows.get(id).await.unwrap().url, "/goalert/");
}

#[tokio::test]
async fn overlapping_pushes_both_settle() {
    let h = harness(precache_network());
    let a = h.windows.add(WindowHandle::window("/goalert/")).await;

    let first = h.worker.dispatch(WorkerEvent::Push(PushEvent::json(&json!({ "n": 1 }))));
    let second = h.worker.dispatch(WorkerEvent::Push(PushEvent::json(&json!({ "n": 2 }))));
    let (s1, s2) = tokio::join!(first.settle(), second.settle());

    assert!(s1.is_ok() && s2.is_ok());
    let mut received = h.windows.messages(&a).await;
    received.sort_by_key(|m| m["n"].as_u64());
    assert_eq!(received, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
    assert_eq!(h.notifications.shown().await.len(), 2);
}
