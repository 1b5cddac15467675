//! PushKit Smoke Harness
//!
//! Drives the relay worker through a scripted install / fetch / push / click
//! scenario against in-memory hosts and prints a JSON summary of what each
//! event produced.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use pushkit_common::{init_logging, LogConfig, LogFormat};
use pushkit_sw::{
    HostCapabilities, InMemoryNotifications, InMemoryWindows, NotificationClickEvent, PushEvent,
    RelayWorker, Request, SettledEvent, StaticNetwork, TaskOutput, WindowHandle, WorkerConfig,
    WorkerEvent,
};
use serde_json::json;
use tracing::{error, info};
use url::Url;

const DEFAULT_SCRIPT_URL: &str = "https://localhost/static/service-worker.js";

/// Per-event timing collector.
struct PerfTiming {
    timings: RefCell<HashMap<&'static str, Vec<Duration>>>,
}

impl PerfTiming {
    fn new() -> Self {
        Self {
            timings: RefCell::new(HashMap::new()),
        }
    }

    fn record(&self, operation: &'static str, duration: Duration) {
        self.timings
            .borrow_mut()
            .entry(operation)
            .or_default()
            .push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let timings = self.timings.borrow();
        let mut summary = serde_json::Map::new();

        for (op, durations) in timings.iter() {
            if durations.is_empty() {
                continue;
            }
            let count = durations.len();
            let total_ms: f64 = durations.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
            let max_ms = durations
                .iter()
                .map(|d| d.as_secs_f64() * 1000.0)
                .fold(0.0, f64::max);

            summary.insert(
                op.to_string(),
                json!({
                    "count": count,
                    "avg_ms": (total_ms / count as f64 * 100.0).round() / 100.0,
                    "max_ms": (max_ms * 100.0).round() / 100.0,
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

/// Parse command line arguments
struct Args {
    config: Option<String>,
    script_url: String,
    windows: usize,
    offline: bool,
    payload: Option<String>,
    perf_output: Option<String>,
    log_format: Option<LogFormat>,
    log_filter: Option<String>,
    verbose: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config: None,
            script_url: DEFAULT_SCRIPT_URL.to_string(),
            windows: 1,
            offline: false,
            payload: None,
            perf_output: None,
            log_format: None,
            log_filter: None,
            verbose: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" => parsed.config = args.next(),
                "--script-url" => {
                    if let Some(val) = args.next() {
                        parsed.script_url = val;
                    }
                }
                "--windows" => {
                    if let Some(val) = args.next() {
                        parsed.windows = val.parse().unwrap_or(1);
                    }
                }
                "--offline" => parsed.offline = true,
                "--payload" => parsed.payload = args.next(),
                "--perf-output" => parsed.perf_output = args.next(),
                "--log-format" => parsed.log_format = args.next().and_then(|v| LogFormat::parse(&v)),
                "--log-filter" => parsed.log_filter = args.next(),
                "--verbose" | "-v" => parsed.verbose = true,
                _ => {}
            }
        }
        parsed
    }

    fn worker_config(&self) -> anyhow::Result<WorkerConfig> {
        match self.config {
            Some(ref path) => Ok(WorkerConfig::load(path)?),
            None => {
                let url = Url::parse(&self.script_url)
                    .with_context(|| format!("invalid --script-url {}", self.script_url))?;
                Ok(WorkerConfig::from_script_url(url))
            }
        }
    }
}

fn describe(settled: &SettledEvent) -> serde_json::Value {
    let tasks: Vec<serde_json::Value> = settled
        .outcomes
        .iter()
        .map(|o| match o.result {
            Ok(ref output) => json!({ "task": o.name, "ok": true, "output": describe_output(output) }),
            Err(ref e) => json!({ "task": o.name, "ok": false, "error": e.to_string() }),
        })
        .collect();
    json!({ "event": settled.kind.as_str(), "tasks": tasks })
}

fn describe_output(output: &TaskOutput) -> serde_json::Value {
    match output {
        TaskOutput::Installed { entries } => json!({ "entries": entries }),
        TaskOutput::Activated { removed } => json!({ "removed": removed }),
        TaskOutput::Response(resp) => json!({ "status": resp.status, "from_cache": resp.from_cache }),
        TaskOutput::Notified(id) => json!({ "notification": id.raw() }),
        TaskOutput::Relayed(report) => json!({
            "delivered": report.delivered,
            "failed": report.failed.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
        }),
        TaskOutput::Clicked(outcome) => json!({ "click": format!("{outcome:?}") }),
    }
}

/// Network answering every manifest entry plus one uncached API route.
fn scenario_network(worker_config: &WorkerConfig, offline: bool) -> anyhow::Result<StaticNetwork> {
    let scope = pushkit_sw::WorkerScope::new(worker_config.clone())?;
    let mut network = StaticNetwork::new();
    for url in scope.manifest().iter() {
        network = if offline {
            network.with_failure(url.as_str())
        } else {
            network.with_route(url.as_str(), format!("precached {}", url.path()))
        };
    }
    let api = worker_config.script_url.join(&format!("{}/api/graphql", scope.prefix()))?;
    Ok(network.with_route(api.as_str(), "{\"data\":{}}"))
}

async fn run(args: Args) -> anyhow::Result<serde_json::Value> {
    let config = args.worker_config()?;
    let network = Arc::new(scenario_network(&config, args.offline)?);
    let notifications = Arc::new(InMemoryNotifications::new());
    let windows = Arc::new(InMemoryWindows::new());

    let worker = RelayWorker::new(
        config.clone(),
        HostCapabilities::new(network, notifications.clone(), windows.clone()),
    )?;
    let root = worker.scope().root_path().to_string();
    for i in 0..args.windows {
        windows
            .add(WindowHandle::window(&format!("{root}?window={i}")))
            .await;
    }

    let perf = PerfTiming::new();
    let mut events = Vec::new();

    let mut script = vec![WorkerEvent::Install, WorkerEvent::Activate];
    for url in worker.scope().manifest().iter() {
        script.push(WorkerEvent::Fetch(Request::get(url.clone())));
    }
    let api = config
        .script_url
        .join(&format!("{}/api/graphql", worker.scope().prefix()))?;
    script.push(WorkerEvent::Fetch(Request::get(api)));

    let payload = match args.payload {
        Some(ref raw) => PushEvent::new(raw.as_bytes()),
        None => PushEvent::json(&json!({
            "type": "alert",
            "title": "Alert #1 · Smoke Service",
            "body": "Smoke test alert",
            "url": "/alerts/1",
        })),
    };
    script.push(WorkerEvent::Push(payload));

    for event in script {
        let kind = event.kind().as_str();
        let started = Instant::now();
        let settled = worker.handle(event).await;
        perf.record(kind, started.elapsed());
        events.push(describe(&settled));
    }

    // Click whatever the push displayed.
    if let Some(shown) = notifications.shown().await.into_iter().next() {
        let data = serde_json::to_value(&shown.record.data)?;
        let started = Instant::now();
        let settled = worker
            .handle(WorkerEvent::NotificationClick(NotificationClickEvent::new(
                shown.id, data,
            )))
            .await;
        perf.record("notificationclick", started.elapsed());
        events.push(describe(&settled));
    }

    Ok(json!({
        "cache": config.cache_name,
        "state": format!("{:?}", worker.state().await),
        "windows": windows.len().await,
        "events": events,
        "perf": perf.summary(),
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut log_config = if args.verbose {
        LogConfig::debug()
    } else {
        LogConfig::from_env()
    };
    if let Some(format) = args.log_format {
        log_config = log_config.with_format(format);
    }
    if let Some(ref filter) = args.log_filter {
        log_config = log_config.with_filter(filter.clone());
    }
    init_logging(log_config)?;

    info!(
        script_url = %args.script_url,
        windows = args.windows,
        offline = args.offline,
        "Starting PushKit smoke harness"
    );

    let perf_output = args.perf_output.clone();
    let summary = match run(args).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "smoke run failed");
            return Err(e);
        }
    };

    let rendered = serde_json::to_string_pretty(&summary)?;
    match perf_output {
        Some(path) => {
            std::fs::write(&path, &rendered).with_context(|| format!("writing {path}"))?;
            info!(path = %path, "wrote summary");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
