//! CashFlow Smoke Harness
//!
//! Boots the background worker against a live origin with headless hosts,
//! runs install and activate, then replays the precache manifest through
//! the fetch interceptor and prints a JSON summary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use cashflow_common::{init_logging, LogConfig, LogFormat, WorkerConfig};
use cashflow_net::{HttpLoader, LoaderConfig, NetError, Network, Request, Response};
use cashflow_sw::{
    dispatch, EventOutcome, NotificationCenter, WindowRegistry, WorkerContext, WorkerEvent,
    WorkerHosts,
};
use serde_json::json;
use tracing::{error, info};
use url::Url;

/// Duration collector keyed by event kind.
#[derive(Default)]
struct PerfTiming {
    timings: HashMap<&'static str, Vec<Duration>>,
}

impl PerfTiming {
    fn record(&mut self, kind: &'static str, duration: Duration) {
        self.timings.entry(kind).or_default().push(duration);
    }

    fn summary(&self) -> serde_json::Value {
        let mut summary = serde_json::Map::new();

        for (kind, durations) in &self.timings {
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
                kind.to_string(),
                json!({
                    "count": count,
                    "total_ms": (total_ms * 100.0).round() / 100.0,
                    "avg_ms": (total_ms / count as f64 * 100.0).round() / 100.0,
                    "max_ms": (max_ms * 100.0).round() / 100.0,
                }),
            );
        }

        serde_json::Value::Object(summary)
    }
}

/// Network wrapper that can be cut off, to check what the worker serves offline.
struct OfflineSwitch<N> {
    inner: N,
    offline: AtomicBool,
}

impl<N: Network> OfflineSwitch<N> {
    fn new(inner: N) -> Self {
        Self {
            inner,
            offline: AtomicBool::new(false),
        }
    }

    fn go_offline(&self) {
        self.offline.store(true, Ordering::Release);
    }
}

#[async_trait]
impl<N: Network> Network for OfflineSwitch<N> {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        if self.offline.load(Ordering::Acquire) {
            return Err(NetError::RequestFailed(format!("offline: {}", request.url)));
        }
        self.inner.fetch(request).await
    }
}

/// Whether every replayed route came back 200.
fn all_served(replayed: &[serde_json::Value]) -> bool {
    replayed.iter().all(|r| r.get("status") == Some(&json!(200)))
}

/// Parse command line arguments
struct Args {
    origin: Option<String>,
    config: Option<String>,
    log_format: LogFormat,
    offline_check: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut origin = None;
        let mut config = None;
        let mut log_format = LogFormat::Compact;
        let mut offline_check = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--origin" => {
                    origin = args.next();
                }
                "--config" => {
                    config = args.next();
                }
                "--log" => {
                    if let Some(val) = args.next() {
                        log_format = LogFormat::from_name(&val).unwrap_or(LogFormat::Compact);
                    }
                }
                "--offline-check" => {
                    offline_check = true;
                }
                _ => {}
            }
        }

        Self {
            origin,
            config,
            log_format,
            offline_check,
        }
    }

    fn worker_config(&self) -> Result<WorkerConfig> {
        let mut config = match &self.config {
            Some(path) => WorkerConfig::load(path)
                .with_context(|| format!("loading worker config from {path}"))?,
            None => WorkerConfig::default(),
        };
        if let Some(origin) = &self.origin {
            config.origin = Url::parse(origin).with_context(|| format!("bad origin {origin}"))?;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LogConfig::default().with_format(args.log_format));

    let config = args.worker_config()?;
    let manifest = config.precache.clone();

    let loader = HttpLoader::new(LoaderConfig {
        origin: config.origin.clone(),
        default_timeout: config.network_timeout(),
        ..Default::default()
    })?;
    let notifications = Arc::new(NotificationCenter::new());
    let windows = Arc::new(WindowRegistry::new());
    let network = Arc::new(OfflineSwitch::new(loader));
    let hosts = WorkerHosts {
        network: network.clone(),
        notifications: notifications.clone(),
        clients: windows.clone(),
    };

    let (ctx, mut notices) = WorkerContext::new(config, hosts);
    let mut perf = PerfTiming::default();

    info!(version = ctx.version(), origin = %ctx.config().origin, "Starting smoke run");

    let start = Instant::now();
    let installed = dispatch(&ctx, WorkerEvent::Install).wait().await;
    perf.record("install", start.elapsed());
    let cached = match installed {
        Ok(EventOutcome::Installed { cached }) => cached,
        Ok(other) => bail!("unexpected install outcome: {other:?}"),
        Err(e) => {
            error!(error = %e, "Install failed");
            return Err(e).context("install");
        }
    };

    let start = Instant::now();
    let removed = match dispatch(&ctx, WorkerEvent::Activate).wait().await? {
        EventOutcome::Activated { removed } => removed,
        other => bail!("unexpected activate outcome: {other:?}"),
    };
    perf.record("activate", start.elapsed());

    if args.offline_check {
        info!("Network cut off, replaying manifest from cache only");
        network.go_offline();
    }

    let mut replayed = Vec::with_capacity(manifest.len());
    for route in &manifest {
        let url = ctx.config().resolve(route)?;
        let start = Instant::now();
        let outcome = dispatch(&ctx, WorkerEvent::Fetch(Request::get(url))).wait().await;
        perf.record("fetch", start.elapsed());

        let entry = match outcome {
            Ok(EventOutcome::Responded(response)) => json!({
                "route": route,
                "status": response.status.as_u16(),
                "type": response.response_type.as_str(),
                "bytes": response.body_len(),
            }),
            Ok(other) => json!({ "route": route, "unexpected": format!("{other:?}") }),
            Err(e) => json!({ "route": route, "error": e.to_string(), "kind": e.failure_kind().as_str() }),
        };
        replayed.push(entry);
    }

    let start = Instant::now();
    let pushed = dispatch(&ctx, WorkerEvent::Push(None)).wait().await?;
    perf.record("push", start.elapsed());
    if let EventOutcome::Displayed(descriptor) = pushed {
        let start = Instant::now();
        dispatch(&ctx, WorkerEvent::NotificationClick(descriptor))
            .wait()
            .await?;
        perf.record("notificationclick", start.elapsed());
    }

    let mut state_changes = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        state_changes.push(format!("{notice:?}"));
    }

    let summary = json!({
        "version": ctx.version(),
        "cached": cached,
        "removed_generations": removed,
        "replayed": replayed,
        "offline_check": args.offline_check,
        "notifications": notifications.displayed().await.len(),
        "windows": windows
            .all()
            .await
            .iter()
            .map(|w| w.url.to_string())
            .collect::<Vec<_>>(),
        "notices": state_changes,
        "timing": perf.summary(),
    });

    if args.offline_check {
        if !all_served(&replayed) {
            bail!("manifest not fully served from cache: {summary}");
        }
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    ctx.retire().await;
    Ok(())
}
