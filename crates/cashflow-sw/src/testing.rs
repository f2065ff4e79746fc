//! Shared fixtures for worker tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cashflow_common::WorkerConfig;
use cashflow_net::{NetError, Network, Request, Response, ResponseType};
use http::StatusCode;
use tempfile::TempDir;
use tokio::sync::{mpsc, RwLock};
use url::Url;

use crate::cache::CacheStorage;
use crate::clients::WindowRegistry;
use crate::context::{WorkerContext, WorkerHosts, WorkerNotice};
use crate::notification::NotificationCenter;

pub(crate) const ORIGIN: &str = "https://cash.example/";

#[derive(Clone)]
struct Canned {
    status: u16,
    response_type: ResponseType,
    body: &'static str,
}

#[derive(Default)]
struct FakeState {
    routes: HashMap<String, Canned>,
    failing: Vec<String>,
    rejected_bodies: Vec<(String, String)>,
    calls: Vec<String>,
    bodies: Vec<(String, Vec<u8>)>,
}

/// Scripted network. Unknown URLs answer 404.
#[derive(Default)]
pub(crate) struct FakeNetwork {
    state: Mutex<FakeState>,
}

impl FakeNetwork {
    pub(crate) fn respond(
        &self,
        url: &str,
        status: u16,
        response_type: ResponseType,
        body: &'static str,
    ) {
        let mut state = self.state.lock().unwrap();
        state.failing.retain(|u| u != url);
        state.routes.insert(
            url.to_string(),
            Canned {
                status,
                response_type,
                body,
            },
        );
    }

    /// Make every request to `url` fail at the transport level.
    pub(crate) fn fail(&self, url: &str) {
        self.state.lock().unwrap().failing.push(url.to_string());
    }

    /// Answer 500 to requests on `url` whose body contains `needle`.
    pub(crate) fn reject_bodies_containing(&self, url: &str, needle: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected_bodies
            .push((url.to_string(), needle.to_string()));
    }

    pub(crate) fn call_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Bodies sent to `url`, in order.
    pub(crate) fn bodies_to(&self, url: &str) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .bodies
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, body)| serde_json::from_slice(body).unwrap())
            .collect()
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == url)
            .count()
    }
}

#[async_trait]
impl Network for FakeNetwork {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        let url = request.url.as_str().to_string();
        let mut state = self.state.lock().unwrap();
        state.calls.push(url.clone());
        if let Some(body) = &request.body {
            state.bodies.push((url.clone(), body.to_vec()));
        }

        if state.failing.contains(&url) {
            return Err(NetError::RequestFailed(format!("connection refused: {url}")));
        }

        let body = request
            .body
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default();
        let rejected = state
            .rejected_bodies
            .iter()
            .any(|(u, needle)| *u == url && body.contains(needle.as_str()));
        if rejected {
            return Ok(Response::new(
                request.url,
                StatusCode::INTERNAL_SERVER_ERROR,
                ResponseType::Basic,
            ));
        }

        let canned = state.routes.get(&url).cloned().unwrap_or(Canned {
            status: 404,
            response_type: ResponseType::Basic,
            body: "",
        });
        let status = StatusCode::from_u16(canned.status).unwrap();
        Ok(Response::new(request.url, status, canned.response_type).with_body(canned.body))
    }
}

/// A worker context wired to in-memory hosts.
pub(crate) struct TestWorker {
    pub(crate) ctx: Arc<WorkerContext>,
    pub(crate) notices: mpsc::UnboundedReceiver<WorkerNotice>,
    pub(crate) network: Arc<FakeNetwork>,
    pub(crate) notifications: Arc<NotificationCenter>,
    pub(crate) windows: Arc<WindowRegistry>,
    _dir: TempDir,
}

impl TestWorker {
    pub(crate) fn new() -> Self {
        Self::with_storage(CacheStorage::new())
    }

    pub(crate) fn with_storage(storage: CacheStorage) -> Self {
        Self::sharing(Arc::new(RwLock::new(storage)), "cashflow-v1")
    }

    /// A worker of `version` over storage shared with other versions.
    pub(crate) fn sharing(storage: Arc<RwLock<CacheStorage>>, version: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = WorkerConfig {
            origin: Url::parse(ORIGIN).unwrap(),
            cache_version: version.to_string(),
            ..WorkerConfig::default()
        };
        config.sync.queue_path = dir.path().join("pending-writes.json");

        let network = Arc::new(FakeNetwork::default());
        let notifications = Arc::new(NotificationCenter::new());
        let windows = Arc::new(WindowRegistry::new());
        let hosts = WorkerHosts {
            network: network.clone(),
            notifications: notifications.clone(),
            clients: windows.clone(),
        };

        let (ctx, notices) = WorkerContext::with_storage(config, hosts, storage);
        Self {
            ctx,
            notices,
            network,
            notifications,
            windows,
            _dir: dir,
        }
    }

    /// Answer every precache route with 200.
    pub(crate) fn serve_manifest(&self) {
        let bodies = [
            ("", "home"),
            ("static/css/style.css", "body{}"),
            ("accounts/login/", "login"),
            ("core/dashboard/", "dashboard"),
        ];
        for (path, body) in bodies {
            self.network
                .respond(&format!("{ORIGIN}{path}"), 200, ResponseType::Basic, body);
        }
    }
}
